// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accumulates the telemetry of one execution until it is sealed into a
//! [`Report`].

use crate::cold_start;
use crate::config::AgentConfig;
use crate::context::{InvocationContext, LambdaContext};
use crate::error::TelemetryError;
use crate::performance::{Mark, PerformanceEntries, PerformanceEntry, ScopedMeasurement};
use crate::report::{Report, ReportParts};
use crate::system::SnapshotProvider;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

const DURATION_UNSET: i64 = i64::MIN;

/// An error raised by the monitored code, as it appears in the `errors`
/// section of a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrownError {
    name: String,
    message: Option<String>,
    stack: String,
}

impl ThrownError {
    pub fn new(name: impl Into<String>, message: Option<String>, stack: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message,
            stack: stack.into(),
        }
    }

    /// Captures the error's type name, its message and source chain, and a
    /// backtrace when backtraces are enabled (`RUST_BACKTRACE`).
    pub fn from_error<E: Error + ?Sized>(error: &E) -> Self {
        let name = std::any::type_name::<E>().to_string();
        let message = error.to_string();

        let mut stack = format!("{name}: {message}");
        let mut source = error.source();
        while let Some(cause) = source {
            let _ = write!(stack, "\nCaused by: {cause}");
            source = cause.source();
        }
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            let _ = write!(stack, "\n{backtrace}");
        }

        Self {
            name,
            message: (!message.is_empty()).then_some(message),
            stack,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }
}

impl fmt::Display for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.name, message),
            None => f.write_str(&self.name),
        }
    }
}

/// Mutable-until-sealed telemetry of one execution.
///
/// Every setter takes `&self` and may be called from any task. Building a
/// report takes a snapshot of the current state and leaves the measurement
/// usable, so [`Measurement::build_request`] can be called repeatedly.
pub struct Measurement {
    config: Arc<AgentConfig>,
    lambda: Arc<dyn LambdaContext>,
    snapshot: Arc<dyn SnapshotProvider>,
    duration_ns: AtomicI64,
    thrown: Mutex<Option<ThrownError>>,
    cold_start: Mutex<Option<bool>>,
    entries: PerformanceEntries,
}

impl Measurement {
    pub fn new(
        config: Arc<AgentConfig>,
        lambda: Arc<dyn LambdaContext>,
        snapshot: Arc<dyn SnapshotProvider>,
    ) -> Self {
        Self {
            config,
            lambda,
            snapshot,
            duration_ns: AtomicI64::new(DURATION_UNSET),
            thrown: Mutex::new(None),
            cold_start: Mutex::new(None),
            entries: PerformanceEntries::new(),
        }
    }

    pub fn for_context(context: &InvocationContext, snapshot: Arc<dyn SnapshotProvider>) -> Self {
        Self::new(
            Arc::clone(context.config()),
            Arc::clone(context.lambda()),
            snapshot,
        )
    }

    pub fn set_duration(&self, duration_ns: u64) {
        let duration_ns = i64::try_from(duration_ns).unwrap_or(i64::MAX);
        self.duration_ns.store(duration_ns, Ordering::Release);
    }

    /// Execution duration in nanoseconds, `None` until set.
    pub fn duration(&self) -> Option<u64> {
        match self.duration_ns.load(Ordering::Acquire) {
            DURATION_UNSET => None,
            duration_ns => u64::try_from(duration_ns).ok(),
        }
    }

    pub fn set_thrown(&self, thrown: ThrownError) {
        *self.thrown.lock().unwrap_or_else(PoisonError::into_inner) = Some(thrown);
    }

    pub fn thrown(&self) -> Option<ThrownError> {
        self.thrown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Overrides the process-wide cold start detection for this measurement.
    pub fn set_cold_start(&self, cold_start: bool) {
        *self.cold_start.lock().unwrap_or_else(PoisonError::into_inner) = Some(cold_start);
    }

    /// Returns `false` when a value-identical entry was already recorded.
    pub fn add_performance_entry(&self, entry: PerformanceEntry) -> bool {
        self.entries.add(entry)
    }

    pub fn mark(&self, name: impl Into<String>) -> Mark {
        self.entries.mark(name)
    }

    pub fn measure(&self, name: impl Into<String>) -> ScopedMeasurement {
        self.entries.measure(name)
    }

    pub fn measure_between(
        &self,
        name: impl Into<String>,
        from: &Mark,
        to: &Mark,
    ) -> Result<PerformanceEntry, TelemetryError> {
        self.entries.measure_between(name, from, to)
    }

    pub fn performance_entries(&self) -> &PerformanceEntries {
        &self.entries
    }

    /// The first measurement of the process to ask claims the cold start. The
    /// answer is kept so later builds of the same measurement agree.
    fn resolve_cold_start(&self) -> bool {
        *self
            .cold_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(cold_start::claim)
    }

    /// Seals the current state, together with a fresh environment snapshot,
    /// into a serialized report.
    pub fn build_request(&self) -> Result<Report, TelemetryError> {
        let cold_start = self.resolve_cold_start();
        let thrown = self.thrown();
        let entries = self.entries.snapshot();
        let snapshot = self.snapshot.snapshot();

        Report::build(ReportParts {
            config: &self.config,
            lambda: self.lambda.as_ref(),
            snapshot: &snapshot,
            duration_ns: self.duration(),
            thrown: thrown.as_ref(),
            cold_start,
            entries: &entries,
        })
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Measurement")
            .field("aws_request_id", &self.lambda.aws_request_id())
            .field("duration_ns", &self.duration())
            .field("thrown", &self.thrown())
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}
