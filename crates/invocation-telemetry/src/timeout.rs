// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Timeout watchdog.
//!
//! Every [`InvocationContext`] with at least one running attempt gets a
//! monitoring task. The task sleeps until the host deadline minus the
//! configured window, or until it is woken because the last attempt finished.
//! If it wakes past the window with attempts still outstanding, it sends one
//! timeout report per outstanding attempt, at most once per context.
//!
//! ```text
//! register ──> Waiting ──(last attempt finished)──> Terminated ──> Retired
//!                 │ ▲
//!                 │ └──(spurious wake, time left)
//!                 └──(window reached)──> Expired ──(reports sent)──> Retired
//! ```
//!
//! Locks are always taken in the order manager map, then attempt map. The
//! monitoring task only ever takes the attempt map.

use crate::context::{ContextId, InvocationContext};
use crate::dispatch::ReportSink;
use crate::error::TelemetryError;
use crate::measurement::{Measurement, ThrownError};
use crate::system::SnapshotProvider;
use std::backtrace::Backtrace;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

/// Execution trace of an attempt, rendered only when a timeout is reported.
#[derive(Debug)]
enum AttemptTrace {
    Rendered(String),
    Captured(Backtrace),
}

/// The executing task of an attempt: a label naming it and the execution trace
/// captured when the handle was taken.
#[derive(Debug, Clone)]
pub struct AttemptHandle {
    label: String,
    trace: Arc<AttemptTrace>,
}

impl AttemptHandle {
    pub fn new(label: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            trace: Arc::new(AttemptTrace::Rendered(trace.into())),
        }
    }

    /// Handle for the calling thread, with its current backtrace. Frames are
    /// symbolized lazily.
    pub fn current() -> Self {
        let current = thread::current();
        let label = match current.name() {
            Some(name) => format!("{name} ({:?})", current.id()),
            None => format!("{:?}", current.id()),
        };
        Self {
            label,
            trace: Arc::new(AttemptTrace::Captured(Backtrace::force_capture())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn trace(&self) -> String {
        match self.trace.as_ref() {
            AttemptTrace::Rendered(trace) => trace.clone(),
            AttemptTrace::Captured(backtrace) => backtrace.to_string(),
        }
    }
}

/// Synthetic error attributed to an attempt that was still running when the
/// timeout window was reached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{label} still running with less than {window_ms}ms remaining")]
pub struct InvocationTimeout {
    label: String,
    window_ms: u128,
    trace: String,
}

impl InvocationTimeout {
    pub fn new(handle: &AttemptHandle, window: Duration) -> Self {
        Self {
            label: handle.label.clone(),
            window_ms: window.as_millis(),
            trace: handle.trace(),
        }
    }

    /// Error as reported, with the attempt's trace as its stack.
    pub fn to_thrown(&self) -> ThrownError {
        let name = std::any::type_name::<Self>();
        let message = self.to_string();
        let stack = format!("{name}: {message}\n{}", self.trace);
        ThrownError::new(name, Some(message), stack)
    }
}

/// Per-context monitor state, shared between the manager and the monitoring
/// task.
struct Active {
    context: Weak<InvocationContext>,
    attempts: Mutex<BTreeMap<u32, AttemptHandle>>,
    // Shared with the context so the answer survives the monitor.
    generated: Arc<AtomicBool>,
    terminated: AtomicBool,
    wake: Notify,
}

struct Monitor {
    active: Arc<Active>,
    task: JoinHandle<()>,
}

/// Tracks running attempts and reports those that overrun their deadline.
pub struct TimeoutManager {
    monitors: Mutex<HashMap<ContextId, Monitor>>,
    sink: Arc<dyn ReportSink>,
    snapshot: Arc<dyn SnapshotProvider>,
}

impl TimeoutManager {
    pub fn new(sink: Arc<dyn ReportSink>, snapshot: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            monitors: Mutex::new(HashMap::new()),
            sink,
            snapshot,
        }
    }

    /// Registers an attempt as running. The first registration for a context
    /// starts its monitoring task on the current tokio runtime. Registering
    /// the same attempt again replaces its handle.
    pub fn register(
        &self,
        context: &Arc<InvocationContext>,
        attempt: u32,
        handle: AttemptHandle,
    ) -> Result<(), TelemetryError> {
        if handle.label.trim().is_empty() {
            return Err(TelemetryError::InvalidArgument(format!(
                "attempt {attempt} of context {} has no task handle",
                context.id()
            )));
        }

        let mut monitors = self.monitors.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(monitor) = monitors.get(&context.id()) {
            monitor
                .active
                .attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(attempt, handle);
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            TelemetryError::Runtime(format!("Cannot start timeout monitor: {e}"))
        })?;

        let active = Arc::new(Active {
            context: Arc::downgrade(context),
            attempts: Mutex::new(BTreeMap::from([(attempt, handle)])),
            generated: context.timeout_flag(),
            terminated: AtomicBool::new(false),
            wake: Notify::new(),
        });
        let window = context.config().timeout_window;
        let task = runtime.spawn(
            monitor(
                Arc::clone(&active),
                window,
                Arc::clone(&self.sink),
                Arc::clone(&self.snapshot),
            )
            .instrument(info_span!("timeout_monitor", context = %context.id())),
        );

        debug!("Monitoring context {} from attempt {attempt}", context.id());
        monitors.insert(context.id(), Monitor { active, task });
        Ok(())
    }

    /// Marks an attempt as finished and returns whether a timeout report was
    /// generated for its context. Finishing the last outstanding attempt stops
    /// the context's monitor immediately. Unknown attempts are ignored.
    pub fn finished(&self, context: &InvocationContext, attempt: u32) -> bool {
        let mut monitors = self.monitors.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(monitor) = monitors.get(&context.id()) else {
            return context.timeout_reported();
        };
        let active = Arc::clone(&monitor.active);

        let (drained, generated) = {
            let mut attempts = active
                .attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if attempts.remove(&attempt).is_none() {
                debug!("Attempt {attempt} of context {} is not running", context.id());
            }
            if attempts.is_empty() {
                active.terminated.store(true, Ordering::Release);
            }
            (
                attempts.is_empty(),
                active.generated.load(Ordering::Acquire),
            )
        };

        if drained {
            active.wake.notify_one();
            monitors.remove(&context.id());
            debug!("Stopped monitoring context {}", context.id());
        }

        generated
    }

    pub fn is_monitoring(&self, context: &InvocationContext) -> bool {
        self.monitors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&context.id())
    }

    /// Sequence numbers of the attempts still running in `context`, ascending.
    pub fn active_attempts(&self, context: &InvocationContext) -> Vec<u32> {
        let monitors = self.monitors.lock().unwrap_or_else(PoisonError::into_inner);
        match monitors.get(&context.id()) {
            Some(monitor) => monitor
                .active
                .attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Drop for TimeoutManager {
    fn drop(&mut self) {
        let monitors = self.monitors.get_mut().unwrap_or_else(PoisonError::into_inner);
        for monitor in monitors.values() {
            monitor.task.abort();
        }
    }
}

async fn monitor(
    active: Arc<Active>,
    window: Duration,
    sink: Arc<dyn ReportSink>,
    snapshot: Arc<dyn SnapshotProvider>,
) {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

    loop {
        if active.terminated.load(Ordering::Acquire) {
            debug!("Monitor terminated");
            return;
        }
        let Some(context) = active.context.upgrade() else {
            debug!("Context dropped, monitor retired");
            return;
        };

        let remaining_ms = context
            .lambda()
            .remaining_time_millis()
            .saturating_sub(window_ms);
        if remaining_ms > 0 {
            drop(context);
            let remaining = Duration::from_millis(remaining_ms.unsigned_abs());
            tokio::select! {
                () = active.wake.notified() => {}
                () = tokio::time::sleep(remaining) => {}
            }
            continue;
        }

        let outstanding: Vec<(u32, AttemptHandle)> = {
            let attempts = active
                .attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if active.terminated.load(Ordering::Acquire) {
                return;
            }
            if active.generated.swap(true, Ordering::AcqRel) {
                return;
            }
            attempts
                .iter()
                .map(|(attempt, handle)| (*attempt, handle.clone()))
                .collect()
        };

        info!(attempts = outstanding.len(), "reporting timeout");
        for (attempt, handle) in outstanding {
            let timeout = InvocationTimeout::new(&handle, window);
            let measurement = Measurement::for_context(&context, Arc::clone(&snapshot));
            measurement.set_thrown(timeout.to_thrown());

            let sent = measurement
                .build_request()
                .and_then(|report| sink.send(report));
            if let Err(e) = sent {
                warn!("Dropping timeout report for attempt {attempt}: {e}");
            }
        }
        return;
    }
}
