// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs a handler as one monitored attempt of an invocation context.

use crate::config::AgentConfig;
use crate::context::InvocationContext;
use crate::dispatch::{DispatchService, ReportFlusher, ReportSink};
use crate::measurement::{Measurement, ThrownError};
use crate::system::{ProcSnapshotProvider, SnapshotProvider};
use crate::timeout::{AttemptHandle, TimeoutManager};
use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Wraps handler executions with the timeout watchdog and report delivery.
///
/// The handler's result is always returned unchanged. Telemetry failures are
/// logged and never reach the caller.
pub struct InvocationRunner {
    manager: TimeoutManager,
    sink: Arc<dyn ReportSink>,
    snapshot: Arc<dyn SnapshotProvider>,
}

impl InvocationRunner {
    pub fn new(sink: Arc<dyn ReportSink>, snapshot: Arc<dyn SnapshotProvider>) -> Self {
        Self {
            manager: TimeoutManager::new(Arc::clone(&sink), Arc::clone(&snapshot)),
            sink,
            snapshot,
        }
    }

    /// Runner delivering to the configured collector through `/proc` backed
    /// snapshots. The returned service must be spawned for reports to leave
    /// the process.
    pub fn from_config(config: &AgentConfig) -> (Self, DispatchService) {
        let (service, handle) = DispatchService::new(ReportFlusher::new(config));
        let runner = Self::new(Arc::new(handle), Arc::new(ProcSnapshotProvider::new()));
        (runner, service)
    }

    pub fn timeout_manager(&self) -> &TimeoutManager {
        &self.manager
    }

    /// Runs `handler` as the next attempt of `context`.
    ///
    /// The handler receives the attempt's [`Measurement`] to record marks and
    /// measures on. When it returns, the duration and any error are recorded
    /// and the report is sent, unless the watchdog already reported the
    /// context as timed out.
    pub async fn run<F, Fut, T, E>(
        &self,
        context: &Arc<InvocationContext>,
        handler: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Arc<Measurement>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error,
    {
        let measurement = Arc::new(Measurement::for_context(
            context,
            Arc::clone(&self.snapshot),
        ));
        if !context.config().enabled {
            return handler(measurement).await;
        }

        let attempt = context.next_attempt();
        let guard = if context.config().watchdog_enabled() {
            match self
                .manager
                .register(context, attempt, AttemptHandle::current())
            {
                Ok(()) => Some(AttemptGuard::new(&self.manager, context, attempt)),
                Err(e) => {
                    warn!(
                        "Attempt {attempt} of context {} runs unmonitored: {e}",
                        context.id()
                    );
                    None
                }
            }
        } else {
            None
        };

        let start = Instant::now();
        let result = handler(Arc::clone(&measurement)).await;
        let elapsed_ns = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
        measurement.set_duration(elapsed_ns);
        if let Err(e) = &result {
            measurement.set_thrown(ThrownError::from_error(e));
        }

        let timed_out = guard.is_some_and(AttemptGuard::finish);
        if timed_out {
            debug!(
                "Timeout already reported for context {}, skipping report of attempt {attempt}",
                context.id()
            );
            return result;
        }

        match measurement.build_request() {
            Ok(report) => {
                if let Err(e) = self.sink.send(report) {
                    warn!("Dropping report of attempt {attempt}: {e}");
                }
            }
            Err(e) => error!("Failed to build report of attempt {attempt}: {e}"),
        }
        result
    }
}

/// Finishes a registered attempt when it is abandoned: the handler panicked
/// or the `run` future was dropped before completing.
struct AttemptGuard<'a> {
    manager: &'a TimeoutManager,
    context: &'a InvocationContext,
    attempt: u32,
    armed: bool,
}

impl<'a> AttemptGuard<'a> {
    fn new(manager: &'a TimeoutManager, context: &'a InvocationContext, attempt: u32) -> Self {
        Self {
            manager,
            context,
            attempt,
            armed: true,
        }
    }

    /// Finishes the attempt on the normal path, returning whether a timeout
    /// was already reported for the context.
    fn finish(mut self) -> bool {
        self.armed = false;
        self.manager.finished(self.context, self.attempt)
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(
                "Attempt {} of context {} abandoned before completing",
                self.attempt,
                self.context.id()
            );
            self.manager.finished(self.context, self.attempt);
        }
    }
}
