// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::flusher::ReportFlusher;
use super::ReportSink;
use crate::error::TelemetryError;
use crate::report::Report;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

#[derive(Debug)]
pub enum DispatchCommand {
    Send(Report),
    /// Answered once every report queued before it has been handled.
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<DispatchCommand>,
}

impl DispatchHandle {
    pub async fn flush(&self) -> Result<(), String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(DispatchCommand::Flush(response_tx))
            .map_err(|e| format!("Failed to send flush command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive flush response: {}", e))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<DispatchCommand>> {
        self.tx.send(DispatchCommand::Shutdown)
    }
}

impl ReportSink for DispatchHandle {
    fn send(&self, report: Report) -> Result<(), TelemetryError> {
        self.tx
            .send(DispatchCommand::Send(report))
            .map_err(|_| TelemetryError::Delivery("dispatch service stopped".to_string()))
    }
}

/// Delivers queued reports one at a time, in the order they were sent.
pub struct DispatchService {
    flusher: ReportFlusher,
    rx: mpsc::UnboundedReceiver<DispatchCommand>,
}

impl DispatchService {
    pub fn new(flusher: ReportFlusher) -> (Self, DispatchHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { flusher, rx }, DispatchHandle { tx })
    }

    pub async fn run(mut self) {
        debug!(
            "Dispatch service started, delivering to {}",
            self.flusher.collector_url()
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                DispatchCommand::Send(report) => {
                    if let Err(e) = self.flusher.flush(report).await {
                        error!("Dropping report: {e}");
                    }
                }

                DispatchCommand::Flush(response_tx) => {
                    if response_tx.send(()).is_err() {
                        error!("Failed to send flush response - receiver dropped");
                    }
                }

                DispatchCommand::Shutdown => {
                    debug!("Dispatch service shutting down");
                    break;
                }
            }
        }

        debug!("Dispatch service stopped");
    }
}
