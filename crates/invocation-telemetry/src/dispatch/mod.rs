// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of sealed reports.
//!
//! Producers hand reports to a [`ReportSink`]. The production sink is a
//! [`DispatchHandle`] feeding a [`DispatchService`], which POSTs each report to
//! the collector through a [`ReportFlusher`]. Delivery is a single attempt:
//! failures are logged and the report is dropped.

pub mod flusher;
pub mod service;

pub use flusher::ReportFlusher;
pub use service::{DispatchCommand, DispatchHandle, DispatchService};

use crate::error::TelemetryError;
use crate::report::Report;

/// Receives sealed reports for delivery.
pub trait ReportSink: Send + Sync {
    fn send(&self, report: Report) -> Result<(), TelemetryError>;
}
