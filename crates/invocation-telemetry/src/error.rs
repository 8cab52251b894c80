// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that can occur while monitoring invocations and building reports
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Could not build report: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Report delivery failed: {0}")]
    Delivery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}
