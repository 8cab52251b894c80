// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use invocation_telemetry::config::AgentConfig;
use invocation_telemetry::context::{DeadlineContext, FunctionMetadata, InvocationContext};
use invocation_telemetry::dispatch::ReportSink;
use invocation_telemetry::report::Report;
use invocation_telemetry::system::{CpuTimes, SnapshotProvider, SystemSnapshot};
use invocation_telemetry::TelemetryError;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Collects every report it is given.
#[derive(Default)]
pub struct CollectingSink {
    reports: Mutex<Vec<Report>>,
}

impl CollectingSink {
    pub fn bodies(&self) -> Vec<Value> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|report| serde_json::from_str(report.as_str()).expect("report is JSON"))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap().len()
    }
}

impl ReportSink for CollectingSink {
    fn send(&self, report: Report) -> Result<(), TelemetryError> {
        self.reports.lock().unwrap().push(report);
        Ok(())
    }
}

pub struct FixedSnapshot;

impl SnapshotProvider for FixedSnapshot {
    fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            pid: 7,
            hostname: "sandbox".to_string(),
            boot_id: "boot-1".to_string(),
            total_mem_kib: 1024,
            free_mem_kib: 256,
            cpus: vec![CpuTimes::default(); 2],
            linux: None,
        }
    }
}

pub fn config(window: Duration) -> Arc<AgentConfig> {
    Arc::new(AgentConfig {
        project_token: Some("project-token".to_string()),
        install_method: "manual".to_string(),
        timeout_window: window,
        ..Default::default()
    })
}

pub fn context(timeout: Duration, window: Duration) -> Arc<InvocationContext> {
    let lambda = DeadlineContext::with_timeout(
        FunctionMetadata {
            function_name: "checkout".to_string(),
            function_version: "$LATEST".to_string(),
            aws_request_id: "5f1b2c4e-request".to_string(),
            invoked_function_arn: "arn:aws:lambda:us-east-1:000000000000:function:checkout"
                .to_string(),
            log_group_name: "/aws/lambda/checkout".to_string(),
            log_stream_name: "2024/01/01/[$LATEST]0123".to_string(),
            memory_limit_in_mb: 128,
        },
        timeout,
    );
    InvocationContext::new(config(window), Arc::new(lambda))
}

/// Lets spawned monitors observe an advanced clock.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
