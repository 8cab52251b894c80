// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire shape of a report and the sealed [`Report`] itself.
//!
//! Field order follows struct declaration order, so the same state always
//! serializes to the same bytes (apart from the build timestamps).

use crate::config::AgentConfig;
use crate::context::LambdaContext;
use crate::error::TelemetryError;
use crate::measurement::ThrownError;
use crate::performance::PerformanceEntry;
use crate::system::{self, CpuTimes, LinuxProcess, ProcessStatus, ProcessTimes, SystemSnapshot};
use crate::{AGENT_RUNTIME, AGENT_VERSION};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;

const TRACE_ID_ENV: &str = "_X_AMZN_TRACE_ID";

/// A sealed, serialized report ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    body: String,
}

impl Report {
    pub fn as_str(&self) -> &str {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.body.into_bytes()
    }

    pub(crate) fn build(parts: ReportParts<'_>) -> Result<Self, TelemetryError> {
        let body = serde_json::to_string(&Payload::from_parts(parts))?;
        Ok(Self { body })
    }
}

/// State captured from a measurement at build time.
pub(crate) struct ReportParts<'a> {
    pub config: &'a AgentConfig,
    pub lambda: &'a dyn LambdaContext,
    pub snapshot: &'a SystemSnapshot,
    pub duration_ns: Option<u64>,
    pub thrown: Option<&'a ThrownError>,
    pub cold_start: bool,
    pub entries: &'a [PerformanceEntry],
}

#[derive(Serialize)]
struct Payload<'a> {
    client_id: &'a str,
    #[serde(rename = "installMethod")]
    install_method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<u64>,
    #[serde(rename = "processId")]
    process_id: u32,
    timestamp: u64,
    #[serde(rename = "timestampEnd")]
    timestamp_end: u64,
    aws: Aws<'a>,
    environment: Environment<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Errors<'a>>,
    coldstart: bool,
    #[serde(rename = "performanceEntries", skip_serializing_if = "Vec::is_empty")]
    performance_entries: Vec<Entry<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Aws<'a> {
    function_name: &'a str,
    function_version: &'a str,
    aws_request_id: &'a str,
    invoked_function_arn: &'a str,
    log_group_name: &'a str,
    log_stream_name: &'a str,
    #[serde(rename = "memoryLimitInMB")]
    memory_limit_in_mb: u32,
    #[serde(rename = "getRemainingTimeInMillis")]
    remaining_time_in_millis: i64,
    trace_id: String,
}

#[derive(Serialize)]
struct Environment<'a> {
    agent: Agent,
    java: BTreeMap<&'static str, String>,
    host: Host<'a>,
    os: Os<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    linux: Option<Linux>,
}

#[derive(Serialize)]
struct Agent {
    runtime: &'static str,
    version: &'static str,
    load_time: u64,
}

#[derive(Serialize)]
struct Host<'a> {
    boot_id: &'a str,
}

#[derive(Serialize)]
struct Os<'a> {
    hostname: &'a str,
    totalmem: u64,
    freemem: u64,
    usedmem: u64,
    cpus: Vec<Cpu>,
}

#[derive(Serialize)]
struct Cpu {
    times: CpuTimes,
}

#[derive(Serialize)]
struct Linux {
    pid: Pid,
}

#[derive(Serialize)]
struct Pid {
    #[serde(rename = "self")]
    current: ProcessStats,
}

#[derive(Serialize)]
struct ProcessStats {
    stat: ProcessTimes,
    stat_start: ProcessTimes,
    status: ProcessStatus,
}

#[derive(Serialize)]
struct Errors<'a> {
    stack: &'a str,
    name: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Entry<'a> {
    name: &'a str,
    start_time: u64,
    duration: u64,
    entry_type: &'static str,
    timestamp: u64,
}

impl<'a> Payload<'a> {
    fn from_parts(parts: ReportParts<'a>) -> Self {
        let ReportParts {
            config,
            lambda,
            snapshot,
            duration_ns,
            thrown,
            cold_start,
            entries,
        } = parts;
        let load_time = system::load_time_millis();
        let now = system::epoch_millis();

        Self {
            client_id: config.client_id(),
            install_method: &config.install_method,
            duration: duration_ns,
            process_id: snapshot.pid,
            timestamp: load_time,
            timestamp_end: now,
            aws: Aws {
                function_name: lambda.function_name(),
                function_version: lambda.function_version(),
                aws_request_id: lambda.aws_request_id(),
                invoked_function_arn: lambda.invoked_function_arn(),
                log_group_name: lambda.log_group_name(),
                log_stream_name: lambda.log_stream_name(),
                memory_limit_in_mb: lambda.memory_limit_in_mb(),
                remaining_time_in_millis: lambda.remaining_time_millis(),
                trace_id: env::var(TRACE_ID_ENV).unwrap_or_else(|_| "unknown".to_string()),
            },
            environment: Environment {
                agent: Agent {
                    runtime: AGENT_RUNTIME,
                    version: AGENT_VERSION,
                    load_time,
                },
                java: runtime_properties(),
                host: Host {
                    boot_id: &snapshot.boot_id,
                },
                os: Os {
                    hostname: &snapshot.hostname,
                    totalmem: snapshot.total_mem_kib,
                    freemem: snapshot.free_mem_kib,
                    usedmem: snapshot.used_mem_kib(),
                    cpus: snapshot.cpus.iter().map(|&times| Cpu { times }).collect(),
                },
                linux: snapshot.linux.map(|LinuxProcess { stat, stat_start, status }| Linux {
                    pid: Pid {
                        current: ProcessStats {
                            stat,
                            stat_start,
                            status,
                        },
                    },
                }),
            },
            errors: thrown.map(|thrown| Errors {
                stack: thrown.stack(),
                name: thrown.name(),
                message: thrown.message().unwrap_or_default(),
            }),
            coldstart: cold_start,
            performance_entries: entries
                .iter()
                .map(|entry| Entry {
                    name: entry.name(),
                    start_time: entry.start_time_millis(),
                    duration: entry.duration_millis(),
                    entry_type: entry.entry_type().as_str(),
                    timestamp: now,
                })
                .collect(),
        }
    }
}

/// Runtime properties the collector expects under `environment.java`.
fn runtime_properties() -> BTreeMap<&'static str, String> {
    let os_name = match env::consts::OS {
        "linux" => "Linux",
        "macos" => "Mac OS X",
        "windows" => "Windows",
        other => other,
    };
    let path_separator = if cfg!(windows) { ";" } else { ":" };

    BTreeMap::from([
        ("os.name", os_name.to_string()),
        ("os.arch", env::consts::ARCH.to_string()),
        ("os.version", system::os_release().to_string()),
        ("file.separator", std::path::MAIN_SEPARATOR.to_string()),
        ("path.separator", path_separator.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeadlineContext, FunctionMetadata};
    use crate::performance::EntryType;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn lambda() -> DeadlineContext {
        DeadlineContext::with_timeout(
            FunctionMetadata {
                function_name: "checkout".to_string(),
                function_version: "7".to_string(),
                aws_request_id: "req-1".to_string(),
                invoked_function_arn: "arn:aws:lambda:us-east-1:123:function:checkout".to_string(),
                log_group_name: "/aws/lambda/checkout".to_string(),
                log_stream_name: "2024/01/01/[7]abc".to_string(),
                memory_limit_in_mb: 512,
            },
            Duration::from_secs(30),
        )
    }

    fn snapshot() -> SystemSnapshot {
        SystemSnapshot {
            pid: 31,
            hostname: "sandbox".to_string(),
            boot_id: "boot-1".to_string(),
            total_mem_kib: 4000,
            free_mem_kib: 1000,
            cpus: vec![CpuTimes {
                idle: 5,
                irq: 4,
                sys: 3,
                user: 2,
                nice: 1,
            }],
            linux: Some(LinuxProcess {
                stat: ProcessTimes {
                    utime: 9,
                    stime: 8,
                    cutime: 0,
                    cstime: 0,
                },
                stat_start: ProcessTimes::default(),
                status: ProcessStatus {
                    vm_rss_kib: 100,
                    threads: 3,
                    fd_size: 64,
                },
            }),
        }
    }

    fn build(parts: ReportParts<'_>) -> Value {
        let report = Report::build(parts).unwrap();
        serde_json::from_str(report.as_str()).unwrap()
    }

    #[test]
    fn test_full_report_shape() {
        let config = AgentConfig {
            project_token: Some("token".to_string()),
            install_method: "layer".to_string(),
            ..Default::default()
        };
        let lambda = lambda();
        let snapshot = snapshot();
        let thrown = ThrownError::new("Boom", Some("it broke".to_string()), "Boom: it broke");
        let entries = vec![PerformanceEntry::new(
            "db",
            5_000_000_000,
            3_000_000,
            EntryType::Measure,
        )];

        let body = build(ReportParts {
            config: &config,
            lambda: &lambda,
            snapshot: &snapshot,
            duration_ns: Some(42),
            thrown: Some(&thrown),
            cold_start: true,
            entries: &entries,
        });

        assert_eq!(body["client_id"], "token");
        assert_eq!(body["installMethod"], "layer");
        assert_eq!(body["duration"], 42);
        assert_eq!(body["processId"], 31);
        assert!(body["timestampEnd"].as_u64().unwrap() >= body["timestamp"].as_u64().unwrap());

        let aws = &body["aws"];
        assert_eq!(aws["functionName"], "checkout");
        assert_eq!(aws["functionVersion"], "7");
        assert_eq!(aws["awsRequestId"], "req-1");
        assert_eq!(aws["invokedFunctionArn"], "arn:aws:lambda:us-east-1:123:function:checkout");
        assert_eq!(aws["logGroupName"], "/aws/lambda/checkout");
        assert_eq!(aws["logStreamName"], "2024/01/01/[7]abc");
        assert_eq!(aws["memoryLimitInMB"], 512);
        assert!(aws["getRemainingTimeInMillis"].as_i64().unwrap() > 0);
        assert!(aws["traceId"].is_string());

        let environment = &body["environment"];
        assert_eq!(environment["agent"]["runtime"], "rust");
        assert_eq!(environment["agent"]["version"], AGENT_VERSION);
        assert_eq!(environment["agent"]["load_time"], body["timestamp"]);
        assert!(environment["java"]["os.arch"].is_string());
        assert_eq!(environment["host"]["boot_id"], "boot-1");
        assert_eq!(
            environment["os"],
            json!({
                "hostname": "sandbox",
                "totalmem": 4000,
                "freemem": 1000,
                "usedmem": 3000,
                "cpus": [{"times": {"idle": 5, "irq": 4, "sys": 3, "user": 2, "nice": 1}}],
            })
        );
        assert_eq!(
            environment["linux"],
            json!({"pid": {"self": {
                "stat": {"utime": 9, "stime": 8, "cutime": 0, "cstime": 0},
                "stat_start": {"utime": 0, "stime": 0, "cutime": 0, "cstime": 0},
                "status": {"VmRSS": 100, "Threads": 3, "FDSize": 64},
            }}})
        );

        assert_eq!(
            body["errors"],
            json!({"stack": "Boom: it broke", "name": "Boom", "message": "it broke"})
        );
        assert_eq!(body["coldstart"], true);

        let entry = &body["performanceEntries"][0];
        assert_eq!(entry["name"], "db");
        assert_eq!(entry["startTime"], 5000);
        assert_eq!(entry["duration"], 3);
        assert_eq!(entry["entryType"], "measure");
        assert_eq!(entry["timestamp"], body["timestampEnd"]);
    }

    #[test]
    fn test_optional_sections_are_omitted() {
        let config = AgentConfig::default();
        let lambda = lambda();
        let snapshot = SystemSnapshot::default();

        let body = build(ReportParts {
            config: &config,
            lambda: &lambda,
            snapshot: &snapshot,
            duration_ns: None,
            thrown: None,
            cold_start: false,
            entries: &[],
        });

        let object = body.as_object().unwrap();
        for key in ["duration", "errors", "performanceEntries"] {
            assert!(!object.contains_key(key), "{key} should be omitted");
        }
        assert!(body["environment"].get("linux").is_none());
        assert_eq!(body["client_id"], "");
        assert_eq!(body["coldstart"], false);
    }

    #[test]
    fn test_top_level_field_order() {
        let config = AgentConfig::default();
        let lambda = lambda();
        let snapshot = SystemSnapshot::default();

        let report = Report::build(ReportParts {
            config: &config,
            lambda: &lambda,
            snapshot: &snapshot,
            duration_ns: Some(1),
            thrown: None,
            cold_start: false,
            entries: &[],
        })
        .unwrap();

        let body = report.as_str();
        let position = |key: &str| body.find(&format!("\"{key}\":")).unwrap();
        let order = [
            "client_id",
            "installMethod",
            "duration",
            "processId",
            "timestamp",
            "timestampEnd",
            "aws",
            "environment",
            "coldstart",
        ];
        assert!(order.windows(2).all(|pair| position(pair[0]) < position(pair[1])));
    }
}
