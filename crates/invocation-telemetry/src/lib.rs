// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Invocation Telemetry
//!
//! Instrumentation for serverless function invocations that run under a hard
//! wall-clock deadline imposed by the host.
//!
//! ## Overview
//!
//! The crate has two halves:
//! - **Timeout watchdog** ([`timeout`]): one monitoring task per active
//!   [`context::InvocationContext`]. When the host deadline minus a safety
//!   window elapses while attempts are still running, a timeout report is
//!   produced for every outstanding attempt, exactly once per context.
//! - **Report pipeline** ([`measurement`], [`performance`], [`report`]):
//!   accumulates duration, thrown error, cold start and performance entries
//!   for one execution and seals them into a serialized [`report::Report`].
//!
//! Around the core sit the collaborators a complete agent needs:
//! - [`system`]: `/proc` backed environment snapshots
//! - [`dispatch`]: the sink reports are handed to, and the HTTP flusher behind it
//! - [`runner`]: wraps a handler with register/finished/report
//! - [`config`] and [`logger`]: environment configuration and log formatting

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod cold_start;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod logger;
pub mod measurement;
pub mod performance;
pub mod report;
pub mod runner;
pub mod system;
pub mod timeout;

pub use error::TelemetryError;

/// Version reported in `environment.agent.version`.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime reported in `environment.agent.runtime`.
pub const AGENT_RUNTIME: &str = "rust";
