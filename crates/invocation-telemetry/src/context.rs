// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host invocation context and the monitored execution context built on it.

use crate::config::AgentConfig;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Information the host runtime exposes about the current invocation.
///
/// Identifiers are passed through verbatim into the `aws` section of reports.
pub trait LambdaContext: Send + Sync {
    fn function_name(&self) -> &str;
    fn function_version(&self) -> &str;
    fn aws_request_id(&self) -> &str;
    fn invoked_function_arn(&self) -> &str;
    fn log_group_name(&self) -> &str;
    fn log_stream_name(&self) -> &str;
    fn memory_limit_in_mb(&self) -> u32;

    /// Milliseconds left before the host forcibly terminates the invocation.
    fn remaining_time_millis(&self) -> i64;
}

/// Static metadata describing the invoked function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionMetadata {
    pub function_name: String,
    pub function_version: String,
    pub aws_request_id: String,
    pub invoked_function_arn: String,
    pub log_group_name: String,
    pub log_stream_name: String,
    pub memory_limit_in_mb: u32,
}

/// [`LambdaContext`] backed by a fixed deadline.
#[derive(Debug, Clone)]
pub struct DeadlineContext {
    metadata: FunctionMetadata,
    deadline: Instant,
}

impl DeadlineContext {
    pub fn new(metadata: FunctionMetadata, deadline: Instant) -> Self {
        Self { metadata, deadline }
    }

    /// Deadline `timeout` from now.
    pub fn with_timeout(metadata: FunctionMetadata, timeout: Duration) -> Self {
        Self::new(metadata, Instant::now() + timeout)
    }

    /// Deadline given as milliseconds since the Unix epoch, the format of the
    /// `Lambda-Runtime-Deadline-Ms` header.
    pub fn from_epoch_deadline_ms(metadata: FunctionMetadata, deadline_ms: u64) -> Self {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        Self::with_timeout(
            metadata,
            Duration::from_millis(deadline_ms.saturating_sub(now_ms)),
        )
    }

    pub fn metadata(&self) -> &FunctionMetadata {
        &self.metadata
    }
}

impl LambdaContext for DeadlineContext {
    fn function_name(&self) -> &str {
        &self.metadata.function_name
    }

    fn function_version(&self) -> &str {
        &self.metadata.function_version
    }

    fn aws_request_id(&self) -> &str {
        &self.metadata.aws_request_id
    }

    fn invoked_function_arn(&self) -> &str {
        &self.metadata.invoked_function_arn
    }

    fn log_group_name(&self) -> &str {
        &self.metadata.log_group_name
    }

    fn log_stream_name(&self) -> &str {
        &self.metadata.log_stream_name
    }

    fn memory_limit_in_mb(&self) -> u32 {
        self.metadata.memory_limit_in_mb
    }

    fn remaining_time_millis(&self) -> i64 {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Opaque identity of an [`InvocationContext`]. Two contexts never share an
/// id, whatever their contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One monitored execution session. A context may be reused for several
/// attempts, sequentially or overlapping.
pub struct InvocationContext {
    id: ContextId,
    config: Arc<AgentConfig>,
    lambda: Arc<dyn LambdaContext>,
    // Shared with the context's timeout monitor, if any.
    timed_out: Arc<AtomicBool>,
    attempts: AtomicU32,
}

impl InvocationContext {
    pub fn new(config: Arc<AgentConfig>, lambda: Arc<dyn LambdaContext>) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::next(),
            config,
            lambda,
            timed_out: Arc::new(AtomicBool::new(false)),
            attempts: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &Arc<AgentConfig> {
        &self.config
    }

    pub fn lambda(&self) -> &Arc<dyn LambdaContext> {
        &self.lambda
    }

    /// Allocates the next attempt sequence number, starting at 1.
    pub fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Whether a timeout report was generated for this context.
    pub fn timeout_reported(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    pub(crate) fn timeout_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.timed_out)
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("id", &self.id)
            .field("function_name", &self.lambda.function_name())
            .field("aws_request_id", &self.lambda.aws_request_id())
            .finish()
    }
}
