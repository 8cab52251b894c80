// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::TelemetryError;
use std::env;
use std::time::Duration;

const DEFAULT_COLLECTOR_URL: &str = "https://metrics-api.iopipe.com/v0/event";
const DEFAULT_INSTALL_METHOD: &str = "unknown";
const DEFAULT_TIMEOUT_WINDOW_MS: u64 = 150;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the invocation agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Whether invocations are instrumented at all
    pub enabled: bool,
    /// Project token, reported as `client_id`
    pub project_token: Option<String>,
    /// How the agent was installed, reported as `installMethod`
    pub install_method: String,
    /// Margin subtracted from the remaining time before a timeout is reported.
    /// A zero window disables the watchdog.
    pub timeout_window: Duration,
    /// Collector endpoint reports are POSTed to
    pub collector_url: String,
    /// Timeout for each delivery request
    pub request_timeout: Duration,
    /// HTTPS proxy URL
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            project_token: None,
            install_method: DEFAULT_INSTALL_METHOD.to_string(),
            timeout_window: Duration::from_millis(DEFAULT_TIMEOUT_WINDOW_MS),
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl AgentConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, TelemetryError> {
        let enabled = env::var("TELEMETRY_ENABLED")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(true);
        let project_token = env::var("TELEMETRY_TOKEN").ok();
        let install_method = env::var("TELEMETRY_INSTALL_METHOD")
            .unwrap_or_else(|_| DEFAULT_INSTALL_METHOD.to_string());
        let timeout_window = Duration::from_millis(
            env::var("TELEMETRY_TIMEOUT_WINDOW_MS")
                .ok()
                .and_then(|val| val.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_TIMEOUT_WINDOW_MS),
        );
        let collector_url = env::var("TELEMETRY_COLLECTOR_URL")
            .unwrap_or_else(|_| DEFAULT_COLLECTOR_URL.to_string());
        let request_timeout = Duration::from_millis(
            env::var("TELEMETRY_REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|val| val.trim().parse::<u64>().ok())
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        );
        let https_proxy = env::var("TELEMETRY_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        let log_level = env::var("TELEMETRY_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            enabled,
            project_token,
            install_method,
            timeout_window,
            collector_url,
            request_timeout,
            https_proxy,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TelemetryError> {
        if self.enabled
            && self
                .project_token
                .as_deref()
                .map_or(true, |token| token.trim().is_empty())
        {
            return Err(TelemetryError::InvalidConfig(
                "TELEMETRY_TOKEN must be set when the agent is enabled".to_string(),
            ));
        }

        if !self.collector_url.starts_with("https://") && !self.collector_url.starts_with("http://")
        {
            return Err(TelemetryError::InvalidConfig(format!(
                "Collector URL '{}' must use http or https",
                self.collector_url
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(TelemetryError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }

    /// Whether the timeout watchdog should monitor invocations
    pub fn watchdog_enabled(&self) -> bool {
        self.enabled && !self.timeout_window.is_zero()
    }

    /// The token reported as `client_id`, empty when unset
    pub fn client_id(&self) -> &str {
        self.project_token.as_deref().unwrap_or_default()
    }
}
