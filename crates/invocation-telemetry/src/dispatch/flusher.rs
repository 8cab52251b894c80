// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::AgentConfig;
use crate::error::TelemetryError;
use crate::http::get_client;
use crate::report::Report;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// POSTs reports to the collector endpoint.
#[derive(Debug, Clone)]
pub struct ReportFlusher {
    client: reqwest::Client,
    collector_url: String,
}

impl ReportFlusher {
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_client(get_client(config), config.collector_url.clone())
    }

    pub fn with_client(client: reqwest::Client, collector_url: impl Into<String>) -> Self {
        Self {
            client,
            collector_url: collector_url.into(),
        }
    }

    pub fn collector_url(&self) -> &str {
        &self.collector_url
    }

    /// Sends one report. Any non-2xx answer is a delivery failure.
    pub async fn flush(&self, report: Report) -> Result<(), TelemetryError> {
        let size = report.len();
        let start = tokio::time::Instant::now();

        let response = self
            .client
            .post(&self.collector_url)
            .header(CONTENT_TYPE, "application/json")
            .body(report.into_bytes())
            .send()
            .await
            .map_err(|e| TelemetryError::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Delivery(format!(
                "collector answered {status}: {body}"
            )));
        }

        debug!(
            "Delivered report of {size} bytes in {}ms",
            start.elapsed().as_millis()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DeadlineContext, FunctionMetadata};
    use crate::report::ReportParts;
    use crate::system::SystemSnapshot;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn report() -> Report {
        let config = AgentConfig {
            project_token: Some("token".to_string()),
            ..Default::default()
        };
        let lambda =
            DeadlineContext::with_timeout(FunctionMetadata::default(), Duration::from_secs(1));
        Report::build(ReportParts {
            config: &config,
            lambda: &lambda,
            snapshot: &SystemSnapshot::default(),
            duration_ns: Some(7),
            thrown: None,
            cold_start: false,
            entries: &[],
        })
        .unwrap()
    }

    fn flusher(url: String) -> ReportFlusher {
        let config = AgentConfig {
            collector_url: url,
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        ReportFlusher::new(&config)
    }

    #[tokio::test]
    async fn test_flush_posts_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v0/event")
            .match_header("Content-Type", "application/json")
            .match_body(Matcher::PartialJsonString(
                r#"{"client_id":"token","duration":7}"#.to_string(),
            ))
            .with_status(202)
            .create_async()
            .await;

        let flusher = flusher(format!("{}/v0/event", server.url()));
        flusher.flush(report()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_flush_reports_rejection() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v0/event")
            .with_status(401)
            .with_body("bad token")
            .expect(1)
            .create_async()
            .await;

        let flusher = flusher(format!("{}/v0/event", server.url()));
        let result = flusher.flush(report()).await;
        match result {
            Err(TelemetryError::Delivery(message)) => {
                assert!(message.contains("401"));
                assert!(message.contains("bad token"));
            }
            other => panic!("expected delivery failure, got {other:?}"),
        }
        // No retry.
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_flush_unreachable_collector() {
        let flusher = flusher("http://127.0.0.1:1/v0/event".to_string());
        let result = flusher.flush(report()).await;
        assert!(matches!(result, Err(TelemetryError::Delivery(_))));
    }
}
