// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client used to deliver reports to the collector.
//!
//! The client uses rustls, honours the configured HTTPS proxy and applies the
//! configured per-request timeout. An invalid proxy is logged and the client
//! falls back to a direct connection, so a bad proxy setting never disables
//! delivery entirely.

use crate::config::AgentConfig;
use reqwest::ClientBuilder;
use std::error::Error;
use std::time::Duration;
use tracing::error;

/// Client builder with rustls TLS.
pub fn create_reqwest_client_builder() -> ClientBuilder {
    reqwest::Client::builder().use_rustls_tls()
}

/// Builds a client with an optional HTTPS proxy and a request timeout.
pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut builder = create_reqwest_client_builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    Ok(builder.build()?)
}

#[must_use]
pub fn get_client(config: &AgentConfig) -> reqwest::Client {
    match build_client(config.https_proxy.as_deref(), config.request_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(None, config.request_timeout) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_client_with_proxy() {
        let client = build_client(Some("http://proxy.internal:3128"), Duration::from_secs(1));
        assert!(client.is_ok());
    }

    #[test]
    fn test_build_client_rejects_invalid_proxy() {
        let client = build_client(Some("http://[::1"), Duration::from_secs(1));
        assert!(client.is_err());
    }

    #[test]
    fn test_get_client_falls_back_without_proxy() {
        let config = AgentConfig {
            https_proxy: Some("http://[::1".to_string()),
            ..Default::default()
        };
        // Must not panic; the proxy is dropped instead.
        let _client = get_client(&config);
    }
}
