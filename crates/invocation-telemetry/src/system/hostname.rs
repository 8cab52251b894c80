// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection

use super::proc::read_first_line;
use std::env;
use tracing::warn;

const ETC_HOSTNAME_PATH: &str = "/etc/hostname";

/// Get the system hostname
///
/// Tried in order:
/// 1. First non-empty line of `/etc/hostname`, the most reliable source on Linux
/// 2. `HOSTNAME` environment variable
/// 3. `gethostname()`
/// 4. `"unknown"`
#[must_use]
pub fn get_hostname() -> String {
    if let Some(hostname) = read_first_line(ETC_HOSTNAME_PATH) {
        return hostname;
    }

    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.trim().is_empty() {
            return hostname.trim().to_string();
        }
    }

    if let Some(hostname) = system_hostname() {
        return hostname;
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname
            .to_str()
            .filter(|hostname| !hostname.is_empty())
            .map(str::to_string),
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}
