// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment snapshots polled once per report.
//!
//! Facts that cannot change while the process lives (hostname, boot id,
//! kernel release, agent load time) are read once and cached. Everything else
//! is read fresh on every [`SnapshotProvider::snapshot`] call.

pub mod clock;
pub mod hostname;
pub mod proc;

use serde::Serialize;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Time spent by one CPU in each mode, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuTimes {
    pub idle: u64,
    pub irq: u64,
    pub sys: u64,
    pub user: u64,
    pub nice: u64,
}

/// CPU times of the current process, in clock ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessTimes {
    pub utime: u64,
    pub stime: u64,
    pub cutime: u64,
    pub cstime: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    #[serde(rename = "VmRSS")]
    pub vm_rss_kib: u64,
    #[serde(rename = "Threads")]
    pub threads: u64,
    #[serde(rename = "FDSize")]
    pub fd_size: u64,
}

/// Per-process statistics, only available where `/proc` exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinuxProcess {
    pub stat: ProcessTimes,
    /// Process times when the provider was created.
    pub stat_start: ProcessTimes,
    pub status: ProcessStatus,
}

/// Everything a report needs to know about the machine it was built on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemSnapshot {
    pub pid: u32,
    pub hostname: String,
    pub boot_id: String,
    pub total_mem_kib: u64,
    pub free_mem_kib: u64,
    pub cpus: Vec<CpuTimes>,
    pub linux: Option<LinuxProcess>,
}

impl SystemSnapshot {
    pub fn used_mem_kib(&self) -> u64 {
        self.total_mem_kib.saturating_sub(self.free_mem_kib)
    }
}

/// Source of environment snapshots. Polled once per report build.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> SystemSnapshot;
}

/// Reads the snapshot from `/proc`. Fields that cannot be read are left at
/// their defaults and logged at debug level.
#[derive(Debug, Clone)]
pub struct ProcSnapshotProvider {
    stat_start: Option<ProcessTimes>,
}

impl ProcSnapshotProvider {
    pub fn new() -> Self {
        let stat_start = proc::get_process_times()
            .map_err(|e| debug!("Could not read initial process times: {e}"))
            .ok();
        Self { stat_start }
    }
}

impl Default for ProcSnapshotProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for ProcSnapshotProvider {
    fn snapshot(&self) -> SystemSnapshot {
        let (total_mem_kib, free_mem_kib) = proc::get_memory_kib().unwrap_or_else(|e| {
            debug!("Could not read memory info: {e}");
            (0, 0)
        });
        let cpus = proc::get_cpu_times().unwrap_or_else(|e| {
            debug!("Could not read CPU times: {e}");
            Vec::new()
        });

        let linux = match (proc::get_process_times(), proc::get_process_status()) {
            (Ok(stat), Ok(status)) => Some(LinuxProcess {
                stat,
                stat_start: self.stat_start.unwrap_or_default(),
                status,
            }),
            (Err(e), _) | (_, Err(e)) => {
                debug!("Process statistics unavailable: {e}");
                None
            }
        };

        SystemSnapshot {
            pid: std::process::id(),
            hostname: cached_hostname().to_string(),
            boot_id: boot_id().to_string(),
            total_mem_kib,
            free_mem_kib,
            cpus,
            linux,
        }
    }
}

fn cached_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(hostname::get_hostname)
}

/// Unique id of the current boot, empty when unknown.
pub fn boot_id() -> &'static str {
    static BOOT_ID: OnceLock<String> = OnceLock::new();
    BOOT_ID.get_or_init(|| proc::read_first_line(proc::PROC_BOOT_ID_PATH).unwrap_or_default())
}

/// Kernel release, empty when unknown.
pub fn os_release() -> &'static str {
    static OS_RELEASE: OnceLock<String> = OnceLock::new();
    OS_RELEASE
        .get_or_init(|| proc::read_first_line(proc::PROC_OSRELEASE_PATH).unwrap_or_default())
}

/// Milliseconds since the Unix epoch at which the agent was first used by this
/// process.
pub fn load_time_millis() -> u64 {
    static LOAD_TIME: OnceLock<u64> = OnceLock::new();
    *LOAD_TIME.get_or_init(epoch_millis)
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
