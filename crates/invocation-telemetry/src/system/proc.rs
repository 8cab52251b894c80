// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `/proc` parsing for the environment snapshot.
//!
//! # Files read
//!
//! ```text
//! /proc/
//!   ├── meminfo                 # MemTotal / MemFree (kB)
//!   ├── stat                    # per-CPU times (clock ticks)
//!   ├── self/stat               # utime, stime, cutime, cstime (clock ticks)
//!   ├── self/status             # VmRSS, Threads, FDSize
//!   └── sys/kernel/
//!       ├── osrelease           # kernel version
//!       └── random/boot_id      # unique per boot
//! ```
//!
//! Every reader has a `_from_path` variant so the parsing can be exercised
//! against fixture files.

use super::clock::{get_clk_tck, DEFAULT_CLK_TCK};
use super::{CpuTimes, ProcessStatus, ProcessTimes};
use std::fs;
use std::io;
use tracing::debug;

pub const PROC_MEMINFO_PATH: &str = "/proc/meminfo";
pub const PROC_STAT_PATH: &str = "/proc/stat";
pub const PROC_SELF_STAT_PATH: &str = "/proc/self/stat";
pub const PROC_SELF_STATUS_PATH: &str = "/proc/self/status";
pub const PROC_OSRELEASE_PATH: &str = "/proc/sys/kernel/osrelease";
pub const PROC_BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// First non-empty line of the file, trimmed. `None` if the file cannot be
/// read or only has blank lines.
pub fn read_first_line(path: &str) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Total and free memory in KiB.
pub fn get_memory_kib() -> Result<(u64, u64), io::Error> {
    get_memory_kib_from_path(PROC_MEMINFO_PATH)
}

fn get_memory_kib_from_path(path: &str) -> Result<(u64, u64), io::Error> {
    let contents = fs::read_to_string(path)?;

    let mut total = None;
    let mut free = None;
    for line in contents.lines() {
        if let Some(value) = line.strip_prefix("MemTotal:") {
            total = parse_kib(value);
        } else if let Some(value) = line.strip_prefix("MemFree:") {
            free = parse_kib(value);
        }
    }

    match (total, free) {
        (Some(total), Some(free)) => Ok((total, free)),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("MemTotal/MemFree not found in {path}"),
        )),
    }
}

/// Parses values like `"   16303572 kB"`.
fn parse_kib(value: &str) -> Option<u64> {
    value.split_whitespace().next()?.parse().ok()
}

/// Per-CPU times from `/proc/stat`, in milliseconds.
pub fn get_cpu_times() -> Result<Vec<CpuTimes>, io::Error> {
    let clk_tck = get_clk_tck().unwrap_or_else(|e| {
        debug!("{e}, assuming {DEFAULT_CLK_TCK} ticks per second");
        DEFAULT_CLK_TCK
    });
    get_cpu_times_from_path(PROC_STAT_PATH, clk_tck)
}

/// ```text
/// cpu  2337 0 188 17838 0 0 0 0 0 0
/// cpu0 1188 0 94 9188 0 0 0 0 0 0
/// ```
///
/// Columns after the label: user, nice, system, idle, iowait, irq, ... The
/// aggregate `cpu` line is skipped.
fn get_cpu_times_from_path(path: &str, clk_tck: u64) -> Result<Vec<CpuTimes>, io::Error> {
    let contents = fs::read_to_string(path)?;
    let clk_tck = clk_tck.max(1);
    let to_ms = |ticks: u64| ticks.saturating_mul(1000) / clk_tck;

    let mut cpus = Vec::new();
    for line in contents.lines() {
        let mut values = line.split_whitespace();
        let Some(label) = values.next() else {
            continue;
        };
        let is_core = label
            .strip_prefix("cpu")
            .is_some_and(|index| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()));
        if !is_core {
            continue;
        }

        let ticks: Vec<u64> = values.filter_map(|s| s.parse().ok()).collect();
        if ticks.len() < 6 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Malformed {label} line in {path}"),
            ));
        }

        cpus.push(CpuTimes {
            user: to_ms(ticks[0]),
            nice: to_ms(ticks[1]),
            sys: to_ms(ticks[2]),
            idle: to_ms(ticks[3]),
            irq: to_ms(ticks[5]),
        });
    }

    if cpus.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("No per-core CPU data in {path}"),
        ));
    }
    Ok(cpus)
}

/// CPU times of this process, in clock ticks.
pub fn get_process_times() -> Result<ProcessTimes, io::Error> {
    get_process_times_from_path(PROC_SELF_STAT_PATH)
}

/// The command name may contain spaces and parentheses, so fields are counted
/// from the last `)`. After it, `state` is index 0 and `utime` index 11.
fn get_process_times_from_path(path: &str) -> Result<ProcessTimes, io::Error> {
    let contents = fs::read_to_string(path)?;
    let invalid = || {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Malformed process stat in {path}"),
        )
    };

    let after_comm = contents
        .rfind(')')
        .map(|idx| &contents[idx + 1..])
        .ok_or_else(invalid)?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let field = |idx: usize| -> Result<u64, io::Error> {
        fields
            .get(idx)
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)
    };

    Ok(ProcessTimes {
        utime: field(11)?,
        stime: field(12)?,
        cutime: field(13)?,
        cstime: field(14)?,
    })
}

/// Resident memory, thread count and file descriptor table size of this
/// process.
pub fn get_process_status() -> Result<ProcessStatus, io::Error> {
    get_process_status_from_path(PROC_SELF_STATUS_PATH)
}

fn get_process_status_from_path(path: &str) -> Result<ProcessStatus, io::Error> {
    let contents = fs::read_to_string(path)?;

    let mut status = ProcessStatus::default();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.split_whitespace().next().and_then(|v| v.parse().ok());
        match (key, value) {
            ("VmRSS", Some(v)) => status.vm_rss_kib = v,
            ("Threads", Some(v)) => status.threads = v,
            ("FDSize", Some(v)) => status.fd_size = v,
            _ => {}
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create fixture");
        file.write_all(contents.as_bytes())
            .expect("failed to write fixture");
        file
    }

    fn path(file: &NamedTempFile) -> &str {
        file.path().to_str().expect("non utf-8 temp path")
    }

    #[test]
    fn test_read_first_line_skips_blank_lines() {
        let file = fixture("\n   \n  6c2b1e0a-boot  \nsecond\n");
        assert_eq!(
            read_first_line(path(&file)),
            Some("6c2b1e0a-boot".to_string())
        );

        let blank = fixture("\n\n");
        assert_eq!(read_first_line(path(&blank)), None);
        assert_eq!(read_first_line("/does/not/exist"), None);
    }

    #[test]
    fn test_memory_kib() {
        let file = fixture(
            "MemTotal:       16303572 kB\nMemFree:         1034284 kB\nMemAvailable:   9817416 kB\n",
        );
        assert_eq!(
            get_memory_kib_from_path(path(&file)).unwrap(),
            (16303572, 1034284)
        );

        let missing = fixture("MemTotal:       16303572 kB\n");
        assert!(get_memory_kib_from_path(path(&missing)).is_err());
    }

    #[test]
    fn test_cpu_times_skip_aggregate_line() {
        let file = fixture(
            "cpu  2337 10 188 17838 0 5 0 0 0 0\n\
             cpu0 1188 4 94 9188 0 3 0 0 0 0\n\
             cpu1 1149 6 94 8650 0 2 0 0 0 0\n\
             intr 114930548 113199788 3 0 5 263 0 4 [... lots more numbers ...]\n",
        );

        let cpus = get_cpu_times_from_path(path(&file), 100).unwrap();
        assert_eq!(
            cpus,
            vec![
                CpuTimes {
                    user: 11880,
                    nice: 40,
                    sys: 940,
                    idle: 91880,
                    irq: 30,
                },
                CpuTimes {
                    user: 11490,
                    nice: 60,
                    sys: 940,
                    idle: 86500,
                    irq: 20,
                },
            ]
        );
    }

    #[test]
    fn test_cpu_times_without_cores() {
        let file = fixture("cpu  2337 10 188 17838 0 5 0 0 0 0\n");
        assert!(get_cpu_times_from_path(path(&file), 100).is_err());
    }

    #[test]
    fn test_process_times_with_spaces_in_comm() {
        let file = fixture(
            "4242 (my (weird) fn) S 1 4242 4242 0 -1 4194560 1285 0 0 0 17 5 2 1 20 0 4 0 123 0 0\n",
        );
        assert_eq!(
            get_process_times_from_path(path(&file)).unwrap(),
            ProcessTimes {
                utime: 17,
                stime: 5,
                cutime: 2,
                cstime: 1,
            }
        );

        let truncated = fixture("4242 (bootstrap) S 1 4242\n");
        assert!(get_process_times_from_path(path(&truncated)).is_err());
    }

    #[test]
    fn test_process_status() {
        let file = fixture(
            "Name:\tbootstrap\nFDSize:\t64\nVmPeak:\t  120000 kB\nVmRSS:\t   23456 kB\nThreads:\t7\n",
        );
        assert_eq!(
            get_process_status_from_path(path(&file)).unwrap(),
            ProcessStatus {
                vm_rss_kib: 23456,
                threads: 7,
                fd_size: 64,
            }
        );
    }
}
