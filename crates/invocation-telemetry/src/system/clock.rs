// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! System clock tick rate (`CLK_TCK`), used to convert `/proc/stat` CPU times
//! from clock ticks to milliseconds.

use std::io;

/// Tick rate assumed when `sysconf` cannot answer. Linux uses 100 Hz almost
/// everywhere.
pub const DEFAULT_CLK_TCK: u64 = 100;

#[cfg(unix)]
pub fn get_clk_tck() -> Result<u64, io::Error> {
    use nix::unistd::{sysconf, SysconfVar};

    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(clk_tck)) if clk_tck > 0 => Ok(clk_tck as u64),
        _ => Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Could not find system clock ticks per second",
        )),
    }
}

#[cfg(not(unix))]
pub fn get_clk_tck() -> Result<u64, io::Error> {
    Ok(DEFAULT_CLK_TCK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clk_tck_is_positive() {
        let clk_tck = get_clk_tck().unwrap_or(DEFAULT_CLK_TCK);
        assert!(clk_tck > 0);
    }
}
