// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named marks and measured intervals recorded during an invocation.
//!
//! Entries may be contributed from any task. They are kept in a set ordered
//! by name, then start time, then duration and type, which gives the report a
//! deterministic order and drops value-identical duplicates.

use crate::error::TelemetryError;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Kind of a [`PerformanceEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryType {
    Mark,
    Measure,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Mark => "mark",
            EntryType::Measure => "measure",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point in time or an interval. Field order defines the set ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PerformanceEntry {
    name: String,
    start_ns: u64,
    duration_ns: u64,
    entry_type: EntryType,
}

impl PerformanceEntry {
    /// `start_ns` is wall-clock nanoseconds since the Unix epoch.
    pub fn new(
        name: impl Into<String>,
        start_ns: u64,
        duration_ns: u64,
        entry_type: EntryType,
    ) -> Self {
        Self {
            name: name.into(),
            start_ns,
            duration_ns,
            entry_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub fn start_time_millis(&self) -> u64 {
        self.start_ns / 1_000_000
    }

    pub fn duration_ns(&self) -> u64 {
        self.duration_ns
    }

    pub fn duration_millis(&self) -> u64 {
        self.duration_ns / 1_000_000
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub(crate) fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// A recorded zero-duration entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    entry: PerformanceEntry,
}

impl Mark {
    pub fn name(&self) -> &str {
        self.entry.name()
    }

    pub fn start_ns(&self) -> u64 {
        self.entry.start_ns()
    }

    pub fn entry(&self) -> &PerformanceEntry {
        &self.entry
    }
}

/// Shared, lock-guarded set of entries.
#[derive(Debug, Clone, Default)]
pub struct PerformanceEntries {
    entries: Arc<Mutex<BTreeSet<PerformanceEntry>>>,
}

impl PerformanceEntries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when a value-identical entry was already present.
    pub fn add(&self, entry: PerformanceEntry) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry)
    }

    pub fn mark(&self, name: impl Into<String>) -> Mark {
        let entry = PerformanceEntry::new(name, epoch_nanos(), 0, EntryType::Mark);
        self.add(entry.clone());
        Mark { entry }
    }

    /// Starts measuring; the entry is recorded when the guard is dropped.
    pub fn measure(&self, name: impl Into<String>) -> ScopedMeasurement {
        ScopedMeasurement {
            entries: self.clone(),
            name: name.into(),
            start_ns: epoch_nanos(),
            started: Instant::now(),
        }
    }

    /// Records the interval between two marks: it starts at `from` and lasts
    /// until `to` was marked.
    pub fn measure_between(
        &self,
        name: impl Into<String>,
        from: &Mark,
        to: &Mark,
    ) -> Result<PerformanceEntry, TelemetryError> {
        let duration_ns = to.start_ns().checked_sub(from.start_ns()).ok_or_else(|| {
            TelemetryError::InvalidArgument(format!(
                "mark '{}' precedes mark '{}'",
                to.name(),
                from.name()
            ))
        })?;

        let entry = PerformanceEntry::new(name, from.start_ns(), duration_ns, EntryType::Measure);
        self.add(entry.clone());
        Ok(entry)
    }

    /// Ordered copy of the current entries.
    pub fn snapshot(&self) -> Vec<PerformanceEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guard returned by [`PerformanceEntries::measure`]. Dropping it records a
/// `measure` entry covering the time since it was created, on every exit
/// path including early returns and unwinding.
#[must_use = "the measurement is recorded when the guard is dropped"]
#[derive(Debug)]
pub struct ScopedMeasurement {
    entries: PerformanceEntries,
    name: String,
    start_ns: u64,
    started: Instant,
}

impl ScopedMeasurement {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ScopedMeasurement {
    fn drop(&mut self) {
        let duration_ns = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.entries.add(PerformanceEntry::new(
            std::mem::take(&mut self.name),
            self.start_ns,
            duration_ns,
            EntryType::Measure,
        ));
    }
}
