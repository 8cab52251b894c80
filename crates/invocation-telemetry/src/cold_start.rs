// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Process-wide cold start tracking.
//!
//! The first report built by a process is the cold start; every later report,
//! whatever context it belongs to, is thawed. The flag is never reset.

use std::sync::atomic::{AtomicBool, Ordering};

static THAWED: AtomicBool = AtomicBool::new(false);

/// Claims the cold start. Returns `true` for exactly one caller per process.
pub fn claim() -> bool {
    !THAWED.swap(true, Ordering::AcqRel)
}

/// Whether the cold start has already been claimed.
pub fn is_thawed() -> bool {
    THAWED.load(Ordering::Acquire)
}
