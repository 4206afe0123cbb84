// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Monotonic nanosecond clock shared by every participant in a process.
//!
//! All protocol timestamps (deadlines, ready stamps, RTT windows) live in a
//! single monotonic clock domain. The epoch is the first call into this
//! module; only differences and orderings of timestamps are meaningful.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Current time in nanoseconds since the process-wide monotonic epoch.
///
/// Strictly nondecreasing across threads.
#[must_use]
pub fn monotonic_ns() -> u64 {
    // u64 nanoseconds cover ~584 years of process uptime.
    epoch().elapsed().as_nanos() as u64
}

/// Sleep until the absolute deadline `deadline_ns` in the monotonic domain.
///
/// Returns immediately if the deadline has already passed. The sleep is not
/// interruptible; callers bound their stop latency by their period.
pub fn sleep_until_ns(deadline_ns: u64) {
    let now = monotonic_ns();
    if deadline_ns > now {
        std::thread::sleep(Duration::from_nanos(deadline_ns - now));
    }
}
