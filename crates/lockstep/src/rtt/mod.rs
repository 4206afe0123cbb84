// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Round-trip-time measurement
//!
//! Health monitoring over the shared `round_trip_time` topic:
//!
//! - [`RttTool`]: one per participant. Activated with a program id it
//!   answers every foreign probe immediately; on the measuring side,
//!   [`RttTool::measure_rtt`] runs one probe round and collects responses
//!   per class key (e.g. every vehicle answers under `"vehicle"`).
//! - [`RttAggregator`]: the control-center side. A worker loops measurement
//!   rounds and folds them into per-class best/worst/missed statistics with
//!   liveness-based eviction.
//!
//! Classes that stay silent for longer than the eviction timeout are
//! deleted wholesale and re-created on their next response; prolonged
//! silence is treated as departure, not as an error.

mod aggregator;
mod tool;
#[cfg(test)]
mod tests;

pub use aggregator::{RttAggregator, RttStats};
pub use tool::RttTool;

use std::time::Duration;

/// Timing knobs for measurement rounds and eviction.
///
/// Defaults give a round of 0.55 s (fast responders) to 2.2 s (silence) and
/// a 10 s liveness horizon.
#[derive(Debug, Clone, Copy)]
pub struct RttTiming {
    /// Poll granularity while waiting for the first response of a round.
    pub poll_interval: Duration,
    /// How long a round waits for its first response before giving up.
    pub first_response_timeout: Duration,
    /// Extra window kept open after the first response so slower responders
    /// still land in the same round.
    pub settle: Duration,
    /// Silence span after which a class entry is evicted.
    pub evict_after: Duration,
}

impl Default for RttTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            first_response_timeout: Duration::from_millis(1700),
            settle: Duration::from_millis(500),
            evict_after: Duration::from_secs(10),
        }
    }
}
