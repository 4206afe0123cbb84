// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coarse periodic timer for millisecond-rate jobs.
//!
//! Wraps a real-time timer running at a fixed 50 ms base period and forwards
//! every Nth tick to the user callback. Intended for UI-rate work that wants
//! the shared start/stop protocol without sub-millisecond phase accuracy;
//! with `react_to_stop_signal = false` it keeps running across a lab-wide
//! stop (e.g. to keep status displays alive).

use crate::bus::Bus;
use crate::error::Result;

use super::{RtTimer, StopCallback, StopHandle, TickCallback, Timer, TimerConfig};

/// Base period every [`SimpleTimer`] is derived from.
const BASE_PERIOD_NS: u64 = 50_000_000;

/// Coarse timer; see the [module docs](self).
pub struct SimpleTimer {
    timer: RtTimer,
    ticks_per_callback: u64,
}

impl SimpleTimer {
    /// Build a timer that fires roughly every `period_ms` milliseconds
    /// (rounded up to the 50 ms base grid).
    ///
    /// # Errors
    ///
    /// Propagates endpoint construction failures from the underlying timer.
    pub fn new(
        bus: &Bus,
        node_id: &str,
        period_ms: u64,
        wait_for_start: bool,
        react_to_stop_signal: bool,
    ) -> Result<Self> {
        let config = TimerConfig::new(node_id, BASE_PERIOD_NS)
            .wait_for_start(wait_for_start)
            .react_to_stop_signal(react_to_stop_signal);

        Ok(Self {
            timer: RtTimer::new(bus, config)?,
            ticks_per_callback: period_ms.div_ceil(50).max(1),
        })
    }

    fn wrap(&self, mut update: TickCallback) -> TickCallback {
        let every = self.ticks_per_callback;
        // Counter starts saturated so the first base tick fires the callback.
        let mut counter = every;
        Box::new(move |t_now| {
            counter += 1;
            if counter >= every {
                counter = 0;
                update(t_now);
            }
        })
    }
}

impl Timer for SimpleTimer {
    fn start(&self, update: TickCallback) -> Result<()> {
        self.timer.start(self.wrap(update))
    }

    fn start_with_stop(&self, update: TickCallback, on_stop: StopCallback) -> Result<()> {
        self.timer.start_with_stop(self.wrap(update), on_stop)
    }

    fn start_async(&self, update: TickCallback) -> Result<()> {
        self.timer.start_async(self.wrap(update))
    }

    fn start_async_with_stop(&self, update: TickCallback, on_stop: StopCallback) -> Result<()> {
        self.timer.start_async_with_stop(self.wrap(update), on_stop)
    }

    fn stop(&self) {
        self.timer.stop();
    }

    fn get_time(&self) -> u64 {
        self.timer.get_time()
    }

    fn get_start_time(&self) -> u64 {
        self.timer.get_start_time()
    }

    fn stop_handle(&self) -> StopHandle {
        self.timer.stop_handle()
    }
}
