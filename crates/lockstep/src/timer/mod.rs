// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Synchronized periodic timers
//!
//! A timer calls a user callback once per period boundary, synchronized in
//! frequency and phase with every other participant. Two implementations
//! share one surface:
//!
//! - [`RtTimer`]: wall-clock driven, absolute-deadline sleeps, optional start
//!   negotiation with the coordinator over the bus.
//! - [`SimTimer`]: advances only on matching [`SystemTrigger`] messages, for
//!   deterministic lockstep simulation.
//!
//! [`create`] selects the implementation from [`TimerConfig`].
//!
//! ## Lifecycle
//!
//! A timer instance is single-use: it can be started at most once, and after
//! [`Timer::stop`] it is terminal. `stop()` is idempotent and safe from any
//! thread, including from inside the tick callback.
//!
//! ```rust,no_run
//! use lockstep::bus::Bus;
//! use lockstep::timer::{self, Timer, TimerConfig};
//!
//! # fn main() -> lockstep::Result<()> {
//! let bus = Bus::builder("vehicle_7").build()?;
//! let timer = timer::create(
//!     &bus,
//!     TimerConfig::new("vehicle_7", 20_000_000).wait_for_start(false),
//! )?;
//!
//! timer.start(Box::new(|t_now| {
//!     println!("tick at {} ns", t_now);
//! }))?;
//! # Ok(())
//! # }
//! ```
//!
//! [`SystemTrigger`]: crate::msg::SystemTrigger

mod realtime;
mod simple;
mod simulated;

pub use realtime::RtTimer;
pub use simple::SimpleTimer;
pub use simulated::SimTimer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::msg::TRIGGER_STOP;

/// Tick callback: receives the scheduled deadline (not "now").
pub type TickCallback = Box<dyn FnMut(u64) + Send>;

/// Hook invoked when a stop trigger is observed. May call [`Timer::stop`]
/// itself, or keep the timer alive for custom stop behavior.
pub type StopCallback = Box<dyn FnMut() + Send>;

/// Configuration for one timer instance. Immutable once the timer is built.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Identity announced in `ReadyStatus` messages.
    pub node_id: String,
    /// Tick period, > 0.
    pub period_ns: u64,
    /// Phase offset of the tick grid. Must stay below `period_ns` for the
    /// real-time timer; the simulated timer treats it as the instant of the
    /// first tick and allows any value.
    pub offset_ns: u64,
    /// Real-time only: negotiate the start instant with the coordinator
    /// instead of starting immediately.
    pub wait_for_start: bool,
    /// Whether stop triggers are honored at all.
    pub react_to_stop_signal: bool,
    /// Trigger value interpreted as "terminate".
    pub stop_signal: u64,
    /// Drive the timer from coordinator triggers instead of the wall clock.
    pub simulated_time: bool,
    /// Whether this deployment permits simulated time.
    pub simulated_time_allowed: bool,
}

impl TimerConfig {
    /// Config with the given identity and period; all other fields at their
    /// defaults (offset 0, negotiated start, stop triggers honored, real
    /// time).
    #[must_use]
    pub fn new(node_id: &str, period_ns: u64) -> Self {
        Self {
            node_id: node_id.to_string(),
            period_ns,
            offset_ns: 0,
            wait_for_start: true,
            react_to_stop_signal: true,
            stop_signal: TRIGGER_STOP,
            simulated_time: false,
            simulated_time_allowed: true,
        }
    }

    /// Set the phase offset.
    #[must_use]
    pub fn offset_ns(mut self, offset_ns: u64) -> Self {
        self.offset_ns = offset_ns;
        self
    }

    /// Set whether the timer negotiates its start instant.
    #[must_use]
    pub fn wait_for_start(mut self, wait: bool) -> Self {
        self.wait_for_start = wait;
        self
    }

    /// Set whether stop triggers are honored.
    #[must_use]
    pub fn react_to_stop_signal(mut self, react: bool) -> Self {
        self.react_to_stop_signal = react;
        self
    }

    /// Override the stop sentinel.
    #[must_use]
    pub fn stop_signal(mut self, stop_signal: u64) -> Self {
        self.stop_signal = stop_signal;
        self
    }

    /// Request simulated time.
    #[must_use]
    pub fn simulated_time(mut self, simulated: bool) -> Self {
        self.simulated_time = simulated;
        self
    }

    /// Permit or forbid simulated time for this deployment.
    #[must_use]
    pub fn simulated_time_allowed(mut self, allowed: bool) -> Self {
        self.simulated_time_allowed = allowed;
        self
    }
}

/// Common surface of [`RtTimer`] and [`SimTimer`].
pub trait Timer: Send + Sync {
    /// Run the periodic callback on the calling thread; blocks until the
    /// timer is stopped or a stop trigger is observed.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] when the instance was started before.
    fn start(&self, update: TickCallback) -> Result<()>;

    /// Like [`Timer::start`], additionally registering a stop hook that runs
    /// when a stop trigger is observed (instead of the default self-stop).
    fn start_with_stop(&self, update: TickCallback, on_stop: StopCallback) -> Result<()>;

    /// Run the periodic callback on a dedicated worker thread.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyStarted`] when the instance was started before.
    fn start_async(&self, update: TickCallback) -> Result<()>;

    /// Async variant of [`Timer::start_with_stop`].
    fn start_async_with_stop(&self, update: TickCallback, on_stop: StopCallback) -> Result<()>;

    /// Stop the timer and join its worker. Idempotent; callable from any
    /// thread including the tick callback. The instance is terminal after.
    fn stop(&self);

    /// Current time of the timer's clock domain.
    fn get_time(&self) -> u64;

    /// Negotiated start instant, or 0 before the first successful start.
    fn get_start_time(&self) -> u64;

    /// Wait-free handle for stopping the timer from callbacks or other
    /// threads without joining its worker.
    fn stop_handle(&self) -> StopHandle;
}

/// Wait-free stop flags shared with a running timer.
///
/// [`StopHandle::stop`] flips the timer's `cancelled`/`active` atomics and
/// wakes a pending bus wait; it never joins the worker, so it is safe from
/// inside the tick callback. Use [`Timer::stop`] for the joining variant.
#[derive(Clone)]
pub struct StopHandle {
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) cancelled: Arc<AtomicBool>,
    pub(crate) wake: Arc<crate::bus::WaitSet>,
}

impl StopHandle {
    /// Request the timer to stop. Wait-free and idempotent.
    pub fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.active.store(false, Ordering::Release);
        self.wake.notify();
    }

    /// Whether the timer is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Create a timer per `config`, selecting real or simulated time.
///
/// # Errors
///
/// - [`Error::InvalidPeriod`] for a zero period.
/// - [`Error::InvalidOffset`] for a real-time timer with `offset >= period`.
/// - [`Error::SimulatedTimeNotAllowed`] when simulated time is requested but
///   forbidden by the configuration.
pub fn create(bus: &Bus, config: TimerConfig) -> Result<Box<dyn Timer>> {
    if config.period_ns == 0 {
        return Err(Error::InvalidPeriod);
    }

    if config.simulated_time {
        if !config.simulated_time_allowed {
            log::error!(
                "[timer] {}: simulated time requested but not allowed",
                config.node_id
            );
            return Err(Error::SimulatedTimeNotAllowed);
        }
        Ok(Box::new(SimTimer::new(bus, config)?))
    } else {
        Ok(Box::new(RtTimer::new(bus, config)?))
    }
}
