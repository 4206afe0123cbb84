// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking wait for reader activity.
//!
//! A [`WaitSet`] owns one wake signal; attaching a reader registers that
//! signal with the reader's delivery slot so a publish wakes the waiter
//! immediately. Coalesced: many deliveries between waits produce one wakeup.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::reader::DataReader;
use super::Message;

/// Wake signal shared between delivery slots and one waiting thread.
///
/// Two-tier: an atomic flag for the fast path, a condvar for blocking waits.
#[derive(Debug, Default)]
pub(crate) struct DataSignal {
    ready: AtomicBool,
    sleeping: Mutex<bool>,
    condvar: Condvar,
}

impl DataSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Mark data available and wake a sleeping waiter if there is one.
    pub(crate) fn notify(&self) {
        self.ready.store(true, Ordering::Release);

        // Racy check is safe: worst case is one spurious condvar signal.
        if *self.sleeping.lock() {
            self.condvar.notify_one();
        }
    }

    /// Block until notified or `timeout` elapses. Returns `true` when woken
    /// by a notification, `false` on timeout. Clears the ready flag.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.ready.swap(false, Ordering::Acquire) {
            return true;
        }

        let mut sleeping = self.sleeping.lock();
        *sleeping = true;
        let mut remaining = timeout;
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.ready.swap(false, Ordering::Acquire) {
                *sleeping = false;
                return true;
            }
            if self.condvar.wait_for(&mut sleeping, remaining).timed_out() {
                *sleeping = false;
                return self.ready.swap(false, Ordering::Acquire);
            }
            match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(left) => remaining = left,
                None => {
                    *sleeping = false;
                    return self.ready.swap(false, Ordering::Acquire);
                }
            }
        }
    }
}

/// Wait for new data on any attached [`DataReader`].
///
/// Used by timers while negotiating a start instant and by the simulated
/// timer between lockstep triggers.
///
/// ```rust
/// use std::time::Duration;
/// use lockstep::bus::{Bus, QosProfile, WaitSet};
///
/// # fn main() -> lockstep::Result<()> {
/// let bus = Bus::builder("demo").build()?;
/// let reader = bus.create_reader::<u32>("events", QosProfile::reliable())?;
/// let writer = bus.create_writer::<u32>("events", QosProfile::reliable())?;
///
/// let waitset = WaitSet::new();
/// waitset.attach(&reader);
///
/// writer.publish(&1)?;
/// assert!(waitset.wait(Duration::from_millis(100)));
/// # Ok(())
/// # }
/// ```
pub struct WaitSet {
    signal: Arc<DataSignal>,
}

impl WaitSet {
    /// Create an empty wait set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: Arc::new(DataSignal::new()),
        }
    }

    /// Attach a reader; subsequent deliveries on it wake [`WaitSet::wait`].
    pub fn attach<T: Message>(&self, reader: &DataReader<T>) {
        reader.attach_signal(Arc::clone(&self.signal));
    }

    /// Block until any attached reader received data or `timeout` elapsed.
    ///
    /// Returns `true` when woken by data. Samples that arrived between the
    /// previous `take()` and this call count as new data.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.signal.wait_timeout(timeout)
    }

    /// Wake a blocked [`WaitSet::wait`] without any data arriving.
    pub fn notify(&self) {
        self.signal.notify();
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}
