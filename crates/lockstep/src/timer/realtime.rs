// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wall-clock timer with absolute-deadline sleeps.
//!
//! Ticks land on the grid `deadline ≡ offset (mod period)`. With
//! `wait_for_start` the timer announces readiness every 2 s and waits for a
//! `SystemTrigger` carrying the start instant; the coordinator picks that
//! instant so every participant shares the same grid.
//!
//! A callback that overruns its period is not re-invoked for the skipped
//! slots: the deadline jumps forward by whole periods and one warning names
//! the number of missed periods.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bus::{Bus, DataReader, DataWriter, QosProfile, WaitSet};
use crate::error::{Error, Result};
use crate::msg::{ReadyStatus, SystemTrigger, READY_STATUS_TOPIC, SYSTEM_TRIGGER_TOPIC};
use crate::time;

use super::{StopCallback, StopHandle, TickCallback, Timer, TimerConfig};

/// Interval between `ReadyStatus` announcements while waiting for a start.
const READY_REPUBLISH: Duration = Duration::from_secs(2);

/// Real-time synchronized timer. See the [module docs](self).
pub struct RtTimer {
    inner: Arc<RtInner>,
}

struct RtInner {
    config: TimerConfig,
    active: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    start_ns: AtomicU64,
    start_initialized: AtomicBool,
    trigger_reader: DataReader<SystemTrigger>,
    ready_writer: DataWriter<ReadyStatus>,
    trigger_wait: Arc<WaitSet>,
    stop_hook: Mutex<Option<StopCallback>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RtTimer {
    /// Build a real-time timer on `bus`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPeriod`] for a zero period, [`Error::InvalidOffset`]
    /// when `offset_ns >= period_ns`.
    pub fn new(bus: &Bus, config: TimerConfig) -> Result<Self> {
        if config.period_ns == 0 {
            return Err(Error::InvalidPeriod);
        }
        if config.offset_ns >= config.period_ns {
            log::error!(
                "[timer] {}: offset {} set higher than period {}",
                config.node_id,
                config.offset_ns,
                config.period_ns
            );
            return Err(Error::InvalidOffset {
                offset_ns: config.offset_ns,
                period_ns: config.period_ns,
            });
        }

        let trigger_reader =
            bus.create_reader::<SystemTrigger>(SYSTEM_TRIGGER_TOPIC, QosProfile::reliable())?;
        let ready_writer =
            bus.create_writer::<ReadyStatus>(READY_STATUS_TOPIC, QosProfile::transient_local())?;

        let trigger_wait = Arc::new(WaitSet::new());
        trigger_wait.attach(&trigger_reader);

        Ok(Self {
            inner: Arc::new(RtInner {
                config,
                active: Arc::new(AtomicBool::new(false)),
                cancelled: Arc::new(AtomicBool::new(false)),
                start_ns: AtomicU64::new(0),
                start_initialized: AtomicBool::new(false),
                trigger_reader,
                ready_writer,
                trigger_wait,
                stop_hook: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        })
    }
}

impl RtInner {
    /// First deadline on the grid at or after `start_point`.
    fn initial_deadline(&self, start_point: u64) -> u64 {
        let period = self.config.period_ns;
        let offset = self.config.offset_ns;

        if start_point <= offset {
            return offset;
        }
        if (start_point - offset) % period == 0 {
            start_point
        } else {
            ((start_point - offset) / period + 1) * period + offset
        }
    }

    /// Announce readiness every 2 s until a trigger arrives or the timer is
    /// stopped. Returns the received start instant, or the stop sentinel.
    fn receive_start_time(&self) -> u64 {
        let ready = ReadyStatus {
            source_id: self.config.node_id.clone(),
            next_start_stamp: 0,
        };

        while self.active.load(Ordering::Acquire) && !self.cancelled.load(Ordering::Acquire) {
            if let Err(e) = self.ready_writer.publish(&ready) {
                log::warn!("[timer] {}: ready publish failed: {}", self.config.node_id, e);
            }

            self.trigger_wait.wait(READY_REPUBLISH);

            for sample in self.trigger_reader.take() {
                if sample.valid {
                    return sample.data.next_start;
                }
            }
        }

        self.config.stop_signal
    }

    /// Non-blocking check for a stop trigger; drains the trigger reader.
    fn received_stop_signal(&self) -> bool {
        let mut stop_seen = false;
        for sample in self.trigger_reader.take() {
            if sample.valid && sample.data.next_start == self.config.stop_signal {
                stop_seen = true;
            }
        }
        stop_seen
    }

    fn run(&self, mut update: TickCallback) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            log::warn!(
                "[timer] {}: the timer can not be started twice",
                self.config.node_id
            );
            return Err(Error::AlreadyStarted);
        }
        // stop() may have won the race before active flipped; honor it.
        if self.cancelled.load(Ordering::Acquire) {
            return Ok(());
        }

        // Only this thread invokes the hook; no lock is held across it.
        let mut stop_hook = self.stop_hook.lock().take();

        let start_point = if self.config.wait_for_start {
            let negotiated = self.receive_start_time();
            if negotiated == self.config.stop_signal {
                return Ok(());
            }
            negotiated
        } else {
            time::monotonic_ns()
        };

        let mut deadline = self.initial_deadline(start_point);
        self.start_ns.store(start_point, Ordering::Release);
        self.start_initialized.store(true, Ordering::Release);
        log::debug!(
            "[timer] {}: started, start={} first deadline={}",
            self.config.node_id,
            start_point,
            deadline
        );

        while self.active.load(Ordering::Acquire) {
            time::sleep_until_ns(deadline);
            if !self.active.load(Ordering::Acquire) {
                break;
            }
            if time::monotonic_ns() < deadline {
                continue;
            }

            update(deadline);
            deadline += self.config.period_ns;

            let current = time::monotonic_ns();
            if current >= deadline {
                let missed = (current - deadline) / self.config.period_ns + 1;
                log::warn!(
                    "[timer] {}: periods missed: {}",
                    self.config.node_id,
                    missed
                );
                deadline += missed * self.config.period_ns;
            }

            if self.config.react_to_stop_signal {
                if self.received_stop_signal() {
                    match stop_hook.as_mut() {
                        Some(on_stop) => on_stop(),
                        None => self.active.store(false, Ordering::Release),
                    }
                }
            } else {
                // Triggers are irrelevant to this instance; keep the reader drained.
                let _ = self.trigger_reader.take();
            }
        }

        Ok(())
    }
}

impl Timer for RtTimer {
    fn start(&self, update: TickCallback) -> Result<()> {
        self.inner.run(update)
    }

    fn start_with_stop(&self, update: TickCallback, on_stop: StopCallback) -> Result<()> {
        *self.inner.stop_hook.lock() = Some(on_stop);
        self.inner.run(update)
    }

    fn start_async(&self, update: TickCallback) -> Result<()> {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() || self.inner.active.load(Ordering::Acquire) {
            log::warn!(
                "[timer] {}: the timer can not be started twice",
                self.inner.config.node_id
            );
            return Err(Error::AlreadyStarted);
        }

        let inner = Arc::clone(&self.inner);
        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let handle = std::thread::Builder::new()
            .name("lockstep-timer".to_string())
            .spawn(move || {
                if let Err(e) = inner.run(update) {
                    log::warn!("[timer] {}: worker exited: {}", inner.config.node_id, e);
                }
            })
            .expect("failed to spawn timer thread");
        *worker = Some(handle);
        Ok(())
    }

    fn start_async_with_stop(&self, update: TickCallback, on_stop: StopCallback) -> Result<()> {
        *self.inner.stop_hook.lock() = Some(on_stop);
        self.start_async(update)
    }

    fn stop(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.active.store(false, Ordering::Release);
        self.inner.trigger_wait.notify();

        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                // stop() from inside the tick callback: the flags end the
                // loop, the handle goes back for the final join elsewhere.
                *self.inner.worker.lock() = Some(handle);
            } else {
                let _ = handle.join();
            }
        }
    }

    fn get_time(&self) -> u64 {
        time::monotonic_ns()
    }

    fn get_start_time(&self) -> u64 {
        if self.inner.start_initialized.load(Ordering::Acquire) {
            self.inner.start_ns.load(Ordering::Acquire)
        } else {
            0
        }
    }

    fn stop_handle(&self) -> StopHandle {
        StopHandle {
            active: Arc::clone(&self.inner.active),
            cancelled: Arc::clone(&self.inner.cancelled),
            wake: Arc::clone(&self.inner.trigger_wait),
        }
    }
}

impl Drop for RtTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(period_ns: u64, offset_ns: u64) -> RtTimer {
        let bus = Bus::builder("deadline-test").build().expect("bus builds");
        RtTimer::new(&bus, TimerConfig::new("n", period_ns).offset_ns(offset_ns))
            .expect("timer builds")
    }

    #[test]
    fn start_on_the_grid_is_its_own_deadline() {
        // 200 ms period, 5 ms offset, start at exactly 1000 s + offset.
        let t = timer(200_000_000, 5_000_000);
        let start = 1_000_000_000_000 + 5_000_000;
        assert_eq!(t.inner.initial_deadline(start), start);
    }

    #[test]
    fn off_grid_start_rounds_up_to_the_next_boundary() {
        let t = timer(200_000_000, 5_000_000);
        let d0 = t.inner.initial_deadline(1_000_000_000_000);
        assert_eq!(d0, 1_000_005_000_000);
        // Ten periods later the grid still holds.
        assert_eq!(d0 + 9 * 200_000_000, 1_001_805_000_000);
    }

    #[test]
    fn start_before_the_offset_lands_on_the_offset() {
        let t = timer(200_000_000, 5_000_000);
        assert_eq!(t.inner.initial_deadline(1_000_000), 5_000_000);
    }

    #[test]
    fn zero_offset_keeps_multiples_of_the_period() {
        let t = timer(100, 0);
        assert_eq!(t.inner.initial_deadline(300), 300);
        assert_eq!(t.inner.initial_deadline(301), 400);
    }
}
