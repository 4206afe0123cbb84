// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lockstep timer driven by coordinator triggers.
//!
//! There is no OS clock here. The timer announces the deadline it will
//! accept in a `ReadyStatus`, then blocks on the trigger topic. Only a
//! trigger whose `next_start` equals the announced deadline advances the
//! timer by one tick; stale or duplicate triggers from other instances are
//! dropped. The stop sentinel terminates the timer in any phase.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bus::{Bus, DataReader, DataWriter, QosProfile, WaitSet};
use crate::error::{Error, Result};
use crate::msg::{ReadyStatus, SystemTrigger, READY_STATUS_TOPIC, SYSTEM_TRIGGER_TOPIC};

use super::{StopCallback, StopHandle, TickCallback, Timer, TimerConfig};

/// Upper bound on one trigger wait; doubles as the keep-alive interval.
const TRIGGER_WAIT: Duration = Duration::from_secs(2);

/// Simulated-time timer. See the [module docs](self).
pub struct SimTimer {
    inner: Arc<SimInner>,
}

struct SimInner {
    config: TimerConfig,
    active: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    current_time: AtomicU64,
    trigger_reader: DataReader<SystemTrigger>,
    ready_writer: DataWriter<ReadyStatus>,
    trigger_wait: Arc<WaitSet>,
    stop_hook: Mutex<Option<StopCallback>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimTimer {
    /// Build a simulated-time timer on `bus`. The offset may exceed the
    /// period: it is the instant of the first tick, not a modulus.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidPeriod`] for a zero period.
    pub fn new(bus: &Bus, config: TimerConfig) -> Result<Self> {
        if config.period_ns == 0 {
            return Err(Error::InvalidPeriod);
        }

        let trigger_reader =
            bus.create_reader::<SystemTrigger>(SYSTEM_TRIGGER_TOPIC, QosProfile::reliable())?;
        let ready_writer =
            bus.create_writer::<ReadyStatus>(READY_STATUS_TOPIC, QosProfile::transient_local())?;

        let trigger_wait = Arc::new(WaitSet::new());
        trigger_wait.attach(&trigger_reader);

        Ok(Self {
            inner: Arc::new(SimInner {
                config,
                active: Arc::new(AtomicBool::new(false)),
                cancelled: Arc::new(AtomicBool::new(false)),
                current_time: AtomicU64::new(0),
                trigger_reader,
                ready_writer,
                trigger_wait,
                stop_hook: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        })
    }
}

impl SimInner {
    fn publish_ready(&self, next_start_stamp: u64) {
        let ready = ReadyStatus {
            source_id: self.config.node_id.clone(),
            next_start_stamp,
        };
        if let Err(e) = self.ready_writer.publish(&ready) {
            log::warn!("[timer] {}: ready publish failed: {}", self.config.node_id, e);
        }
    }

    fn run(&self, mut update: TickCallback) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            log::warn!(
                "[timer] {}: the timer can not be started twice",
                self.config.node_id
            );
            return Err(Error::AlreadyStarted);
        }
        if self.cancelled.load(Ordering::Acquire) {
            return Ok(());
        }

        // Only this thread invokes the hook; no lock is held across it.
        let mut stop_hook = self.stop_hook.lock().take();

        // Stamp 0 means "not yet started", so a deadline of 0 is
        // unrepresentable: a zero offset puts the first tick one period in.
        let mut deadline = if self.config.offset_ns == 0 {
            self.config.period_ns
        } else {
            self.config.offset_ns
        };

        self.publish_ready(0);
        self.publish_ready(deadline);

        while self.active.load(Ordering::Acquire) {
            let woken = self.trigger_wait.wait(TRIGGER_WAIT);
            if !self.active.load(Ordering::Acquire) {
                break;
            }

            for sample in self.trigger_reader.take() {
                if !sample.valid {
                    continue;
                }
                let next_start = sample.data.next_start;

                if next_start == self.config.stop_signal {
                    if !self.config.react_to_stop_signal {
                        log::debug!(
                            "[timer] {}: stop trigger ignored by configuration",
                            self.config.node_id
                        );
                        continue;
                    }
                    match stop_hook.as_mut() {
                        Some(on_stop) => on_stop(),
                        None => self.active.store(false, Ordering::Release),
                    }
                    if !self.active.load(Ordering::Acquire) {
                        break;
                    }
                } else if next_start == deadline {
                    self.current_time.store(deadline, Ordering::Release);
                    update(deadline);
                    deadline += self.config.period_ns;
                    self.publish_ready(deadline);
                } else {
                    log::debug!(
                        "[timer] {}: trigger {} ignored (expecting {})",
                        self.config.node_id,
                        next_start,
                        deadline
                    );
                }
            }

            // Keep-alive: re-announce the pending deadline after a quiet wait.
            if !woken && self.active.load(Ordering::Acquire) {
                self.publish_ready(deadline);
            }
        }

        Ok(())
    }
}

impl Timer for SimTimer {
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
            .name("lockstep-sim-timer".to_string())
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
                *self.inner.worker.lock() = Some(handle);
            } else {
                let _ = handle.join();
            }
        }
    }

    /// Most recent deadline the callback was dispatched for; 0 before the
    /// first tick.
    fn get_time(&self) -> u64 {
        self.inner.current_time.load(Ordering::Acquire)
    }

    /// Simulated sessions always start at 0.
    fn get_start_time(&self) -> u64 {
        0
    }

    fn stop_handle(&self) -> StopHandle {
        StopHandle {
            active: Arc::clone(&self.inner.active),
            cancelled: Arc::clone(&self.inner.cancelled),
            wake: Arc::clone(&self.inner.trigger_wait),
        }
    }
}

impl Drop for SimTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
