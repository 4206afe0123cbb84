// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Probe/responder endpoint on the `round_trip_time` topic.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::bus::{AsyncReader, Bus, DataWriter, QosProfile};
use crate::error::{Error, Result};
use crate::msg::{RoundTripTime, ROUND_TRIP_TIME_TOPIC};
use crate::time;

use super::RttTiming;

struct RttShared {
    active: AtomicBool,
    measuring: AtomicBool,
    seq: AtomicU8,
    t_send: AtomicU64,
    program_id: Mutex<String>,
    /// Response times of the current round, per class key.
    replies: Mutex<HashMap<String, Vec<u64>>>,
}

/// Probe and responder for round-trip measurements.
///
/// Inert until [`RttTool::activate`] assigns a program id; an inactive tool
/// neither answers probes nor measures.
pub struct RttTool {
    writer: DataWriter<RoundTripTime>,
    shared: Arc<RttShared>,
    timing: RttTiming,
    _subscription: AsyncReader<RoundTripTime>,
}

impl RttTool {
    /// Build a tool with default [`RttTiming`].
    ///
    /// # Errors
    ///
    /// Propagates endpoint construction failures.
    pub fn new(bus: &Bus) -> Result<Self> {
        Self::with_timing(bus, RttTiming::default())
    }

    /// Build a tool with explicit timing (tests compress the windows).
    ///
    /// # Errors
    ///
    /// Propagates endpoint construction failures.
    pub fn with_timing(bus: &Bus, timing: RttTiming) -> Result<Self> {
        let writer =
            bus.create_writer::<RoundTripTime>(ROUND_TRIP_TIME_TOPIC, QosProfile::best_effort())?;

        let shared = Arc::new(RttShared {
            active: AtomicBool::new(false),
            measuring: AtomicBool::new(false),
            seq: AtomicU8::new(0),
            t_send: AtomicU64::new(0),
            program_id: Mutex::new(String::new()),
            replies: Mutex::new(HashMap::new()),
        });

        let handler_shared = Arc::clone(&shared);
        let responder = writer.clone();
        let subscription = bus.subscribe::<RoundTripTime, _>(
            ROUND_TRIP_TIME_TOPIC,
            QosProfile::best_effort(),
            move |batch| {
                on_samples(&handler_shared, &responder, batch);
            },
        )?;

        Ok(Self {
            writer,
            shared,
            timing,
            _subscription: subscription,
        })
    }

    /// Assign the program id and start participating.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyProgramId`] for an empty id.
    pub fn activate(&self, program_id: &str) -> Result<()> {
        if program_id.is_empty() {
            return Err(Error::EmptyProgramId);
        }
        *self.shared.program_id.lock() = program_id.to_string();
        self.shared.active.store(true, Ordering::Release);
        log::debug!("[rtt] activated as '{}'", program_id);
        Ok(())
    }

    /// Whether [`RttTool::activate`] has been called.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Run one measurement round and return `(best, worst)` nanoseconds per
    /// class key. Empty when inactive or when nobody answered in time.
    ///
    /// The round publishes one probe, waits up to the configured timeout for
    /// a first response, then keeps the window open for the settle span so
    /// slower responders of the same round are still counted.
    pub fn measure_rtt(&self) -> HashMap<String, (u64, u64)> {
        let mut results = HashMap::new();
        if !self.is_active() {
            return results;
        }

        // Rotate the counter first so responses to older probes are dropped.
        let seq = self.shared.seq.load(Ordering::Acquire).wrapping_add(1);
        self.shared.seq.store(seq, Ordering::Release);
        self.shared.replies.lock().clear();

        let request = RoundTripTime {
            source_id: self.shared.program_id.lock().clone(),
            seq,
            is_request: true,
        };

        self.shared
            .t_send
            .store(time::monotonic_ns(), Ordering::Release);
        self.shared.measuring.store(true, Ordering::Release);
        if let Err(e) = self.writer.publish(&request) {
            log::warn!("[rtt] probe publish failed: {}", e);
            self.shared.measuring.store(false, Ordering::Release);
            return results;
        }

        let first_deadline = Instant::now() + self.timing.first_response_timeout;
        let mut any_response = false;
        loop {
            std::thread::sleep(self.timing.poll_interval);
            if !self.shared.replies.lock().is_empty() {
                any_response = true;
                break;
            }
            if Instant::now() >= first_deadline {
                break;
            }
        }

        if any_response {
            std::thread::sleep(self.timing.settle);
        }
        self.shared.measuring.store(false, Ordering::Release);

        let replies = std::mem::take(&mut *self.shared.replies.lock());
        for (class, mut times) in replies {
            times.sort_unstable();
            let best = times[0];
            let worst = times[times.len() - 1];
            results.insert(class, (best, worst));
        }
        results
    }
}

/// Dispatch-thread handler: answer foreign probes, record matching
/// responses. Holds the reply lock for microseconds only.
fn on_samples(
    shared: &Arc<RttShared>,
    responder: &DataWriter<RoundTripTime>,
    batch: Vec<RoundTripTime>,
) {
    if !shared.active.load(Ordering::Acquire) {
        return;
    }

    let own_id = shared.program_id.lock().clone();
    for message in batch {
        if message.is_request {
            if message.source_id != own_id {
                let answer = RoundTripTime {
                    source_id: own_id.clone(),
                    seq: message.seq,
                    is_request: false,
                };
                if let Err(e) = responder.publish(&answer) {
                    log::warn!("[rtt] response publish failed: {}", e);
                }
            }
        } else if shared.measuring.load(Ordering::Acquire)
            && message.seq == shared.seq.load(Ordering::Acquire)
        {
            let rtt = time::monotonic_ns().saturating_sub(shared.t_send.load(Ordering::Acquire));
            shared
                .replies
                .lock()
                .entry(message.source_id)
                .or_default()
                .push(rtt);
        }
        // Responses with a stale seq fall through silently.
    }
}
