// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Polling reader endpoint.

use std::sync::Arc;

use super::topic::{ReaderSlot, TopicChannel};
use super::waitset::DataSignal;
use super::Message;

/// One delivered sample plus its validity bit.
///
/// Consumers must ignore samples with `valid == false`; such samples carry
/// no payload meaning (the loopback bus only produces valid samples, wire
/// transports may not).
#[derive(Debug, Clone)]
pub struct Sample<T> {
    pub data: T,
    pub valid: bool,
}

impl<T> Sample<T> {
    pub(crate) fn valid(data: T) -> Self {
        Self { data, valid: true }
    }
}

/// Polling endpoint for one topic.
///
/// Buffers samples in arrival order; [`DataReader::take`] drains the buffer.
pub struct DataReader<T: Message> {
    slot: Arc<ReaderSlot<T>>,
    channel: Arc<TopicChannel<T>>,
}

impl<T: Message> DataReader<T> {
    pub(crate) fn new(slot: Arc<ReaderSlot<T>>, channel: Arc<TopicChannel<T>>) -> Self {
        Self { slot, channel }
    }

    /// Remove and return every buffered sample, oldest first.
    #[must_use]
    pub fn take(&self) -> Vec<Sample<T>> {
        self.slot.drain()
    }

    /// Topic this reader is bound to.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.channel.name()
    }

    pub(crate) fn attach_signal(&self, signal: Arc<DataSignal>) {
        self.slot.add_signal(signal);
    }

    /// Inject a raw sample, bypassing the topic channel. Test-only hook for
    /// exercising the invalid-sample path.
    #[cfg(test)]
    pub(crate) fn push_raw(&self, sample: Sample<T>) {
        self.slot.push(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Bus, QosProfile};
    use super::*;

    #[test]
    fn take_drains_in_arrival_order() {
        let bus = Bus::builder("test").build().expect("bus builds");
        let writer = bus
            .create_writer::<u32>("seq", QosProfile::best_effort())
            .expect("writer");
        let reader = bus
            .create_reader::<u32>("seq", QosProfile::best_effort())
            .expect("reader");

        for v in [3u32, 1, 4, 1, 5] {
            writer.publish(&v).expect("publish");
        }

        let taken: Vec<u32> = reader.take().into_iter().map(|s| s.data).collect();
        assert_eq!(taken, vec![3, 1, 4, 1, 5]);
        assert!(reader.take().is_empty());
    }

    #[test]
    fn invalid_samples_surface_their_bit() {
        let bus = Bus::builder("test").build().expect("bus builds");
        let reader = bus
            .create_reader::<u32>("raw", QosProfile::best_effort())
            .expect("reader");

        reader.push_raw(Sample {
            data: 9,
            valid: false,
        });
        reader.push_raw(Sample::valid(10));

        let taken = reader.take();
        assert_eq!(taken.len(), 2);
        assert!(!taken[0].valid);
        assert!(taken[1].valid);
    }
}
