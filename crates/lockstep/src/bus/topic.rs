// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed topic channel: the delivery fabric behind writers and readers.
//!
//! One `TopicChannel<T>` exists per (bus, topic). Publishing pushes a clone
//! of the sample into every live polling slot and every async dispatch
//! queue, in registration order. A single lock per fan-out list keeps
//! per-publisher FIFO within the topic.

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use super::reader::Sample;
use super::waitset::DataSignal;
use super::Message;

/// Delivery slot of one polling reader.
pub(crate) struct ReaderSlot<T> {
    buffer: Mutex<VecDeque<Sample<T>>>,
    signals: Mutex<Vec<Arc<DataSignal>>>,
}

impl<T: Message> ReaderSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            signals: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, sample: Sample<T>) {
        self.buffer.lock().push_back(sample);
        for signal in self.signals.lock().iter() {
            signal.notify();
        }
    }

    pub(crate) fn drain(&self) -> Vec<Sample<T>> {
        self.buffer.lock().drain(..).collect()
    }

    pub(crate) fn add_signal(&self, signal: Arc<DataSignal>) {
        self.signals.lock().push(signal);
    }
}

/// Fan-out hub for one named topic.
pub(crate) struct TopicChannel<T> {
    name: String,
    readers: Mutex<Vec<Weak<ReaderSlot<T>>>>,
    async_txs: Mutex<Vec<Sender<T>>>,
    retained: Mutex<Option<T>>,
    retain_last: AtomicBool,
}

impl<T: Message> TopicChannel<T> {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            readers: Mutex::new(Vec::new()),
            async_txs: Mutex::new(Vec::new()),
            retained: Mutex::new(None),
            retain_last: AtomicBool::new(false),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// A transient-local writer on the topic turns on last-value retention.
    pub(crate) fn enable_retention(&self) {
        self.retain_last.store(true, Ordering::Release);
    }

    pub(crate) fn publish(&self, value: &T) {
        if self.retain_last.load(Ordering::Acquire) {
            *self.retained.lock() = Some(value.clone());
        }

        // Dead slots (dropped readers) are pruned on the way through.
        self.readers.lock().retain(|weak| match weak.upgrade() {
            Some(slot) => {
                slot.push(Sample::valid(value.clone()));
                true
            }
            None => false,
        });

        self.async_txs
            .lock()
            .retain(|tx| tx.send(value.clone()).is_ok());
    }

    /// Register a polling reader; replays the retained sample to late joiners.
    pub(crate) fn add_reader(&self, slot: &Arc<ReaderSlot<T>>) {
        if let Some(retained) = self.retained.lock().clone() {
            slot.push(Sample::valid(retained));
        }
        self.readers.lock().push(Arc::downgrade(slot));
    }

    /// Register an async dispatch queue; replays the retained sample.
    pub(crate) fn add_async(&self, tx: Sender<T>) {
        if let Some(retained) = self.retained.lock().clone() {
            let _ = tx.send(retained);
        }
        self.async_txs.lock().push(tx);
    }

    /// Number of live subscribing endpoints (polling and async).
    pub(crate) fn subscriber_count(&self) -> usize {
        let live_readers = {
            let mut readers = self.readers.lock();
            readers.retain(|weak| weak.strong_count() > 0);
            readers.len()
        };
        live_readers + self.async_txs.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_every_reader_in_order() {
        let channel = TopicChannel::<u32>::new("t");
        let a = Arc::new(ReaderSlot::new());
        let b = Arc::new(ReaderSlot::new());
        channel.add_reader(&a);
        channel.add_reader(&b);

        channel.publish(&1);
        channel.publish(&2);

        let drained: Vec<u32> = a.drain().into_iter().map(|s| s.data).collect();
        assert_eq!(drained, vec![1, 2]);
        let drained: Vec<u32> = b.drain().into_iter().map(|s| s.data).collect();
        assert_eq!(drained, vec![1, 2]);
    }

    #[test]
    fn dropped_reader_is_pruned() {
        let channel = TopicChannel::<u32>::new("t");
        let a = Arc::new(ReaderSlot::new());
        channel.add_reader(&a);
        assert_eq!(channel.subscriber_count(), 1);

        drop(a);
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn retained_sample_replays_to_late_joiner() {
        let channel = TopicChannel::<u32>::new("t");
        channel.enable_retention();
        channel.publish(&7);

        let late = Arc::new(ReaderSlot::new());
        channel.add_reader(&late);
        let drained: Vec<u32> = late.drain().into_iter().map(|s| s.data).collect();
        assert_eq!(drained, vec![7]);
    }

    #[test]
    fn volatile_topic_does_not_replay() {
        let channel = TopicChannel::<u32>::new("t");
        channel.publish(&7);

        let late = Arc::new(ReaderSlot::new());
        channel.add_reader(&late);
        assert!(late.drain().is_empty());
    }
}
