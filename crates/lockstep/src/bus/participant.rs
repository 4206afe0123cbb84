// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus participant: endpoint factory and clock source.

use crossbeam::channel;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::time;

use super::async_reader::AsyncReader;
use super::qos::{Durability, QosProfile};
use super::reader::DataReader;
use super::topic::{ReaderSlot, TopicChannel};
use super::writer::DataWriter;
use super::Message;

struct TopicEntry {
    type_id: TypeId,
    type_name: &'static str,
    channel: Arc<dyn Any + Send + Sync>,
}

struct BusCore {
    name: String,
    domain_id: u32,
    topics: Mutex<HashMap<String, TopicEntry>>,
}

/// In-process bus participant.
///
/// Cheap to clone; all clones share the same topic space. Endpoints on the
/// same `Bus` (or a clone of it) are matched with each other; separate `Bus`
/// instances are isolated domains.
///
/// See the [module docs](super) for an overview and example.
#[derive(Clone)]
pub struct Bus {
    core: Arc<BusCore>,
}

impl Bus {
    /// Start building a participant with the given name.
    #[must_use]
    pub fn builder(name: &str) -> BusBuilder {
        BusBuilder {
            name: name.to_string(),
            domain_id: 0,
        }
    }

    /// Participant name (used in logs).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Domain this participant belongs to.
    #[must_use]
    pub fn domain_id(&self) -> u32 {
        self.core.domain_id
    }

    /// Monotonic wall clock shared by every participant in the process.
    #[must_use]
    pub fn now_ns(&self) -> u64 {
        time::monotonic_ns()
    }

    /// Create a publishing endpoint on `topic`.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] when the topic is already bound to another
    /// payload type.
    pub fn create_writer<T: Message>(&self, topic: &str, qos: QosProfile) -> Result<DataWriter<T>> {
        let channel = self.resolve::<T>(topic)?;
        if qos.durability == Durability::TransientLocal {
            channel.enable_retention();
        }
        Ok(DataWriter::new(channel, qos))
    }

    /// Create a polling reader on `topic`.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] when the topic is already bound to another
    /// payload type.
    pub fn create_reader<T: Message>(&self, topic: &str, qos: QosProfile) -> Result<DataReader<T>> {
        let channel = self.resolve::<T>(topic)?;
        let _ = qos; // Reliability is recorded by the writer side only.
        let slot = Arc::new(ReaderSlot::new());
        channel.add_reader(&slot);
        Ok(DataReader::new(slot, channel))
    }

    /// Create a callback subscription on `topic`.
    ///
    /// `handler` receives each batch of newly arrived samples on a dedicated
    /// dispatch thread. It must be non-blocking and must not acquire locks
    /// held while publishing.
    ///
    /// # Errors
    ///
    /// [`Error::TypeMismatch`] when the topic is already bound to another
    /// payload type.
    pub fn subscribe<T, F>(&self, topic: &str, qos: QosProfile, handler: F) -> Result<AsyncReader<T>>
    where
        T: Message,
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let channel = self.resolve::<T>(topic)?;
        let _ = qos;
        let (tx, rx) = channel::unbounded::<T>();
        channel.add_async(tx);
        Ok(AsyncReader::spawn(topic, rx, handler))
    }

    /// Resolve (or register) the typed channel behind `topic`, failing fast
    /// on payload type conflicts.
    fn resolve<T: Message>(&self, topic: &str) -> Result<Arc<TopicChannel<T>>> {
        let mut topics = self.core.topics.lock();

        if let Some(entry) = topics.get(topic) {
            if entry.type_id != TypeId::of::<T>() {
                log::warn!(
                    "[bus] topic '{}' already bound to type {}, rejected {}",
                    topic,
                    entry.type_name,
                    std::any::type_name::<T>()
                );
                return Err(Error::TypeMismatch {
                    topic: topic.to_string(),
                });
            }
            let channel = Arc::clone(&entry.channel);
            drop(topics);
            return channel
                .downcast::<TopicChannel<T>>()
                .map_err(|_| Error::TypeMismatch {
                    topic: topic.to_string(),
                });
        }

        let channel = Arc::new(TopicChannel::<T>::new(topic));
        topics.insert(
            topic.to_string(),
            TopicEntry {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
                channel: channel.clone(),
            },
        );
        log::debug!(
            "[bus] '{}' registered topic '{}' ({})",
            self.core.name,
            topic,
            std::any::type_name::<T>()
        );
        Ok(channel)
    }
}

/// Builder for [`Bus`].
pub struct BusBuilder {
    name: String,
    domain_id: u32,
}

impl BusBuilder {
    /// Set the domain id (purely informational for the loopback bus; separate
    /// `Bus` instances are isolated regardless).
    #[must_use]
    pub fn domain_id(mut self, domain_id: u32) -> Self {
        self.domain_id = domain_id;
        self
    }

    /// Build the participant.
    ///
    /// # Errors
    ///
    /// [`Error::Bus`] when the participant name is empty.
    pub fn build(self) -> Result<Bus> {
        if self.name.is_empty() {
            return Err(Error::Bus("participant name must not be empty".to_string()));
        }
        log::debug!(
            "[bus] participant '{}' up (domain {})",
            self.name,
            self.domain_id
        );
        Ok(Bus {
            core: Arc::new(BusCore {
                name: self.name,
                domain_id: self.domain_id,
                topics: Mutex::new(HashMap::new()),
            }),
        })
    }
}
