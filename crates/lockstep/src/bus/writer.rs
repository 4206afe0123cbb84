// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publishing endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;

use super::qos::QosProfile;
use super::topic::TopicChannel;
use super::Message;

/// Publishing endpoint for one topic.
///
/// Samples published through one writer arrive at every subscriber in
/// publish order.
pub struct DataWriter<T: Message> {
    channel: Arc<TopicChannel<T>>,
    qos: QosProfile,
}

impl<T: Message> Clone for DataWriter<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            qos: self.qos,
        }
    }
}

impl<T: Message> DataWriter<T> {
    pub(crate) fn new(channel: Arc<TopicChannel<T>>, qos: QosProfile) -> Self {
        Self { channel, qos }
    }

    /// Publish one sample to every current subscriber of the topic.
    pub fn publish(&self, value: &T) -> Result<()> {
        self.channel.publish(value);
        Ok(())
    }

    /// Topic this writer is bound to.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.channel.name()
    }

    /// QoS the writer was created with.
    #[must_use]
    pub fn qos(&self) -> QosProfile {
        self.qos
    }

    /// Number of subscribing endpoints currently matched with this topic.
    #[must_use]
    pub fn matched_subscribers(&self) -> usize {
        self.channel.subscriber_count()
    }

    /// Warm-up helper: poll until at least `min` subscribers are matched or
    /// `timeout` elapses. Returns whether the threshold was reached.
    ///
    /// Publishing before a match is not an error on the bus; callers that
    /// need a guaranteed audience use this before their first publish.
    pub fn wait_for_subscribers(&self, min: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.matched_subscribers() >= min {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}
