// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Callback subscription endpoint.
//!
//! Each subscription owns one dispatch thread. Samples are queued by the
//! publisher and handed to the user handler in batches, so the handler never
//! runs on a publisher's thread.

use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::Message;

/// How often the dispatch thread re-checks its stop flag while idle.
const DISPATCH_IDLE_CHECK: Duration = Duration::from_millis(100);

/// Handle to one async subscription.
///
/// Created by [`super::Bus::subscribe`]. Dropping the handle stops the
/// dispatch thread; samples still queued are discarded.
pub struct AsyncReader<T: Message> {
    topic: String,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Message> AsyncReader<T> {
    pub(crate) fn spawn<F>(topic: &str, rx: Receiver<T>, mut handler: F) -> Self
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread_topic = topic.to_string();

        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let worker = std::thread::Builder::new()
            .name(format!("lockstep-dispatch-{}", topic))
            .spawn(move || {
                dispatch_loop(&thread_topic, &rx, &stop_flag, &mut handler);
            })
            .expect("failed to spawn dispatch thread");

        Self {
            topic: topic.to_string(),
            stop,
            worker: Some(worker),
            _marker: std::marker::PhantomData,
        }
    }

    /// Topic this subscription is bound to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

fn dispatch_loop<T, F>(topic: &str, rx: &Receiver<T>, stop: &AtomicBool, handler: &mut F)
where
    T: Message,
    F: FnMut(Vec<T>) + Send,
{
    log::debug!("[bus] dispatch thread up for topic='{}'", topic);

    while !stop.load(Ordering::Acquire) {
        match rx.recv_timeout(DISPATCH_IDLE_CHECK) {
            Ok(first) => {
                let mut batch = vec![first];
                while let Ok(more) = rx.try_recv() {
                    batch.push(more);
                }
                handler(batch);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::debug!("[bus] dispatch thread down for topic='{}'", topic);
}

impl<T: Message> Drop for AsyncReader<T> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
