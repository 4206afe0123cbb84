// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Topic bus
//!
//! Named-topic publish/subscribe used by every lab participant. The core
//! protocol code only depends on the endpoint types in this module; the
//! loopback implementation behind them binds writers to readers inside one
//! process, which is how the local leg of the lab (middleware ↔ HLC on the
//! same host) communicates.
//!
//! ## Overview
//!
//! - [`Bus`]: entry point, factory for all endpoints, and monotonic clock
//!   source. Built via [`Bus::builder`].
//! - [`DataWriter`]: publishes typed messages to a named topic, per-publisher
//!   FIFO within the topic.
//! - [`DataReader`]: polling endpoint; [`DataReader::take`] drains buffered
//!   samples, consumers ignore samples with `valid == false`.
//! - [`AsyncReader`]: callback endpoint; the handler receives batches of new
//!   samples on a bus-owned dispatch thread.
//! - [`WaitSet`]: blocks until any attached reader has new data.
//! - [`QosProfile`]: reliability and durability knobs per endpoint.
//!
//! ## Quick start
//!
//! ```rust
//! use lockstep::bus::{Bus, QosProfile};
//!
//! # fn main() -> lockstep::Result<()> {
//! let bus = Bus::builder("demo").build()?;
//!
//! let writer = bus.create_writer::<u64>("ticks", QosProfile::reliable())?;
//! let reader = bus.create_reader::<u64>("ticks", QosProfile::reliable())?;
//!
//! writer.publish(&42)?;
//! let samples = reader.take();
//! assert_eq!(samples[0].data, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading
//!
//! Writers, readers and the bus handle are `Send + Sync`. Async handlers run
//! on a dedicated dispatch thread per subscription; they must be non-blocking
//! and must not acquire locks owned by the code that publishes.

mod async_reader;
mod participant;
mod qos;
mod reader;
mod topic;
mod waitset;
mod writer;

pub use async_reader::AsyncReader;
pub use participant::{Bus, BusBuilder};
pub use qos::{Durability, QosProfile, Reliability};
pub use reader::{DataReader, Sample};
pub use waitset::WaitSet;
pub use writer::DataWriter;

/// Payload contract for bus messages.
///
/// Blanket-implemented: any clonable, thread-safe, `'static` type can travel
/// over the loopback bus.
pub trait Message: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Message for T {}
