// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Lockstep - synchronized timing for networked vehicle labs
//!
//! A middleware substrate that keeps a fleet of vehicles, their high-level
//! controllers (HLCs) and a lab control center (LCC) marching to one global
//! tick, in real or simulated time, over named-topic publish/subscribe.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lockstep::bus::Bus;
//! use lockstep::hlc::HlcCoordinator;
//!
//! fn main() -> lockstep::Result<()> {
//!     let bus = Bus::builder("hlc_4").domain_id(1).build()?;
//!
//!     let coordinator = HlcCoordinator::builder(&bus, vec![4])
//!         .period_ns(100_000_000)
//!         .on_each_timestep(|states| {
//!             // plan one step from the fresh vehicle state snapshot
//!             let _ = states.t_now;
//!         })
//!         .on_cancel_timestep(|| {
//!             // the step overran its period; wrap up early
//!         })
//!         .build()?;
//!
//!     coordinator.run() // blocks until the LCC sends a stop trigger
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          Lab participants                          |
//! |   HlcCoordinator (per HLC)  |  RttAggregator (LCC)  |  vehicles    |
//! +--------------------------------------------------------------------+
//! |                          Timing layer                              |
//! |   RtTimer (wall clock)  |  SimTimer (lockstep)  |  SimpleTimer     |
//! +--------------------------------------------------------------------+
//! |                          Topic bus                                 |
//! |   DataWriter / DataReader / AsyncReader / WaitSet  |  QosProfile   |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`bus::Bus`] | Endpoint factory and monotonic clock source |
//! | [`timer::Timer`] | Common surface of the real and simulated timers |
//! | [`hlc::HlcCoordinator`] | Planning loop with bounded per-tick steps |
//! | [`rtt::RttAggregator`] | Per-class round-trip health statistics |
//! | [`msg`] | Wire messages and bit-exact topic names |
//!
//! ## Protocol sketch
//!
//! Participants announce themselves with `ReadyStatus` (stamp 0 before the
//! first start), the coordinator answers with a `SystemTrigger` carrying
//! the common start instant, and every timer then ticks on the shared grid.
//! The reserved trigger value `u64::MAX` stops the lab.

/// Topic bus: endpoints, QoS, waitsets, and the loopback binding.
pub mod bus;
mod error;
/// High-level-controller coordination (planning loop, cancellation).
pub mod hlc;
/// Wire message types and topic names.
pub mod msg;
/// Round-trip-time measurement and aggregation.
pub mod rtt;
/// Monotonic clock utilities.
pub mod time;
/// Real-time and simulated synchronized timers.
pub mod timer;

pub use error::{Error, Result};

/// Lockstep version string.
pub const VERSION: &str = "0.2.0";
