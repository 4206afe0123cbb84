// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire message types exchanged between lab participants.
//!
//! All timestamps are unsigned 64-bit nanoseconds in the common monotonic
//! clock domain (see [`crate::time`]). Topic names are part of the protocol
//! and must match bit-exactly across participants.

use serde::{Deserialize, Serialize};

/// Reserved `SystemTrigger::next_start` value meaning "terminate".
///
/// Never a legal start instant.
pub const TRIGGER_STOP: u64 = u64::MAX;

/// Topic carrying [`ReadyStatus`] announcements (reliable, transient-local).
pub const READY_STATUS_TOPIC: &str = "readyStatus";
/// Topic carrying [`SystemTrigger`] commands (reliable).
pub const SYSTEM_TRIGGER_TOPIC: &str = "systemTrigger";
/// Topic carrying per-tick [`VehicleStateList`] snapshots (best-effort).
pub const VEHICLE_STATE_LIST_TOPIC: &str = "vehicleStateList";
/// Topic carrying [`RoundTripTime`] probes and responses (best-effort).
pub const ROUND_TRIP_TIME_TOPIC: &str = "round_trip_time";
/// Topic carrying [`StopRequest`] escalations (reliable).
pub const STOP_REQUEST_TOPIC: &str = "stopRequest";

/// Announcement that a participant is ready for its next deadline.
///
/// `next_start_stamp == 0` if and only if the participant has not yet been
/// started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyStatus {
    /// Identity of the announcing participant.
    pub source_id: String,
    /// Next deadline the participant will accept, or 0 before start.
    pub next_start_stamp: u64,
}

/// Coordinator command: an absolute start instant, or [`TRIGGER_STOP`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemTrigger {
    /// Absolute start instant in nanoseconds, or the stop sentinel.
    pub next_start: u64,
}

/// Planar pose of one vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose2D {
    pub x: f64,
    pub y: f64,
    /// Heading in radians.
    pub yaw: f64,
}

/// Observed state of one vehicle at a tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleState {
    pub vehicle_id: u8,
    pub pose: Pose2D,
    /// Speed along the heading in m/s.
    pub speed: f64,
}

/// Per-tick snapshot of every vehicle, published by the middleware.
///
/// The latest sample overrides all prior ones; consumers keep only the
/// newest snapshot per tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VehicleStateList {
    /// Tick timestamp the snapshot belongs to.
    pub t_now: u64,
    /// Planning period granted to the consumer for this snapshot.
    pub period_ns: u64,
    pub states: Vec<VehicleState>,
}

/// One round-trip-time probe or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTripTime {
    /// Program id of the sender; responses are aggregated under this key.
    pub source_id: String,
    /// Rotating request counter; responses echo the request's value.
    pub seq: u8,
    /// `true` for probes, `false` for responses.
    pub is_request: bool,
}

/// Participant-initiated request to stop the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    pub vehicle_id: u8,
}

/// Canonical `ReadyStatus::source_id` for a multi-vehicle coordinator:
/// the sorted decimal vehicle ids joined by `,`.
#[must_use]
pub fn ready_source_id(vehicle_ids: &[u8]) -> String {
    let mut ids = vehicle_ids.to_vec();
    ids.sort_unstable();
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`ready_source_id`]; ignores malformed segments.
#[must_use]
pub fn parse_ready_source_id(source_id: &str) -> Vec<u8> {
    source_id
        .split(',')
        .filter_map(|part| part.trim().parse::<u8>().ok())
        .collect()
}
