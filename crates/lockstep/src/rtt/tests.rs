// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end RTT tests with compressed round timing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::bus::{Bus, QosProfile};
use crate::msg::{RoundTripTime, ROUND_TRIP_TIME_TOPIC};

use super::{RttAggregator, RttTiming, RttTool};

/// Round timing compressed for tests: ~35-180 ms per round, 250 ms eviction.
fn fast_timing() -> RttTiming {
    RttTiming {
        poll_interval: Duration::from_millis(5),
        first_response_timeout: Duration::from_millis(150),
        settle: Duration::from_millis(30),
        evict_after: Duration::from_millis(250),
    }
}

fn wait_for<T>(timeout: Duration, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn activate_rejects_empty_program_id() {
    let bus = Bus::builder("rtt").build().expect("bus");
    let tool = RttTool::new(&bus).expect("tool builds");
    assert!(matches!(
        tool.activate(""),
        Err(crate::Error::EmptyProgramId)
    ));
    assert!(!tool.is_active());
}

#[test]
fn inactive_tool_measures_nothing() {
    let bus = Bus::builder("rtt").build().expect("bus");
    let tool = RttTool::with_timing(&bus, fast_timing()).expect("tool builds");
    assert!(tool.measure_rtt().is_empty());
}

#[test]
fn round_collects_responses_per_class() {
    let bus = Bus::builder("rtt").build().expect("bus");
    let prober = RttTool::with_timing(&bus, fast_timing()).expect("prober builds");
    let responder = RttTool::with_timing(&bus, fast_timing()).expect("responder builds");

    prober.activate("lcc").expect("activate prober");
    responder.activate("vehicle").expect("activate responder");

    let round = prober.measure_rtt();
    let (best, worst) = round.get("vehicle").copied().expect("vehicle responded");
    assert!(best > 0);
    assert!(best <= worst);
    // The prober never answers its own probe.
    assert!(!round.contains_key("lcc"));
}

#[test]
fn responders_sharing_a_class_fold_into_one_entry() {
    let bus = Bus::builder("rtt").build().expect("bus");
    let prober = RttTool::with_timing(&bus, fast_timing()).expect("prober builds");
    let first = RttTool::with_timing(&bus, fast_timing()).expect("responder builds");
    let second = RttTool::with_timing(&bus, fast_timing()).expect("responder builds");

    prober.activate("lcc").expect("activate prober");
    first.activate("vehicle").expect("activate responder");
    second.activate("vehicle").expect("activate responder");

    let round = prober.measure_rtt();
    assert_eq!(round.len(), 1);
    let (best, worst) = round.get("vehicle").copied().expect("class responded");
    assert!(best <= worst);
}

#[test]
fn responses_with_a_stale_seq_are_discarded() {
    let bus = Bus::builder("rtt").build().expect("bus");
    let prober = RttTool::with_timing(&bus, fast_timing()).expect("prober builds");
    prober.activate("lcc").expect("activate prober");

    // A confused responder that echoes every probe with the wrong counter.
    let answer_writer = bus
        .create_writer::<RoundTripTime>(ROUND_TRIP_TIME_TOPIC, QosProfile::best_effort())
        .expect("writer");
    let _confused = bus
        .subscribe::<RoundTripTime, _>(
            ROUND_TRIP_TIME_TOPIC,
            QosProfile::best_effort(),
            move |batch| {
                for message in batch {
                    if message.is_request {
                        answer_writer
                            .publish(&RoundTripTime {
                                source_id: "vehicle".to_string(),
                                seq: message.seq.wrapping_add(1),
                                is_request: false,
                            })
                            .expect("publish");
                    }
                }
            },
        )
        .expect("subscribe");

    assert!(prober.measure_rtt().is_empty());
}

#[test]
fn aggregator_builds_stats_and_keeps_them_ordered() {
    let bus = Bus::builder("rtt").build().expect("bus");
    let prober = Arc::new(RttTool::with_timing(&bus, fast_timing()).expect("prober builds"));
    let responder = RttTool::with_timing(&bus, fast_timing()).expect("responder builds");

    prober.activate("lcc").expect("activate prober");
    responder.activate("vehicle").expect("activate responder");

    let aggregator = RttAggregator::with_timing(Arc::clone(&prober), fast_timing());

    let stats = wait_for(Duration::from_secs(5), || aggregator.get("vehicle"))
        .expect("vehicle entry appears");
    assert!(stats.current_best <= stats.current_worst);
    assert!(stats.current_worst <= stats.all_time_worst);
    assert!((0.0..=1.0).contains(&stats.missed_fraction));

    aggregator.stop_measurement();
    // Statistics stay readable after the worker is gone.
    assert!(aggregator.get("vehicle").is_some());
}

#[test]
fn silent_class_is_evicted_and_recreated() {
    let bus = Bus::builder("rtt").build().expect("bus");
    let prober = Arc::new(RttTool::with_timing(&bus, fast_timing()).expect("prober builds"));
    let responder = RttTool::with_timing(&bus, fast_timing()).expect("responder builds");

    prober.activate("lcc").expect("activate prober");
    responder.activate("vehicle").expect("activate responder");

    let aggregator = RttAggregator::with_timing(Arc::clone(&prober), fast_timing());
    assert!(wait_for(Duration::from_secs(5), || aggregator.get("vehicle")).is_some());

    // Silence the responder; the entry must disappear wholesale.
    drop(responder);
    let evicted = wait_for(Duration::from_secs(5), || {
        aggregator.get("vehicle").is_none().then_some(())
    });
    assert!(evicted.is_some(), "entry survived the liveness timeout");

    // A returning responder re-creates the entry from scratch.
    let responder = RttTool::with_timing(&bus, fast_timing()).expect("responder builds");
    responder.activate("vehicle").expect("activate responder");
    let stats = wait_for(Duration::from_secs(5), || aggregator.get("vehicle"))
        .expect("entry re-created");
    assert!(stats.current_best > 0);
}

#[test]
fn restart_measurement_clears_state() {
    let bus = Bus::builder("rtt").build().expect("bus");
    let prober = Arc::new(RttTool::with_timing(&bus, fast_timing()).expect("prober builds"));
    let responder = RttTool::with_timing(&bus, fast_timing()).expect("responder builds");

    prober.activate("lcc").expect("activate prober");
    responder.activate("vehicle").expect("activate responder");

    let aggregator = RttAggregator::with_timing(Arc::clone(&prober), fast_timing());
    assert!(wait_for(Duration::from_secs(5), || aggregator.get("vehicle")).is_some());

    // With the responder gone, a restart leaves no way to re-create entries.
    drop(responder);
    aggregator.restart_measurement();
    std::thread::sleep(Duration::from_millis(50));
    assert!(aggregator.get("vehicle").is_none());
}
