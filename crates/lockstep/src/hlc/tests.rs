// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coordinator behavior tests: callback ordering, silent tick skipping,
//! overrun cancellation, fatal callback failures.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::bus::{Bus, QosProfile};
use crate::msg::{
    StopRequest, SystemTrigger, VehicleState, VehicleStateList, STOP_REQUEST_TOPIC,
    SYSTEM_TRIGGER_TOPIC, TRIGGER_STOP, VEHICLE_STATE_LIST_TOPIC,
};
use crate::time;

use super::HlcCoordinator;

const MS: u64 = 1_000_000;

/// Middleware stand-in: publishes snapshots at a fixed rate until dropped.
struct SnapshotPump {
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SnapshotPump {
    fn start(bus: &Bus, period: Duration) -> Self {
        let writer = bus
            .create_writer::<VehicleStateList>(VEHICLE_STATE_LIST_TOPIC, QosProfile::best_effort())
            .expect("state writer");
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let worker = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                let list = VehicleStateList {
                    t_now: time::monotonic_ns(),
                    period_ns: period.as_nanos() as u64,
                    states: vec![VehicleState {
                        vehicle_id: 4,
                        ..VehicleState::default()
                    }],
                };
                writer.publish(&list).expect("state publish");
                std::thread::sleep(period);
            }
        });

        Self {
            stop,
            worker: Some(worker),
        }
    }
}

impl Drop for SnapshotPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn send_stop(bus: &Bus) {
    bus.create_writer::<SystemTrigger>(SYSTEM_TRIGGER_TOPIC, QosProfile::reliable())
        .expect("trigger writer")
        .publish(&SystemTrigger {
            next_start: TRIGGER_STOP,
        })
        .expect("stop publish");
}

#[test]
fn builder_rejects_empty_vehicle_list() {
    let bus = Bus::builder("hlc").build().expect("bus");
    assert!(matches!(
        HlcCoordinator::builder(&bus, vec![]).build(),
        Err(crate::Error::NoVehicles)
    ));
}

#[test]
fn source_id_is_sorted_comma_join() {
    let bus = Bus::builder("hlc").build().expect("bus");
    let coordinator = HlcCoordinator::builder(&bus, vec![12, 3, 7])
        .build()
        .expect("coordinator builds");
    assert_eq!(coordinator.source_id(), "3,7,12");
}

#[test]
fn callbacks_run_in_protocol_order_and_stop_is_last() {
    let bus = Bus::builder("hlc").build().expect("bus");
    let events = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let (first_log, each_log, stop_log) = (events.clone(), events.clone(), events.clone());
    let coordinator = HlcCoordinator::builder(&bus, vec![4])
        .period_ns(30 * MS)
        .wait_for_start(false)
        .on_first_timestep(move |_| first_log.lock().expect("test mutex").push("first"))
        .on_each_timestep(move |_| each_log.lock().expect("test mutex").push("each"))
        .on_stop(move || stop_log.lock().expect("test mutex").push("stop"))
        .build()
        .expect("coordinator builds");

    let _pump = SnapshotPump::start(&bus, Duration::from_millis(30));
    let runner = std::thread::spawn(move || coordinator.run());

    // Let a few ticks through, then stop the lab.
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if events.lock().expect("test mutex").len() >= 4 {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    send_stop(&bus);
    runner
        .join()
        .expect("runner joins")
        .expect("run exits cleanly");

    let log = events.lock().expect("test mutex").clone();
    assert_eq!(log.first(), Some(&"first"));
    assert_eq!(log.last(), Some(&"stop"));
    assert_eq!(log.iter().filter(|e| **e == "stop").count(), 1);
    assert!(log.iter().filter(|e| **e == "each").count() >= 2);
    // Everything between the first and the stop is a planning step.
    assert!(log[1..log.len() - 1].iter().all(|e| *e == "each"));
}

#[test]
fn ticks_without_fresh_state_are_skipped_silently() {
    let bus = Bus::builder("hlc").build().expect("bus");
    let each_count = Arc::new(AtomicU64::new(0));
    let each_clone = Arc::clone(&each_count);

    let coordinator = HlcCoordinator::builder(&bus, vec![4])
        .period_ns(20 * MS)
        .wait_for_start(false)
        .on_each_timestep(move |_| {
            each_clone.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("coordinator builds");

    let state_writer = bus
        .create_writer::<VehicleStateList>(VEHICLE_STATE_LIST_TOPIC, QosProfile::best_effort())
        .expect("state writer");

    let runner = std::thread::spawn(move || coordinator.run());

    // Two snapshots, far fewer than the elapsed periods; wait for each to
    // be consumed so they are never folded into one tick.
    for expected in 1..=2u64 {
        state_writer
            .publish(&VehicleStateList {
                t_now: time::monotonic_ns(),
                period_ns: 20 * MS,
                states: vec![VehicleState::default()],
            })
            .expect("state publish");
        let deadline = Instant::now() + Duration::from_secs(2);
        while each_count.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    send_stop(&bus);
    runner
        .join()
        .expect("runner joins")
        .expect("run exits cleanly");

    assert_eq!(each_count.load(Ordering::SeqCst), 2);
}

#[test]
fn overrunning_planner_is_cancelled_and_steps_never_overlap() {
    let bus = Bus::builder("hlc").build().expect("bus");

    let cancels = Arc::new(AtomicU64::new(0));
    let steps = Arc::new(AtomicU64::new(0));
    let in_step = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));

    let (cancels_cb, steps_cb) = (cancels.clone(), steps.clone());
    let (in_step_cb, overlapped_cb) = (in_step.clone(), overlapped.clone());

    let coordinator = HlcCoordinator::builder(&bus, vec![4])
        .period_ns(50 * MS)
        .wait_for_start(false)
        .on_each_timestep(move |_| {
            if in_step_cb.swap(true, Ordering::SeqCst) {
                overlapped_cb.store(true, Ordering::SeqCst);
            }
            steps_cb.fetch_add(1, Ordering::SeqCst);
            // Planning takes just under two periods.
            std::thread::sleep(Duration::from_millis(90));
            in_step_cb.store(false, Ordering::SeqCst);
        })
        .on_cancel_timestep(move || {
            cancels_cb.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("coordinator builds");

    let _pump = SnapshotPump::start(&bus, Duration::from_millis(50));
    let runner = std::thread::spawn(move || coordinator.run());

    std::thread::sleep(Duration::from_millis(600));
    send_stop(&bus);
    runner
        .join()
        .expect("runner joins")
        .expect("run exits cleanly");

    assert!(
        cancels.load(Ordering::SeqCst) >= 2,
        "expected repeated cancellations, saw {}",
        cancels.load(Ordering::SeqCst)
    );
    assert!(steps.load(Ordering::SeqCst) >= 2);
    assert!(!overlapped.load(Ordering::SeqCst), "planning steps overlapped");
}

#[test]
fn panicking_planner_is_fatal_but_stop_still_runs() {
    let bus = Bus::builder("hlc").build().expect("bus");
    let stopped = Arc::new(AtomicU64::new(0));
    let stopped_clone = Arc::clone(&stopped);

    let coordinator = HlcCoordinator::builder(&bus, vec![4])
        .period_ns(20 * MS)
        .wait_for_start(false)
        .on_each_timestep(|_| panic!("planner exploded"))
        .on_stop(move || {
            stopped_clone.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("coordinator builds");

    let _pump = SnapshotPump::start(&bus, Duration::from_millis(20));
    let result = std::thread::spawn(move || coordinator.run())
        .join()
        .expect("runner joins");

    assert!(matches!(result, Err(crate::Error::CallbackPanicked)));
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_handle_ends_the_run_without_a_trigger() {
    let bus = Bus::builder("hlc").build().expect("bus");
    let stopped = Arc::new(AtomicU64::new(0));
    let stopped_clone = Arc::clone(&stopped);

    let coordinator = HlcCoordinator::builder(&bus, vec![4])
        .period_ns(20 * MS)
        .wait_for_start(false)
        .on_stop(move || {
            stopped_clone.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("coordinator builds");

    let handle = coordinator.stop_handle();
    let runner = std::thread::spawn(move || coordinator.run());

    std::thread::sleep(Duration::from_millis(80));
    handle.stop();
    runner
        .join()
        .expect("runner joins")
        .expect("run exits cleanly");
    assert_eq!(stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_during_start_negotiation_invokes_on_stop_only() {
    let bus = Bus::builder("hlc").build().expect("bus");
    let events = Arc::new(Mutex::new(Vec::<&'static str>::new()));
    let (each_log, stop_log) = (events.clone(), events.clone());

    let coordinator = HlcCoordinator::builder(&bus, vec![4])
        .period_ns(20 * MS)
        .wait_for_start(true)
        .on_each_timestep(move |_| each_log.lock().expect("test mutex").push("each"))
        .on_stop(move || stop_log.lock().expect("test mutex").push("stop"))
        .build()
        .expect("coordinator builds");

    let runner = std::thread::spawn(move || coordinator.run());
    std::thread::sleep(Duration::from_millis(50));
    send_stop(&bus);
    runner
        .join()
        .expect("runner joins")
        .expect("run exits cleanly");

    assert_eq!(events.lock().expect("test mutex").clone(), vec!["stop"]);
}

#[test]
fn stop_requester_publishes_on_the_stop_topic() {
    let bus = Bus::builder("hlc").build().expect("bus");
    let coordinator = HlcCoordinator::builder(&bus, vec![4])
        .build()
        .expect("coordinator builds");

    let reader = bus
        .create_reader::<StopRequest>(STOP_REQUEST_TOPIC, QosProfile::reliable())
        .expect("stop reader");

    coordinator
        .stop_requester()
        .request_stop(4)
        .expect("request publishes");

    let samples = reader.take();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].data.vehicle_id, 4);
}
