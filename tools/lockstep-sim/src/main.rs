// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! lockstep-sim - drive a complete lab session inside one process.
//!
//! `session` wires a trigger source (the LCC role), a snapshot publisher
//! (the middleware role) and an HLC coordinator together and steps them in
//! simulated or real time. `rtt` runs the round-trip measurement loop
//! against a set of responders.

use clap::{Parser, Subcommand};
use colored::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lockstep::bus::{Bus, QosProfile};
use lockstep::hlc::HlcCoordinator;
use lockstep::msg::{
    ReadyStatus, SystemTrigger, VehicleState, VehicleStateList, READY_STATUS_TOPIC,
    SYSTEM_TRIGGER_TOPIC, TRIGGER_STOP, VEHICLE_STATE_LIST_TOPIC,
};
use lockstep::rtt::{RttAggregator, RttTool};
use lockstep::time;

const MS: u64 = 1_000_000;

/// Lockstep lab session driver
#[derive(Parser, Debug)]
#[command(name = "lockstep-sim")]
#[command(version = lockstep::VERSION)]
#[command(about = "Run an in-process lockstep lab session")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Run a coordinator against an in-process trigger source
    Session {
        /// Number of planning steps to drive
        #[arg(short = 'n', long, default_value = "10")]
        steps: u64,

        /// Planning period in milliseconds
        #[arg(short, long, default_value = "100")]
        period_ms: u64,

        /// Vehicle ids handled by the coordinator
        #[arg(short, long, value_delimiter = ',', default_value = "1")]
        vehicles: Vec<u8>,

        /// Use the wall clock instead of simulated time
        #[arg(long)]
        realtime: bool,
    },
    /// Measure round-trip times against in-process responders
    Rtt {
        /// Number of measurement rounds to report
        #[arg(short = 'n', long, default_value = "5")]
        rounds: u64,

        /// Number of responders sharing the "vehicle" class
        #[arg(short, long, default_value = "1")]
        responders: u32,
    },
}

fn main() {
    env_logger::init();

    let args = Args::parse();

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("{}: {}", "Warning".yellow(), e);
    }

    let result = match args.mode {
        Mode::Session {
            steps,
            period_ms,
            vehicles,
            realtime,
        } => run_session(steps, period_ms, vehicles, realtime, &running),
        Mode::Rtt { rounds, responders } => run_rtt(rounds, responders, &running),
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_session(
    steps: u64,
    period_ms: u64,
    vehicles: Vec<u8>,
    realtime: bool,
    running: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let period_ns = period_ms * MS;
    eprintln!(
        "{} Lab session: {} steps, period {} ms, vehicles {:?}, {}",
        ">>>".green().bold(),
        steps,
        period_ms,
        vehicles,
        if realtime { "real time" } else { "simulated time" }
    );

    let bus = Bus::builder("lockstep-sim").build()?;

    let ticks = Arc::new(AtomicU64::new(0));
    let ticks_cb = Arc::clone(&ticks);
    let coordinator = HlcCoordinator::builder(&bus, vehicles.clone())
        .period_ns(period_ns)
        .simulated_time(!realtime)
        .on_first_timestep(|states| {
            eprintln!(
                "    {} first snapshot with {} vehicle(s)",
                "--".dimmed(),
                states.states.len()
            );
        })
        .on_each_timestep(move |states| {
            let n = ticks_cb.fetch_add(1, Ordering::SeqCst) + 1;
            eprintln!(
                "    {} step {:>3} at t={} ms",
                "ok".green(),
                n,
                states.t_now / MS
            );
        })
        .on_cancel_timestep(|| {
            eprintln!("    {} planning step cancelled", "!!".red());
        })
        .on_stop(|| {
            eprintln!("    {} coordinator stopped", "--".dimmed());
        })
        .build()?;

    let driver = {
        let bus = bus.clone();
        let running = Arc::clone(running);
        std::thread::spawn(move || {
            let result = if realtime {
                drive_realtime(&bus, steps, period_ns, &running)
            } else {
                drive_simulated(&bus, steps, period_ns, &running)
            };
            if let Err(e) = result {
                eprintln!("{}: driver failed: {}", "Error".red(), e);
            }
        })
    };

    coordinator.run()?;
    let _ = driver.join();

    eprintln!(
        "{} {} of {} steps completed",
        "===".bold(),
        ticks.load(Ordering::SeqCst),
        steps
    );
    Ok(())
}

/// LCC + middleware role in simulated time: answer each announced deadline
/// with a fresh snapshot and the matching trigger.
fn drive_simulated(
    bus: &Bus,
    steps: u64,
    period_ns: u64,
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    let ready_reader =
        bus.create_reader::<ReadyStatus>(READY_STATUS_TOPIC, QosProfile::transient_local())?;
    let trigger_writer =
        bus.create_writer::<SystemTrigger>(SYSTEM_TRIGGER_TOPIC, QosProfile::reliable())?;
    let state_writer =
        bus.create_writer::<VehicleStateList>(VEHICLE_STATE_LIST_TOPIC, QosProfile::best_effort())?;

    let mut last_triggered = None;
    let mut steps_done = 0;

    while steps_done < steps && running.load(Ordering::SeqCst) {
        let mut announced = None;
        for sample in ready_reader.take() {
            if sample.valid && sample.data.next_start_stamp > 0 {
                announced = Some(sample.data.next_start_stamp);
            }
        }

        if let Some(deadline) = announced {
            if last_triggered != Some(deadline) {
                state_writer.publish(&snapshot(deadline, period_ns))?;
                trigger_writer.publish(&SystemTrigger {
                    next_start: deadline,
                })?;
                last_triggered = Some(deadline);
                steps_done += 1;
            }
        }

        std::thread::sleep(Duration::from_millis(2));
    }

    trigger_writer.publish(&SystemTrigger {
        next_start: TRIGGER_STOP,
    })?;
    Ok(())
}

/// LCC + middleware role in real time: negotiate a start instant, then pump
/// snapshots at the planning rate.
fn drive_realtime(
    bus: &Bus,
    steps: u64,
    period_ns: u64,
    running: &AtomicBool,
) -> Result<(), Box<dyn std::error::Error>> {
    let ready_reader =
        bus.create_reader::<ReadyStatus>(READY_STATUS_TOPIC, QosProfile::transient_local())?;
    let trigger_writer =
        bus.create_writer::<SystemTrigger>(SYSTEM_TRIGGER_TOPIC, QosProfile::reliable())?;
    let state_writer =
        bus.create_writer::<VehicleStateList>(VEHICLE_STATE_LIST_TOPIC, QosProfile::best_effort())?;

    // Wait for the coordinator's readiness announcement.
    let deadline = Instant::now() + Duration::from_secs(10);
    'outer: while running.load(Ordering::SeqCst) {
        for sample in ready_reader.take() {
            if sample.valid && sample.data.next_start_stamp == 0 {
                break 'outer;
            }
        }
        if Instant::now() >= deadline {
            return Err("no participant announced readiness".into());
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    // Aligned start half a second out.
    let start = ((time::monotonic_ns() + 500 * MS) / period_ns + 1) * period_ns;
    trigger_writer.publish(&SystemTrigger { next_start: start })?;

    for step in 0..steps {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let t = start + step * period_ns;
        time::sleep_until_ns(t.saturating_sub(period_ns / 2));
        state_writer.publish(&snapshot(t, period_ns))?;
    }

    time::sleep_until_ns(start + steps * period_ns);
    trigger_writer.publish(&SystemTrigger {
        next_start: TRIGGER_STOP,
    })?;
    Ok(())
}

fn snapshot(t_now: u64, period_ns: u64) -> VehicleStateList {
    let phase = (t_now / period_ns) as f64;
    VehicleStateList {
        t_now,
        period_ns,
        states: vec![VehicleState {
            vehicle_id: 1,
            pose: lockstep::msg::Pose2D {
                x: phase.cos(),
                y: phase.sin(),
                yaw: phase,
            },
            speed: 1.0,
        }],
    }
}

fn run_rtt(
    rounds: u64,
    responders: u32,
    running: &Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!(
        "{} RTT measurement: {} rounds, {} responder(s)",
        ">>>".green().bold(),
        rounds,
        responders
    );

    let bus = Bus::builder("lockstep-rtt").build()?;

    let mut pool = Vec::new();
    for _ in 0..responders {
        let responder = RttTool::new(&bus)?;
        responder.activate("vehicle")?;
        pool.push(responder);
    }

    let prober = Arc::new(RttTool::new(&bus)?);
    prober.activate("lcc")?;
    let aggregator = RttAggregator::new(Arc::clone(&prober));

    let mut reported = 0;
    while reported < rounds && running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(700));
        match aggregator.get("vehicle") {
            Some(stats) => {
                reported += 1;
                println!(
                    "  {} best {:>8.3} ms | worst {:>8.3} ms | all-time worst {:>8.3} ms | missed {:>5.1}%",
                    "vehicle:".cyan(),
                    stats.current_best as f64 / 1e6,
                    stats.current_worst as f64 / 1e6,
                    stats.all_time_worst as f64 / 1e6,
                    stats.missed_fraction * 100.0
                );
            }
            None => eprintln!("  {}", "waiting for responses...".dimmed()),
        }
    }

    aggregator.stop_measurement();
    eprintln!("{} measurement stopped", "===".bold());
    Ok(())
}
