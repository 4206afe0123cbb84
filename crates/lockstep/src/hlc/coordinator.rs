// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Coordinator state machine and planning worker.

use crossbeam::channel::{unbounded, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::bus::{Bus, DataReader, DataWriter, QosProfile};
use crate::error::{Error, Result};
use crate::msg::{
    ready_source_id, StopRequest, VehicleStateList, STOP_REQUEST_TOPIC, VEHICLE_STATE_LIST_TOPIC,
};
use crate::timer::{self, StopHandle, Timer, TimerConfig};

use super::{HookCallback, SnapshotCallback};

/// Builder for [`HlcCoordinator`].
pub struct HlcCoordinatorBuilder {
    bus: Bus,
    vehicle_ids: Vec<u8>,
    period_ns: u64,
    offset_ns: u64,
    wait_for_start: bool,
    simulated_time: bool,
    simulated_time_allowed: bool,
    on_first_timestep: Option<SnapshotCallback>,
    on_each_timestep: Option<SnapshotCallback>,
    on_cancel_timestep: Option<HookCallback>,
    on_stop: Option<HookCallback>,
}

impl HlcCoordinatorBuilder {
    fn new(bus: Bus, vehicle_ids: Vec<u8>) -> Self {
        Self {
            bus,
            vehicle_ids,
            period_ns: 100_000_000,
            offset_ns: 0,
            wait_for_start: true,
            simulated_time: false,
            simulated_time_allowed: true,
            on_first_timestep: None,
            on_each_timestep: None,
            on_cancel_timestep: None,
            on_stop: None,
        }
    }

    /// Planning period; one planning step must fit into it.
    #[must_use]
    pub fn period_ns(mut self, period_ns: u64) -> Self {
        self.period_ns = period_ns;
        self
    }

    /// Phase offset of the tick grid.
    #[must_use]
    pub fn offset_ns(mut self, offset_ns: u64) -> Self {
        self.offset_ns = offset_ns;
        self
    }

    /// Whether the underlying timer negotiates its start instant.
    #[must_use]
    pub fn wait_for_start(mut self, wait: bool) -> Self {
        self.wait_for_start = wait;
        self
    }

    /// Drive ticks from coordinator triggers instead of the wall clock.
    #[must_use]
    pub fn simulated_time(mut self, simulated: bool) -> Self {
        self.simulated_time = simulated;
        self
    }

    /// Permit or forbid simulated time for this deployment.
    #[must_use]
    pub fn simulated_time_allowed(mut self, allowed: bool) -> Self {
        self.simulated_time_allowed = allowed;
        self
    }

    /// Called at most once, before the first planning step.
    #[must_use]
    pub fn on_first_timestep<F>(mut self, callback: F) -> Self
    where
        F: FnMut(VehicleStateList) + Send + 'static,
    {
        self.on_first_timestep = Some(Box::new(callback));
        self
    }

    /// The planning step, called once per tick with fresh vehicle state.
    #[must_use]
    pub fn on_each_timestep<F>(mut self, callback: F) -> Self
    where
        F: FnMut(VehicleStateList) + Send + 'static,
    {
        self.on_each_timestep = Some(Box::new(callback));
        self
    }

    /// Called when a planning step fails to finish within one period.
    #[must_use]
    pub fn on_cancel_timestep<F>(mut self, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_cancel_timestep = Some(Box::new(callback));
        self
    }

    /// Called exactly once, last, when the coordinator exits.
    #[must_use]
    pub fn on_stop<F>(mut self, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        self.on_stop = Some(Box::new(callback));
        self
    }

    /// Build the coordinator and its endpoints.
    ///
    /// # Errors
    ///
    /// [`Error::NoVehicles`] for an empty vehicle list; timer construction
    /// errors per [`timer::create`].
    pub fn build(self) -> Result<HlcCoordinator> {
        if self.vehicle_ids.is_empty() {
            return Err(Error::NoVehicles);
        }

        let source_id = ready_source_id(&self.vehicle_ids);
        let timer_config = TimerConfig::new(&source_id, self.period_ns)
            .offset_ns(self.offset_ns)
            .wait_for_start(self.wait_for_start)
            .simulated_time(self.simulated_time)
            .simulated_time_allowed(self.simulated_time_allowed);
        let timer = timer::create(&self.bus, timer_config)?;

        let state_reader = self
            .bus
            .create_reader::<VehicleStateList>(VEHICLE_STATE_LIST_TOPIC, QosProfile::best_effort())?;
        let stop_writer = self
            .bus
            .create_writer::<StopRequest>(STOP_REQUEST_TOPIC, QosProfile::reliable())?;

        Ok(HlcCoordinator {
            vehicle_ids: self.vehicle_ids,
            source_id,
            timer,
            state_reader,
            stop_writer,
            on_first_timestep: self.on_first_timestep,
            on_each_timestep: self.on_each_timestep,
            on_cancel_timestep: self.on_cancel_timestep,
            on_stop: self.on_stop,
        })
    }
}

/// Drives per-vehicle planning in lockstep with the lab.
///
/// Owns the timer, the bus endpoints and the four user callbacks; see the
/// [module docs](super) for the callback contract.
///
/// ```rust,no_run
/// use lockstep::bus::Bus;
/// use lockstep::hlc::HlcCoordinator;
///
/// # fn main() -> lockstep::Result<()> {
/// let bus = Bus::builder("hlc").build()?;
/// let coordinator = HlcCoordinator::builder(&bus, vec![4])
///     .period_ns(100_000_000)
///     .on_each_timestep(|states| {
///         // plan one step for vehicle 4 from `states`
///         let _ = states;
///     })
///     .build()?;
///
/// coordinator.run()?; // blocks until a stop trigger
/// # Ok(())
/// # }
/// ```
pub struct HlcCoordinator {
    vehicle_ids: Vec<u8>,
    source_id: String,
    timer: Box<dyn Timer>,
    state_reader: DataReader<VehicleStateList>,
    stop_writer: DataWriter<StopRequest>,
    on_first_timestep: Option<SnapshotCallback>,
    on_each_timestep: Option<SnapshotCallback>,
    on_cancel_timestep: Option<HookCallback>,
    on_stop: Option<HookCallback>,
}

impl HlcCoordinator {
    /// Start building a coordinator for the given vehicles.
    #[must_use]
    pub fn builder(bus: &Bus, vehicle_ids: Vec<u8>) -> HlcCoordinatorBuilder {
        HlcCoordinatorBuilder::new(bus.clone(), vehicle_ids)
    }

    /// Canonical ready-status identity (sorted ids joined by `,`).
    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Vehicles this coordinator plans for.
    #[must_use]
    pub fn vehicle_ids(&self) -> &[u8] {
        &self.vehicle_ids
    }

    /// Wait-free handle that stops the coordinator from other threads or
    /// from inside callbacks.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.timer.stop_handle()
    }

    /// Cloneable endpoint for publishing [`StopRequest`] escalations; the
    /// coordinator itself still exits only on the matching stop trigger.
    #[must_use]
    pub fn stop_requester(&self) -> StopRequester {
        StopRequester {
            writer: self.stop_writer.clone(),
        }
    }

    fn log_callback_summary(&self) {
        let mut set = Vec::new();
        let mut unset = Vec::new();
        for (name, present) in [
            ("on_first_timestep", self.on_first_timestep.is_some()),
            ("on_each_timestep", self.on_each_timestep.is_some()),
            ("on_cancel_timestep", self.on_cancel_timestep.is_some()),
            ("on_stop", self.on_stop.is_some()),
        ] {
            if present {
                set.push(name);
            } else {
                unset.push(name);
            }
        }
        log::info!(
            "[hlc] {}: started; callbacks set: [{}], unset: [{}]",
            self.source_id,
            set.join(", "),
            unset.join(", ")
        );
    }

    /// Run the coordinator on the calling thread until a stop trigger or a
    /// [`StopHandle::stop`] ends it. Readiness announcement and start
    /// negotiation are handled by the owned timer.
    ///
    /// Without `on_cancel_timestep`, an overrunning planning step only delays
    /// the next dispatch (degraded operation: the planner cannot be told to
    /// wrap up early).
    ///
    /// # Errors
    ///
    /// [`Error::CallbackPanicked`] when a user callback panicked; `on_stop`
    /// has run by then and the coordinator has shut down cleanly.
    pub fn run(mut self) -> Result<()> {
        self.log_callback_summary();

        let stop_handle = self.timer.stop_handle();
        let mut planner = PlanningWorker::spawn(self.on_each_timestep.take());
        let dispatcher = planner.dispatcher();

        let fatal = Arc::new(AtomicBool::new(false));
        let fatal_in_tick = Arc::clone(&fatal);
        let stop_in_tick = stop_handle.clone();
        let state_reader = self.state_reader;
        let mut on_first = self.on_first_timestep.take();
        let mut on_cancel = self.on_cancel_timestep.take();
        let source_id = self.source_id.clone();

        let mut first_done = false;
        let mut cancel_sent = false;

        let tick = Box::new(move |t_now: u64| {
            if dispatcher.panicked() {
                fatal_in_tick.store(true, Ordering::Release);
                stop_in_tick.stop();
                return;
            }

            // Poll the snapshot reader exactly once; newest sample wins.
            let mut newest = None;
            for sample in state_reader.take() {
                if sample.valid {
                    newest = Some(sample.data);
                }
            }
            let Some(states) = newest else {
                // The planner only runs on fresh state.
                log::trace!("[hlc] {}: no new vehicle state, tick {} skipped", source_id, t_now);
                return;
            };

            if !first_done {
                if let Some(cb) = on_first.as_mut() {
                    let snapshot = states.clone();
                    if catch_unwind(AssertUnwindSafe(|| cb(snapshot))).is_err() {
                        log::error!("[hlc] {}: on_first_timestep panicked", source_id);
                        fatal_in_tick.store(true, Ordering::Release);
                        stop_in_tick.stop();
                        return;
                    }
                }
                first_done = true;
            }

            if dispatcher.busy() {
                // The previous step is still planning. Tell the user once and
                // let the step finish in the background; its result is stale.
                if !cancel_sent {
                    log::warn!(
                        "[hlc] {}: planning step overran its period, cancelling at {}",
                        source_id,
                        t_now
                    );
                    if let Some(cb) = on_cancel.as_mut() {
                        if catch_unwind(AssertUnwindSafe(|| cb())).is_err() {
                            log::error!("[hlc] {}: on_cancel_timestep panicked", source_id);
                            fatal_in_tick.store(true, Ordering::Release);
                            stop_in_tick.stop();
                            return;
                        }
                    }
                    cancel_sent = true;
                }
                return;
            }

            cancel_sent = false;
            dispatcher.dispatch(states);
        });

        // No stop hook: a stop trigger deactivates the timer, start()
        // returns, and the epilogue below runs.
        let start_result = self.timer.start(tick);

        // A lingering planning step completes before on_stop; on_stop is the
        // last callback and it runs exactly once.
        planner.shutdown();

        if let Some(mut cb) = self.on_stop.take() {
            if catch_unwind(AssertUnwindSafe(|| cb())).is_err() {
                log::error!("[hlc] on_stop panicked");
                fatal.store(true, Ordering::Release);
            }
        }

        start_result?;
        if fatal.load(Ordering::Acquire) || planner.panicked() {
            return Err(Error::CallbackPanicked);
        }
        Ok(())
    }
}

/// Cloneable publisher of [`StopRequest`] messages.
#[derive(Clone)]
pub struct StopRequester {
    writer: DataWriter<StopRequest>,
}

impl StopRequester {
    /// Ask the lab to stop on behalf of `vehicle_id`.
    pub fn request_stop(&self, vehicle_id: u8) -> Result<()> {
        log::info!("[hlc] vehicle {} requests stop", vehicle_id);
        self.writer.publish(&StopRequest { vehicle_id })
    }
}

// ============================================================================
// Planning worker
// ============================================================================

struct PlannerShared {
    busy: AtomicBool,
    panicked: AtomicBool,
}

/// Handle used by the tick callback to drive the planning worker.
struct PlanningDispatcher {
    tx: Option<Sender<VehicleStateList>>,
    shared: Arc<PlannerShared>,
}

impl PlanningDispatcher {
    fn dispatch(&self, states: VehicleStateList) {
        let Some(tx) = &self.tx else {
            return; // no planning callback configured
        };
        // Raised before the send so the boundary check never races the
        // worker picking the job up.
        self.shared.busy.store(true, Ordering::Release);
        if tx.send(states).is_err() {
            self.shared.busy.store(false, Ordering::Release);
        }
    }

    fn busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    fn panicked(&self) -> bool {
        self.shared.panicked.load(Ordering::Acquire)
    }
}

/// Owns the planning thread; at most one step runs at a time.
struct PlanningWorker {
    tx: Option<Sender<VehicleStateList>>,
    shared: Arc<PlannerShared>,
    worker: Option<JoinHandle<()>>,
}

impl PlanningWorker {
    fn spawn(callback: Option<SnapshotCallback>) -> Self {
        let shared = Arc::new(PlannerShared {
            busy: AtomicBool::new(false),
            panicked: AtomicBool::new(false),
        });

        let Some(mut callback) = callback else {
            return Self {
                tx: None,
                shared,
                worker: None,
            };
        };

        let (tx, rx) = unbounded::<VehicleStateList>();
        let worker_shared = Arc::clone(&shared);

        #[allow(clippy::expect_used)] // thread spawn failure is unrecoverable
        let worker = std::thread::Builder::new()
            .name("lockstep-plan".to_string())
            .spawn(move || {
                for states in rx.iter() {
                    let result = catch_unwind(AssertUnwindSafe(|| callback(states)));
                    worker_shared.busy.store(false, Ordering::Release);
                    if result.is_err() {
                        log::error!("[hlc] on_each_timestep panicked");
                        worker_shared.panicked.store(true, Ordering::Release);
                        break;
                    }
                }
            })
            .expect("failed to spawn planning thread");

        Self {
            tx: Some(tx),
            shared,
            worker: Some(worker),
        }
    }

    fn dispatcher(&self) -> PlanningDispatcher {
        PlanningDispatcher {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    fn panicked(&self) -> bool {
        self.shared.panicked.load(Ordering::Acquire)
    }

    /// Disconnect the job queue and wait for a lingering step to finish.
    fn shutdown(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
