//! The lifecycle coordinator: reuse or start a companion, wait for it, run a task, always clean up.
use std::{
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};

use strum_macros::{AsRefStr, Display};
use tracing::{debug, error, info, warn};

use crate::{
    endpoint::{Probe, ServiceEndpoint},
    error::HarnessError,
    process::{LaunchSpec, OutputEvent, ProcessControl, StopMode, SupervisedProcess},
    readiness::{ReadinessPolicy, ReadinessWaiter, ReadyMarkers, wait_for_markers},
    reclaim::{Protocol, Reclaim},
    registry::{CleanupGuard, LifecycleRegistry},
};

/// How long watch mode blocks on companion output before checking again.
const WATCH_POLL: Duration = Duration::from_secs(1);

/// States of one coordinator invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CoordinatorState {
    Idle,
    CheckingExisting,
    Reuse,
    Starting,
    WaitingReady,
    RunningTask,
    CleaningUp,
    Done,
}

/// What to supervise for one invocation.
#[derive(Debug, Clone)]
pub struct CompanionPlan {
    /// Name used in log messages.
    pub label: String,
    /// Endpoint probed for reuse and readiness.
    pub endpoint: Option<ServiceEndpoint>,
    /// How to start the companion when it is not already up.
    pub launch: Option<LaunchSpec>,
    /// Ports force-freed during cleanup, whether the companion was started or reused.
    pub reclaim_ports: Vec<u16>,
    /// How the companion is asked to stop.
    pub stop_mode: StopMode,
}

impl CompanionPlan {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            endpoint: None,
            launch: None,
            reclaim_ports: Vec::new(),
            stop_mode: StopMode::Kill,
        }
    }

    pub fn with_endpoint(mut self, endpoint: ServiceEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_launch(mut self, launch: LaunchSpec) -> Self {
        self.launch = Some(launch);
        self
    }

    pub fn with_reclaim_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        for port in ports {
            if !self.reclaim_ports.contains(&port) {
                self.reclaim_ports.push(port);
            }
        }
        self
    }

    pub fn with_stop_mode(mut self, mode: StopMode) -> Self {
        self.stop_mode = mode;
        self
    }
}

/// The only externally observable outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorResult {
    pub success: bool,
}

enum WatchSignal {
    Rebuilt,
    Closed,
}

/// Orchestrates one companion and one task per [`LifecycleCoordinator::run`] call.
pub struct LifecycleCoordinator<'r, P, S, R> {
    waiter: ReadinessWaiter<P>,
    control: S,
    reclaimer: R,
    registry: &'r LifecycleRegistry,
    history: Vec<CoordinatorState>,
}

impl<'r, P, S, R> LifecycleCoordinator<'r, P, S, R>
where
    P: Probe,
    S: ProcessControl,
    R: Reclaim,
{
    pub fn new(probe: P, control: S, reclaimer: R, registry: &'r LifecycleRegistry) -> Self {
        Self {
            waiter: ReadinessWaiter::new(probe),
            control,
            reclaimer,
            registry,
            history: vec![CoordinatorState::Idle],
        }
    }

    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        self.history
            .last()
            .copied()
            .unwrap_or(CoordinatorState::Idle)
    }

    /// Every state of the last run, in order.
    pub fn history(&self) -> &[CoordinatorState] {
        &self.history
    }

    pub fn control(&self) -> &S {
        &self.control
    }

    pub fn reclaimer(&self) -> &R {
        &self.reclaimer
    }

    fn transition(&mut self, next: CoordinatorState) {
        debug!("coordinator: {} -> {next}", self.state());
        self.history.push(next);
    }

    /// Runs `task` once the companion in `plan` is ready (or right away without a plan).
    ///
    /// With `watch`, the task runs again each time a started companion prints its ready markers
    /// anew, until the companion exits. Cleanup runs exactly once on every path, and its errors
    /// never change the result: a started companion is terminated, and the planned ports are
    /// reclaimed whenever a companion was started or reused.
    pub fn run<T>(
        &mut self,
        plan: Option<&CompanionPlan>,
        policy: &ReadinessPolicy,
        watch: bool,
        mut task: T,
    ) -> CoordinatorResult
    where
        T: FnMut() -> Result<bool, HarnessError>,
    {
        self.history = vec![CoordinatorState::Idle];
        let mut process: Option<SupervisedProcess> = None;
        let mut guard: Option<CleanupGuard<'r>> = None;

        let outcome = self.drive(plan, policy, watch, &mut task, &mut process, &mut guard);

        self.transition(CoordinatorState::CleaningUp);
        if let Some(process) = process.as_mut() {
            self.terminate(plan, process);
        }
        if self.engaged() {
            self.reclaim(plan);
        }
        drop(guard);
        self.transition(CoordinatorState::Done);

        let success = match outcome {
            Ok(success) => success,
            Err(err) => {
                error!("{err}");
                false
            }
        };
        CoordinatorResult { success }
    }

    fn drive<T>(
        &mut self,
        plan: Option<&CompanionPlan>,
        policy: &ReadinessPolicy,
        watch: bool,
        task: &mut T,
        process: &mut Option<SupervisedProcess>,
        guard: &mut Option<CleanupGuard<'r>>,
    ) -> Result<bool, HarnessError>
    where
        T: FnMut() -> Result<bool, HarnessError>,
    {
        self.transition(CoordinatorState::CheckingExisting);
        let Some(plan) = plan else {
            debug!("No companion to supervise");
            return self.run_task(None, &mut ReadyMarkers::default(), watch, task);
        };

        if let Some(endpoint) = &plan.endpoint
            && self.waiter.is_up(endpoint)
        {
            if !policy.reuse_existing_server {
                return Err(HarnessError::config(format!(
                    "{endpoint} is already in use by another process; stop it or allow reuseExistingServer"
                )));
            }
            info!("Reusing '{}' already serving at {endpoint}", plan.label);
            self.transition(CoordinatorState::Reuse);
            *guard = self.register_shutdown(plan, None);
            return self.run_task(None, &mut ReadyMarkers::default(), watch, task);
        }

        let Some(launch) = &plan.launch else {
            let target = plan
                .endpoint
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| plan.label.clone());
            return Err(HarnessError::config(format!(
                "Nothing is serving at {target} and no command to start '{}' was given",
                plan.label
            )));
        };

        self.transition(CoordinatorState::Starting);
        let started = process.insert(self.control.start(launch)?);
        *guard = self.register_shutdown(plan, Some(started.pid()));

        self.transition(CoordinatorState::WaitingReady);
        let deadline = Instant::now() + policy.timeout;
        let mut markers = ReadyMarkers::new(launch.ready_when.iter().cloned());
        if !markers.is_empty() {
            wait_for_markers(started, &mut markers, policy)?;
        }
        match &plan.endpoint {
            Some(endpoint) => {
                let remaining = ReadinessPolicy {
                    timeout: deadline.saturating_duration_since(Instant::now()),
                    ..*policy
                };
                self.waiter
                    .wait_until_ready_or(endpoint, &remaining, || {
                        if started.has_exited() {
                            return Err(HarnessError::CompanionExited {
                                command: started.command_line().to_string(),
                                status: started.exit_description(),
                            });
                        }
                        Ok(())
                    })?;
            }
            None if markers.is_empty() => {
                warn!(
                    "'{}' has neither an endpoint nor ready markers; assuming it is ready",
                    plan.label
                );
            }
            None => {}
        }
        info!("'{}' is ready", plan.label);
        if !watch {
            // Nothing reads companion output past this point.
            started.discard_output();
        }

        self.run_task(Some(started), &mut markers, watch, task)
    }

    fn run_task<T>(
        &mut self,
        mut process: Option<&mut SupervisedProcess>,
        markers: &mut ReadyMarkers,
        watch: bool,
        task: &mut T,
    ) -> Result<bool, HarnessError>
    where
        T: FnMut() -> Result<bool, HarnessError>,
    {
        self.transition(CoordinatorState::RunningTask);
        let mut success = invoke(task)?;
        if !watch {
            return Ok(success);
        }

        let Some(process) = process.as_deref_mut() else {
            return Ok(success);
        };
        if markers.is_empty() {
            debug!("No ready markers to watch for; not re-running");
            return Ok(success);
        }

        loop {
            markers.reset();
            match wait_for_rebuild(process, markers) {
                WatchSignal::Rebuilt => {
                    info!("`{}` is ready again; re-running", process.command_line());
                    self.transition(CoordinatorState::RunningTask);
                    success = invoke(task)?;
                }
                WatchSignal::Closed => {
                    let clean_exit = process.exited_successfully();
                    if clean_exit {
                        info!("`{}` exited; leaving watch mode", process.command_line());
                    } else {
                        let status = process.exit_description();
                        warn!(
                            "`{}` failed ({status}); leaving watch mode",
                            process.command_line()
                        );
                    }
                    return Ok(success && clean_exit);
                }
            }
        }
    }

    /// Whether this run got past the conflict check and took charge of a companion.
    fn engaged(&self) -> bool {
        self.history
            .iter()
            .any(|state| matches!(state, CoordinatorState::Reuse | CoordinatorState::Starting))
    }

    /// Registers the interrupt-time counterpart of CLEANING_UP: stop the started tree with the
    /// plan's stop mode, then free every planned port.
    fn register_shutdown(
        &self,
        plan: &CompanionPlan,
        pid: Option<u32>,
    ) -> Option<CleanupGuard<'r>> {
        let stop = pid.and_then(|pid| self.control.stop_hook(pid, plan.stop_mode));
        let reclaim = if plan.reclaim_ports.is_empty() {
            None
        } else {
            self.reclaimer.reclaim_hook(plan.reclaim_ports.clone())
        };
        if stop.is_none() && reclaim.is_none() {
            return None;
        }

        let label = plan.label.clone();
        let registry = self.registry;
        Some(registry.register(move || {
            info!("Interrupted; cleaning up '{label}'");
            if let Some(stop) = stop {
                stop();
            }
            if let Some(reclaim) = reclaim {
                reclaim();
            }
        }))
    }

    fn terminate(&mut self, plan: Option<&CompanionPlan>, process: &mut SupervisedProcess) {
        let mode = plan.map_or(StopMode::Kill, |plan| plan.stop_mode);
        if let Err(err) = self.control.terminate(process, mode) {
            warn!("Failed to terminate `{}`: {err}", process.command_line());
        }
    }

    fn reclaim(&mut self, plan: Option<&CompanionPlan>) {
        for port in plan.map(|plan| plan.reclaim_ports.as_slice()).unwrap_or_default() {
            if let Err(err) = self.reclaimer.force_free_port(*port, Protocol::Tcp) {
                warn!("Failed to reclaim port {port}: {err}");
            }
        }
    }
}

fn invoke<T>(task: &mut T) -> Result<bool, HarnessError>
where
    T: FnMut() -> Result<bool, HarnessError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| task())) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(HarnessError::TaskFailed(format!("task panicked: {reason}")))
        }
    }
}

fn wait_for_rebuild(process: &mut SupervisedProcess, markers: &mut ReadyMarkers) -> WatchSignal {
    loop {
        match process.next_output(WATCH_POLL) {
            Some(OutputEvent::Line { text, .. }) => {
                if markers.observe(&text) {
                    return WatchSignal::Rebuilt;
                }
            }
            Some(OutputEvent::Closed) => return WatchSignal::Closed,
            None => {
                if process.has_exited() {
                    return WatchSignal::Closed;
                }
            }
        }
    }
}
