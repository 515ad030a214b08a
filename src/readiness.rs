//! Readiness waiting: endpoint polling against an absolute deadline, and output-marker scanning.
use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::{
    endpoint::{Probe, ServiceEndpoint},
    error::HarnessError,
    process::{OutputEvent, SupervisedProcess},
};

/// Default readiness deadline for dev servers and emulators.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Default delay between two probe attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Governs how long and how often readiness is polled, and whether a running companion is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Absolute deadline measured from the start of the wait.
    pub timeout: Duration,
    /// Delay between probe attempts.
    pub poll_interval: Duration,
    /// Treat an already-reachable companion as acceptable.
    pub reuse_existing_server: bool,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reuse_existing_server: true,
        }
    }
}

impl ReadinessPolicy {
    /// Policy with the given deadline and the default interval.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Polls a [`Probe`] until the endpoint answers or the deadline passes.
///
/// One waiter runs one poll loop at a time; probes are never issued concurrently.
pub struct ReadinessWaiter<P> {
    probe: P,
}

impl<P: Probe> ReadinessWaiter<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }

    /// The underlying probe.
    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Single reachability check, used to decide whether a companion is already running.
    pub fn is_up(&self, endpoint: &ServiceEndpoint) -> bool {
        self.probe.probe(endpoint)
    }

    /// Blocks until `endpoint` is reachable, failing with [`HarnessError::ReadinessTimeout`].
    pub fn wait_until_ready(
        &self,
        endpoint: &ServiceEndpoint,
        policy: &ReadinessPolicy,
    ) -> Result<(), HarnessError> {
        self.wait_until_ready_or(endpoint, policy, || Ok(()))
    }

    /// Like [`Self::wait_until_ready`], but consults `bail` before every attempt so the caller can
    /// abort early, e.g. when the companion process already died.
    pub fn wait_until_ready_or<B>(
        &self,
        endpoint: &ServiceEndpoint,
        policy: &ReadinessPolicy,
        mut bail: B,
    ) -> Result<(), HarnessError>
    where
        B: FnMut() -> Result<(), HarnessError>,
    {
        let started = Instant::now();
        let deadline = started + policy.timeout;
        let mut attempt = 0u32;

        loop {
            bail()?;
            attempt += 1;
            let up = self.probe.probe(endpoint);

            // A probe that straddled the deadline must not resolve the wait.
            let now = Instant::now();
            if now >= deadline {
                return Err(timeout_error(endpoint.to_string(), policy, started));
            }

            if up {
                info!(
                    "{endpoint} is ready after {attempt} attempt(s) ({}ms)",
                    started.elapsed().as_millis()
                );
                return Ok(());
            }

            debug!("{endpoint} not ready (attempt {attempt})");
            thread::sleep(policy.poll_interval.min(deadline - now));

            if Instant::now() >= deadline {
                return Err(timeout_error(endpoint.to_string(), policy, started));
            }
        }
    }
}

fn timeout_error(endpoint: String, policy: &ReadinessPolicy, started: Instant) -> HarnessError {
    HarnessError::ReadinessTimeout {
        endpoint,
        timeout: policy.timeout,
        elapsed: started.elapsed(),
    }
}

/// Tracks a set of output markers; readiness is reached once every marker was seen.
#[derive(Debug, Clone, Default)]
pub struct ReadyMarkers {
    markers: Vec<(String, bool)>,
}

impl ReadyMarkers {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|marker: &String| !marker.is_empty())
                .map(|marker| (marker, false))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Records a chunk of output and reports whether every marker has now been seen.
    pub fn observe(&mut self, chunk: &str) -> bool {
        for (marker, found) in self.markers.iter_mut() {
            if !*found && chunk.contains(marker.as_str()) {
                *found = true;
            }
        }
        self.is_satisfied()
    }

    pub fn is_satisfied(&self) -> bool {
        self.markers.iter().all(|(_, found)| *found)
    }

    /// Forgets what has been seen so the next occurrence can be awaited.
    pub fn reset(&mut self) {
        for (_, found) in self.markers.iter_mut() {
            *found = false;
        }
    }

    fn describe(&self) -> String {
        let names: Vec<_> = self
            .markers
            .iter()
            .map(|(marker, _)| format!("\"{marker}\""))
            .collect();
        names.join(", ")
    }
}

/// Scans the output of `process` until every marker was printed.
///
/// Fails with [`HarnessError::CompanionExited`] when the output closes first, and with
/// [`HarnessError::ReadinessTimeout`] once `policy.timeout` elapses.
pub fn wait_for_markers(
    process: &mut SupervisedProcess,
    markers: &mut ReadyMarkers,
    policy: &ReadinessPolicy,
) -> Result<(), HarnessError> {
    if markers.is_empty() || markers.is_satisfied() {
        return Ok(());
    }

    let started = Instant::now();
    let deadline = started + policy.timeout;
    let label = format!("output of `{}` ({})", process.command_line(), markers.describe());

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(timeout_error(label, policy, started));
        }

        match process.next_output(deadline - now) {
            Some(OutputEvent::Line { text, .. }) => {
                if markers.observe(&text) {
                    info!(
                        "`{}` reported ready after {}ms",
                        process.command_line(),
                        started.elapsed().as_millis()
                    );
                    return Ok(());
                }
            }
            Some(OutputEvent::Closed) => {
                return Err(HarnessError::CompanionExited {
                    command: process.command_line().to_string(),
                    status: process.exit_description(),
                });
            }
            None => return Err(timeout_error(label, policy, started)),
        }
    }
}
