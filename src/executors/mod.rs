//! Executor surfaces. Each takes a raw options struct, normalizes it once, plans the companion
//! and hands everything to a [`LifecycleCoordinator`](crate::coordinator::LifecycleCoordinator).
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    cache::CompanionCache,
    config::TaskHost,
    endpoint::PortProbe,
    error::HarnessError,
    lock::default_lock_dir,
    process::{LaunchSpec, ProcessControl, ProcessSupervisor, StopMode},
    readiness::ReadinessPolicy,
    reclaim::PortReclaimer,
    registry::LifecycleRegistry,
    resolver::DependencyResolver,
    runner::CypressCli,
    target::Target,
};

pub mod deploy;
pub mod e2e;
pub mod emulators;
pub mod serve;

/// Marker the Firebase CLI prints once every emulator accepts connections.
pub const FIREBASE_READY_MARKER: &str = "It is now safe to connect";

/// Command used to start emulators when none is configured.
pub const DEFAULT_EMULATOR_COMMAND: &str = "npx firebase emulators:start";

/// Emulators the Firebase CLI knows about.
pub const VALID_EMULATORS: [&str; 8] = [
    "auth",
    "functions",
    "firestore",
    "database",
    "hosting",
    "pubsub",
    "storage",
    "eventarc",
];

/// Everything an executor needs from its invocation.
pub struct ExecutorContext<'a> {
    /// The host workspace.
    pub host: &'a dyn TaskHost,
    /// Project the executor runs for.
    pub project: String,
    /// Configuration of the invoking target.
    pub configuration: Option<String>,
    /// Process-wide cleanup hooks.
    pub registry: &'a LifecycleRegistry,
    /// Cache of derived companion metadata.
    pub cache: Option<&'a CompanionCache>,
    /// Directory holding port lock files.
    pub lock_dir: PathBuf,
}

impl<'a> ExecutorContext<'a> {
    pub fn new(
        host: &'a dyn TaskHost,
        project: impl Into<String>,
        registry: &'a LifecycleRegistry,
    ) -> Self {
        Self {
            host,
            project: project.into(),
            configuration: None,
            registry,
            cache: None,
            lock_dir: default_lock_dir(),
        }
    }

    pub fn with_cache(mut self, cache: &'a CompanionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Resolver for companions of this invocation's projects.
    pub fn resolver(&self) -> DependencyResolver<'a, dyn TaskHost + 'a> {
        let resolver = DependencyResolver::new(self.host);
        match self.cache {
            Some(cache) => resolver.with_cache(cache),
            None => resolver,
        }
    }

    pub fn with_configuration(mut self, configuration: Option<String>) -> Self {
        self.configuration = configuration;
        self
    }

    /// Absolute root of the executor's own project.
    pub fn project_dir(&self) -> Result<PathBuf, HarnessError> {
        let project = self.host.project(&self.project).ok_or_else(|| {
            HarnessError::config(format!("Cannot find project '{}'", self.project))
        })?;
        Ok(self.host.workspace_root().join(&project.root))
    }

    /// Resolves a working directory relative to the workspace root.
    pub fn resolve_dir(&self, dir: &str) -> PathBuf {
        self.host.workspace_root().join(dir)
    }
}

/// The collaborators a run is wired with. Swappable for stubs.
pub struct Collaborators<P, S, R, T> {
    pub probe: P,
    pub control: S,
    pub reclaimer: R,
    pub runner: T,
}

impl Collaborators<PortProbe, ProcessSupervisor, PortReclaimer, CypressCli> {
    /// Real network probe, process supervisor, port reclaimer and a Cypress CLI running from
    /// `workspace_root`.
    pub fn system(workspace_root: &Path) -> Result<Self, HarnessError> {
        Ok(Self {
            probe: PortProbe::new()?,
            control: ProcessSupervisor::new(),
            reclaimer: PortReclaimer::new(),
            runner: CypressCli::default().with_cwd(workspace_root),
        })
    }
}

/// Readiness knobs shared by every executor.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawPolicyOptions {
    /// Readiness deadline in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Delay between probes in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Accept a companion that is already running.
    pub reuse_existing_server: Option<bool>,
}

impl RawPolicyOptions {
    pub fn normalize(&self) -> Result<ReadinessPolicy, HarnessError> {
        let defaults = ReadinessPolicy::default();
        let policy = ReadinessPolicy {
            timeout: self
                .timeout_ms
                .map_or(defaults.timeout, Duration::from_millis),
            poll_interval: self
                .poll_interval_ms
                .map_or(defaults.poll_interval, Duration::from_millis),
            reuse_existing_server: self
                .reuse_existing_server
                .unwrap_or(defaults.reuse_existing_server),
        };
        if policy.poll_interval.is_zero() {
            return Err(HarnessError::config("pollIntervalMs must be greater than 0"));
        }
        Ok(policy)
    }
}

/// Emulator names given as a list or a comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EmulatorList {
    List(Vec<String>),
    Joined(String),
}

impl EmulatorList {
    /// Known emulator names, in order. Unknown names are warned about and dropped.
    pub fn validated(&self) -> Vec<String> {
        let names: Vec<String> = match self {
            EmulatorList::List(names) => names.iter().map(|name| name.trim().to_string()).collect(),
            EmulatorList::Joined(joined) => joined
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect(),
        };

        names
            .into_iter()
            .filter(|name| {
                let valid = VALID_EMULATORS.contains(&name.as_str());
                if !valid {
                    warn!("Emulator: \"{name}\" is not a valid Firebase emulator");
                }
                valid
            })
            .collect()
    }
}

/// Turns a target string or a raw shell command into a launch.
///
/// A string naming a known `project:target` launches that target through the host; anything else
/// runs as a shell command in `cwd`.
pub fn resolve_launch(
    host: &dyn TaskHost,
    label: &str,
    command: &str,
    cwd: PathBuf,
) -> Result<LaunchSpec, HarnessError> {
    if let Ok(target) = Target::parse(command)
        && host
            .project(&target.project)
            .is_some_and(|project| project.targets.contains_key(&target.task))
    {
        debug!("Launching '{command}' through target {target}");
        return host.launch_spec(&target);
    }
    Ok(LaunchSpec::new(label, command, cwd))
}

/// Runs `spec` in the foreground until it exits, then stops whatever it left behind.
///
/// An interrupt stops it with `SIGINT` first. Stop failures are logged and never change the
/// outcome.
pub fn run_foreground<S>(
    control: &S,
    spec: &LaunchSpec,
    registry: &LifecycleRegistry,
) -> Result<bool, HarnessError>
where
    S: ProcessControl + ?Sized,
{
    let mut process = control.start(spec)?;
    let _guard = control
        .stop_hook(process.pid(), StopMode::Interrupt)
        .map(|hook| registry.register(hook));

    let status = process.wait();
    if let Err(err) = control.terminate(&mut process, StopMode::Terminate) {
        warn!("Failed to stop `{}`: {err}", process.command_line());
    }
    Ok(status?.is_some_and(|status| status.success()))
}
