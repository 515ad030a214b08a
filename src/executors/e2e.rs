//! The `run`, `e2e-ci` and `open` executors: bring up the companion, then drive Cypress.
use std::fs;

use serde::Deserialize;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, info, warn};

use super::{
    Collaborators, DEFAULT_EMULATOR_COMMAND, ExecutorContext, FIREBASE_READY_MARKER,
    RawPolicyOptions, resolve_launch,
};
use crate::{
    coordinator::{CompanionPlan, CoordinatorResult, LifecycleCoordinator},
    endpoint::{Probe, ServiceEndpoint},
    error::HarnessError,
    lock::{AUTO_PORT_END, AUTO_PORT_START, PortLock, claim_free_port},
    process::{LaunchSpec, ProcessControl, StopMode},
    readiness::ReadinessPolicy,
    reclaim::Reclaim,
    runner::{CypressOptions, TestRunner, run_cypress},
    target::Target,
};

/// Value of `port` that asks for a free port to be picked.
pub const AUTO_PORT: &str = "cypress-auto";

/// Which executor surface is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum E2eMode {
    Run,
    E2eCi,
    Open,
}

impl E2eMode {
    fn default_watch(self) -> bool {
        self == E2eMode::Open
    }

    fn is_interactive(self) -> bool {
        self == E2eMode::Open
    }
}

/// `port` as written in an options file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawPort {
    Number(u16),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelection {
    Fixed(u16),
    Auto,
}

/// How the dev server is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevServer {
    /// A shell command, run in `cwd` (workspace root when unset).
    Command { command: String, cwd: Option<String> },
    /// A workspace target.
    Target(Target),
}

/// Options of the e2e executors as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawE2eOptions {
    pub web_server_command: Option<String>,
    pub dev_server_target: Option<String>,
    pub cwd: Option<String>,
    pub emulator_command: Option<String>,
    pub skip_serve: Option<bool>,
    pub port: Option<RawPort>,
    pub watch: Option<bool>,
    pub ready_when: Option<Vec<String>>,
    #[serde(flatten)]
    pub policy: RawPolicyOptions,
    #[serde(flatten)]
    pub cypress: CypressOptions,
}

/// Fully populated e2e options.
#[derive(Debug, Clone)]
pub struct E2eOptions {
    pub mode: E2eMode,
    pub dev_server: Option<DevServer>,
    pub emulator_command: String,
    pub skip_serve: bool,
    pub port: Option<PortSelection>,
    pub watch: bool,
    pub ready_when: Option<Vec<String>>,
    pub policy: ReadinessPolicy,
    pub cypress: CypressOptions,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl RawE2eOptions {
    pub fn normalize(self, mode: E2eMode) -> Result<E2eOptions, HarnessError> {
        if self.cypress.cypress_config.as_os_str().is_empty() {
            return Err(HarnessError::config("cypressConfig is required"));
        }

        let dev_server = match (
            non_empty(self.web_server_command),
            non_empty(self.dev_server_target),
        ) {
            (Some(command), _) => Some(DevServer::Command {
                command,
                cwd: self.cwd,
            }),
            (None, Some(target)) => Some(DevServer::Target(Target::parse(&target)?)),
            (None, None) => None,
        };

        let port = match self.port {
            None => None,
            Some(RawPort::Number(0)) => {
                return Err(HarnessError::config("port must be greater than 0"));
            }
            Some(RawPort::Number(port)) => Some(PortSelection::Fixed(port)),
            Some(RawPort::Text(text)) if text == AUTO_PORT => Some(PortSelection::Auto),
            Some(RawPort::Text(text)) => match text.trim().parse::<u16>() {
                Ok(port) if port != 0 => Some(PortSelection::Fixed(port)),
                _ => {
                    return Err(HarnessError::config(format!(
                        "port must be a number or \"{AUTO_PORT}\", got \"{text}\""
                    )));
                }
            },
        };

        Ok(E2eOptions {
            mode,
            dev_server,
            emulator_command: non_empty(self.emulator_command)
                .unwrap_or_else(|| DEFAULT_EMULATOR_COMMAND.to_string()),
            skip_serve: self.skip_serve.unwrap_or(false),
            port,
            watch: self.watch.unwrap_or(mode.default_watch()),
            ready_when: self.ready_when,
            policy: self.policy.normalize()?,
            cypress: self.cypress,
        })
    }
}

/// A planned run: what to supervise and what Cypress receives.
#[derive(Debug)]
pub struct PreparedRun {
    pub plan: Option<CompanionPlan>,
    pub cypress: CypressOptions,
    pub lock: Option<PortLock>,
}

/// Decides the companion of a run without touching the network.
///
/// A Firebase companion with emulators wins; otherwise the dev server from `webServerCommand` or
/// `devServerTarget` is used, and having neither is a configuration error.
pub fn prepare(options: &E2eOptions, ctx: &ExecutorContext<'_>) -> Result<PreparedRun, HarnessError> {
    let mut cypress = options.cypress.clone();
    if cypress.configuration_name.is_none() {
        cypress.configuration_name = ctx.configuration.clone();
    }

    if options.skip_serve {
        debug!("skipServe set; not supervising a companion");
        return Ok(PreparedRun {
            plan: None,
            cypress,
            lock: None,
        });
    }

    let resolver = ctx.resolver();
    if let Some(companion) = resolver.resolve_companion(&ctx.project)? {
        let mut launch = resolve_launch(
            ctx.host,
            &companion.project,
            &options.emulator_command,
            resolver.companion_dir(&companion),
        )?;
        apply_markers(&mut launch, options.ready_when.as_ref(), Some(FIREBASE_READY_MARKER));

        let mut plan = CompanionPlan::new(companion.project.clone())
            .with_launch(launch)
            .with_reclaim_ports(companion.emulator_ports())
            .with_stop_mode(StopMode::Interrupt);
        if let Some(port) = companion.first_port(&[]) {
            plan = plan.with_endpoint(ServiceEndpoint::from_port(port));
        }
        info!(
            "'{}' depends on emulators of '{}'",
            ctx.project, companion.project
        );
        return Ok(PreparedRun {
            plan: Some(plan),
            cypress,
            lock: None,
        });
    }

    let Some(server) = &options.dev_server else {
        return Err(HarnessError::config(format!(
            "Either devServerTarget or webServerCommand is required for '{}'",
            ctx.project
        )));
    };

    let mut lock = None;
    let port = match options.port {
        Some(PortSelection::Auto) => {
            let claimed = claim_free_port(&ctx.lock_dir, AUTO_PORT_START, AUTO_PORT_END)?;
            let port = claimed.port();
            cypress.port_lock_file_path = Some(claimed.path().to_path_buf());
            info!("Selected free port {port}");
            lock = Some(claimed);
            Some(port)
        }
        Some(PortSelection::Fixed(port)) => Some(port),
        None => None,
    };

    let mut launch = match server {
        DevServer::Command { command, cwd } => {
            let dir = cwd
                .as_deref()
                .map(|cwd| ctx.resolve_dir(cwd))
                .unwrap_or_else(|| ctx.host.workspace_root().to_path_buf());
            LaunchSpec::new(ctx.project.clone(), command.clone(), dir)
        }
        DevServer::Target(target) => ctx.host.launch_spec(target)?,
    };
    if let Some(port) = port {
        launch = launch.with_env("PORT", port.to_string());
    }
    apply_markers(&mut launch, options.ready_when.as_ref(), None);

    let endpoint = match (&cypress.base_url, port) {
        (Some(url), _) => Some(ServiceEndpoint::parse(url)?),
        (None, Some(port)) => {
            let endpoint = ServiceEndpoint::from_port(port);
            cypress.base_url = Some(endpoint.to_string());
            Some(endpoint)
        }
        (None, None) => None,
    };

    let reclaim = endpoint
        .as_ref()
        .filter(|endpoint| endpoint.is_local())
        .and_then(ServiceEndpoint::port);
    let mut plan = CompanionPlan::new(launch.label.clone())
        .with_launch(launch)
        .with_reclaim_ports(reclaim);
    if let Some(endpoint) = endpoint {
        plan = plan.with_endpoint(endpoint);
    }

    Ok(PreparedRun {
        plan: Some(plan),
        cypress,
        lock,
    })
}

fn apply_markers(launch: &mut LaunchSpec, overrides: Option<&Vec<String>>, fallback: Option<&str>) {
    if let Some(markers) = overrides {
        launch.ready_when = markers.clone();
    } else if launch.ready_when.is_empty()
        && let Some(marker) = fallback
    {
        launch.ready_when = vec![marker.to_string()];
    }
}

/// Runs one e2e executor invocation end to end.
pub fn execute<P, S, R, T>(
    options: &E2eOptions,
    ctx: &ExecutorContext<'_>,
    collaborators: Collaborators<P, S, R, T>,
) -> Result<CoordinatorResult, HarnessError>
where
    P: Probe,
    S: ProcessControl,
    R: Reclaim,
    T: TestRunner,
{
    let PreparedRun {
        plan,
        cypress,
        lock,
    } = prepare(options, ctx)?;

    let _lock_hook = lock.as_ref().map(|lock| {
        let path = lock.path().to_path_buf();
        ctx.registry.register(move || {
            let _ = fs::remove_file(&path);
        })
    });

    let Collaborators {
        probe,
        control,
        reclaimer,
        runner,
    } = collaborators;
    let mut coordinator = LifecycleCoordinator::new(probe, control, reclaimer, ctx.registry);
    let interactive = options.mode.is_interactive();
    let result = coordinator.run(plan.as_ref(), &options.policy, options.watch, || {
        run_cypress(&runner, &cypress, interactive)
    });

    if let Some(lock) = lock
        && let Err(err) = lock.release()
    {
        warn!("Failed to release port lock: {err}");
    }

    info!(
        "{} for '{}' finished: success={}",
        options.mode, ctx.project, result.success
    );
    Ok(result)
}
