//! The `emulators` executor: start the Firebase emulator suite and supervise it until it exits.
use std::path::Path;

use serde::Deserialize;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{info, warn};

use super::{
    Collaborators, DEFAULT_EMULATOR_COMMAND, EmulatorList, ExecutorContext, FIREBASE_READY_MARKER,
    RawPolicyOptions,
};
use crate::{
    coordinator::{CompanionPlan, CoordinatorResult, LifecycleCoordinator},
    endpoint::{Probe, ServiceEndpoint},
    error::HarnessError,
    process::{LaunchSpec, ProcessControl, StopMode},
    readiness::ReadinessPolicy,
    reclaim::Reclaim,
    resolver::{Companion, FIREBASE_CONFIG_FILE, parse_emulator_ports},
    runner::Scalar,
};

/// Values accepted by `--log-verbosity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogVerbosity {
    Debug,
    Info,
    Quiet,
    Silent,
}

/// Options of the emulators executor as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEmulatorsOptions {
    pub command: Option<String>,
    pub cwd: Option<String>,
    pub only: Option<EmulatorList>,
    pub disable_only: Option<bool>,
    pub inspect_functions: Option<Scalar>,
    pub import: Option<String>,
    pub export_on_exit: Option<Scalar>,
    pub log_verbosity: Option<String>,
    pub ready_when: Option<Vec<String>>,
    #[serde(flatten)]
    pub policy: RawPolicyOptions,
}

/// Fully populated emulators options.
#[derive(Debug, Clone)]
pub struct EmulatorsOptions {
    pub command: String,
    pub cwd: String,
    pub only: Vec<String>,
    pub disable_only: bool,
    /// `Some(None)` enables the inspector on its default port.
    pub inspect_functions: Option<Option<String>>,
    pub import: Option<String>,
    /// `Some(None)` exports into the import directory.
    pub export_on_exit: Option<Option<String>>,
    pub log_verbosity: Option<LogVerbosity>,
    pub ready_when: Vec<String>,
    pub policy: ReadinessPolicy,
}

impl RawEmulatorsOptions {
    pub fn normalize(self) -> Result<EmulatorsOptions, HarnessError> {
        let inspect_functions = match self.inspect_functions {
            None | Some(Scalar::Bool(false)) => None,
            Some(Scalar::Bool(true)) => Some(None),
            Some(other) => Some(Some(other.to_string())),
        };
        let export_on_exit = match self.export_on_exit {
            None | Some(Scalar::Bool(false)) => None,
            Some(Scalar::Bool(true)) => Some(None),
            Some(other) => Some(Some(other.to_string())),
        };
        let log_verbosity = match self.log_verbosity {
            None => None,
            Some(level) => match level.parse::<LogVerbosity>() {
                Ok(level) => Some(level),
                Err(_) => {
                    warn!("Log verbosity \"{level}\" is not one of DEBUG, INFO, QUIET, SILENT");
                    None
                }
            },
        };

        Ok(EmulatorsOptions {
            command: self
                .command
                .filter(|command| !command.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_EMULATOR_COMMAND.to_string()),
            cwd: self.cwd.unwrap_or_else(|| ".".to_string()),
            only: self.only.map(|only| only.validated()).unwrap_or_default(),
            disable_only: self.disable_only.unwrap_or(false),
            inspect_functions,
            import: self.import,
            export_on_exit,
            log_verbosity,
            ready_when: self
                .ready_when
                .unwrap_or_else(|| vec![FIREBASE_READY_MARKER.to_string()]),
            policy: self.policy.normalize()?,
        })
    }
}

impl EmulatorsOptions {
    /// Flags appended to the emulator command.
    pub fn arguments(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.disable_only && !self.only.is_empty() {
            args.push(format!("--only={}", self.only.join(",")));
        }
        if let Some(port) = &self.inspect_functions {
            args.push("--inspect-functions".into());
            args.extend(port.clone());
        }
        if let Some(dir) = &self.import {
            args.push("--import".into());
            args.push(dir.clone());
        }
        if let Some(dir) = &self.export_on_exit {
            args.push("--export-on-exit".into());
            args.extend(dir.clone());
        }
        if let Some(level) = self.log_verbosity {
            args.push("--log-verbosity".into());
            args.push(level.to_string());
        }
        args
    }

    /// The full shell command line.
    pub fn command_line(&self) -> String {
        let args = self.arguments();
        if args.is_empty() {
            return self.command.clone();
        }
        format!("{} {}", self.command, args.join(" "))
    }
}

/// Starts the emulators and blocks until they exit. Success once they came up and exited cleanly.
pub fn execute<P, S, R, T>(
    options: &EmulatorsOptions,
    ctx: &ExecutorContext<'_>,
    collaborators: Collaborators<P, S, R, T>,
) -> Result<CoordinatorResult, HarnessError>
where
    P: Probe,
    S: ProcessControl,
    R: Reclaim,
{
    let emulators = ctx
        .host
        .read_json(&Path::new(&options.cwd).join(FIREBASE_CONFIG_FILE))?
        .map(|config| parse_emulator_ports(&config))
        .unwrap_or_default();
    let companion = Companion {
        project: ctx.project.clone(),
        root: options.cwd.clone().into(),
        emulators,
    };

    let launch = LaunchSpec::new("firebase", options.command_line(), ctx.resolve_dir(&options.cwd))
        .with_ready_when(options.ready_when.iter().cloned());
    let only = if options.disable_only {
        Vec::new()
    } else {
        options.only.clone()
    };

    let mut plan = CompanionPlan::new("firebase")
        .with_launch(launch)
        .with_reclaim_ports(companion.emulator_ports())
        .with_stop_mode(StopMode::Interrupt);
    if let Some(port) = companion.first_port(&only) {
        plan = plan.with_endpoint(ServiceEndpoint::from_port(port));
    }

    let Collaborators {
        probe,
        control,
        reclaimer,
        ..
    } = collaborators;
    let mut coordinator = LifecycleCoordinator::new(probe, control, reclaimer, ctx.registry);
    let watch = !options.ready_when.is_empty();
    let result = coordinator.run(Some(&plan), &options.policy, watch, || {
        info!("Emulators for '{}' are running", ctx.project);
        Ok(true)
    });
    Ok(result)
}
