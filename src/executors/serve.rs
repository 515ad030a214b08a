//! The Firebase `serve` executor: emulators in the background, the base serve target in front.
use serde::Deserialize;
use tracing::{info, warn};

use super::{
    Collaborators, EmulatorList, ExecutorContext, FIREBASE_READY_MARKER, RawPolicyOptions,
    run_foreground,
};
use crate::{
    coordinator::{CompanionPlan, CoordinatorResult, LifecycleCoordinator},
    endpoint::{Probe, ServiceEndpoint},
    error::HarnessError,
    process::{LaunchSpec, ProcessControl, StopMode},
    readiness::ReadinessPolicy,
    reclaim::Reclaim,
    resolver::{Companion, FIREBASE_CONFIG_FILE, parse_emulator_ports},
    target::Target,
};

/// Options of the serve executor as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServeOptions {
    pub base_serve_target: Option<String>,
    pub only: Option<EmulatorList>,
    pub include_hosting: Option<bool>,
    pub save_data_dir: Option<String>,
    #[serde(flatten)]
    pub policy: RawPolicyOptions,
}

/// Fully populated serve options.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub base_serve_target: Target,
    pub only: Vec<String>,
    pub include_hosting: bool,
    pub save_data_dir: Option<String>,
    pub policy: ReadinessPolicy,
}

impl RawServeOptions {
    pub fn normalize(self) -> Result<ServeOptions, HarnessError> {
        let Some(base) = self
            .base_serve_target
            .filter(|target| !target.trim().is_empty())
        else {
            return Err(HarnessError::config("A base server target is required."));
        };

        let include_hosting = self.include_hosting.unwrap_or(false);
        let only = self.only.map(|only| only.validated()).unwrap_or_default();
        if include_hosting && !only.is_empty() {
            warn!("Using --includeHosting causes the command to ignore --only.");
        }

        Ok(ServeOptions {
            base_serve_target: Target::parse(&base)?,
            only: if include_hosting { Vec::new() } else { only },
            include_hosting,
            save_data_dir: self.save_data_dir.filter(|dir| !dir.trim().is_empty()),
            policy: self.policy.normalize()?,
        })
    }
}

impl ServeOptions {
    /// `firebase emulators:start` with the `--only` and import/export flags.
    pub fn firebase_command(&self) -> String {
        let mut command = String::from("firebase emulators:start");
        if !self.include_hosting {
            let only: Vec<&str> = self
                .only
                .iter()
                .map(String::as_str)
                .filter(|name| *name != "hosting")
                .collect();
            if !only.is_empty() {
                command.push_str(" --only ");
                command.push_str(&only.join(","));
            }
        }
        if let Some(dir) = &self.save_data_dir {
            command.push_str(&format!(" --import {dir} --export-on-exit {dir}"));
        }
        command
    }
}

/// Starts the emulators, then runs the base serve target until it exits.
pub fn execute<P, S, R, T>(
    options: &ServeOptions,
    ctx: &ExecutorContext<'_>,
    collaborators: Collaborators<P, S, R, T>,
) -> Result<CoordinatorResult, HarnessError>
where
    P: Probe,
    S: ProcessControl,
    R: Reclaim,
{
    let project_dir = ctx.project_dir()?;
    let project_root = ctx
        .host
        .project(&ctx.project)
        .map(|project| project.root.clone())
        .unwrap_or_default();

    let emulators = ctx
        .host
        .read_json(&std::path::Path::new(&project_root).join(FIREBASE_CONFIG_FILE))?
        .map(|config| parse_emulator_ports(&config))
        .unwrap_or_default();
    let companion = Companion {
        project: ctx.project.clone(),
        root: project_root.into(),
        emulators,
    };

    let command = options.firebase_command();
    info!("Command to use for firebase: {command}");
    let launch = LaunchSpec::new("firebase", command, project_dir)
        .with_ready_when([FIREBASE_READY_MARKER]);

    let mut plan = CompanionPlan::new("firebase")
        .with_launch(launch)
        .with_reclaim_ports(companion.emulator_ports())
        .with_stop_mode(StopMode::Interrupt);
    if let Some(port) = companion.first_port(&options.only) {
        plan = plan.with_endpoint(ServiceEndpoint::from_port(port));
    }

    let mut serve = ctx.host.launch_spec(&options.base_serve_target)?;
    serve.detached = false;
    serve.inherit_stdio = serve.ready_when.is_empty();

    let Collaborators {
        probe,
        control,
        reclaimer,
        ..
    } = collaborators;
    let mut coordinator = LifecycleCoordinator::new(probe, &control, reclaimer, ctx.registry);
    let result = coordinator.run(Some(&plan), &options.policy, false, || {
        run_foreground(&control, &serve, ctx.registry)
    });
    Ok(result)
}
