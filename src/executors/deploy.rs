//! The `deploy` executor: `firebase deploy` in the foreground.
use serde::Deserialize;
use tracing::info;

use super::{ExecutorContext, run_foreground};
use crate::{
    error::HarnessError,
    process::{LaunchSpec, ProcessControl},
};

/// Base command of every deploy.
pub const DEFAULT_DEPLOY_COMMAND: &str = "npx firebase deploy";

/// Options of the deploy executor as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDeployOptions {
    pub cwd: Option<String>,
    /// Deploy targets such as `hosting` or `functions:api`.
    pub only: Option<Vec<String>>,
}

/// Fully populated deploy options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub cwd: String,
    pub only: Vec<String>,
}

impl RawDeployOptions {
    pub fn normalize(self) -> DeployOptions {
        DeployOptions {
            cwd: self
                .cwd
                .filter(|cwd| !cwd.trim().is_empty())
                .unwrap_or_else(|| ".".to_string()),
            only: self
                .only
                .unwrap_or_default()
                .into_iter()
                .map(|target| target.trim().to_string())
                .filter(|target| !target.is_empty())
                .collect(),
        }
    }
}

impl DeployOptions {
    pub fn command_line(&self) -> String {
        if self.only.is_empty() {
            return DEFAULT_DEPLOY_COMMAND.to_string();
        }
        format!("{DEFAULT_DEPLOY_COMMAND} --only {}", self.only.join(","))
    }

    pub fn launch_spec(&self, ctx: &ExecutorContext<'_>) -> LaunchSpec {
        let mut launch = LaunchSpec::new("deploy", self.command_line(), ctx.resolve_dir(&self.cwd));
        launch.inherit_stdio = true;
        launch.detached = cfg!(unix);
        launch
    }
}

/// Runs the deploy to completion. Success is a zero exit.
pub fn execute<S>(
    options: &DeployOptions,
    ctx: &ExecutorContext<'_>,
    control: &S,
) -> Result<bool, HarnessError>
where
    S: ProcessControl + ?Sized,
{
    let launch = options.launch_spec(ctx);
    info!("Deploying '{}': {}", ctx.project, launch.command);
    let success = run_foreground(control, &launch, ctx.registry)?;
    info!("Deploy for '{}' finished: success={success}", ctx.project);
    Ok(success)
}
