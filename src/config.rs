//! Workspace project graph and executor option files.
use regex::{Captures, Regex};
use serde::{Deserialize, de::DeserializeOwned};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};
use tracing::debug;

use crate::{error::HarnessError, process::LaunchSpec, target::Target};

/// Default file name of the workspace project graph.
pub const DEFAULT_WORKSPACE_FILE: &str = "workspace.yaml";

/// The host-supplied project graph.
#[derive(Debug, Deserialize)]
pub struct Workspace {
    /// Map of project names to their configuration.
    #[serde(default)]
    pub projects: HashMap<String, ProjectConfig>,
    /// Directory the workspace file lives in. Project roots are relative to it.
    #[serde(skip)]
    pub root: PathBuf,
}

/// Configuration for an individual project.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Project directory, relative to the workspace root.
    pub root: String,
    /// Projects this one depends on without importing them.
    #[serde(default)]
    pub implicit_dependencies: Vec<String>,
    /// Runnable targets keyed by name.
    #[serde(default)]
    pub targets: HashMap<String, TargetConfig>,
}

/// A runnable target of a project.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// Shell command that runs the target.
    pub command: String,
    /// Working directory, relative to the workspace root. Defaults to the project root.
    pub cwd: Option<String>,
    /// Output markers that signal the target is serving.
    #[serde(default)]
    pub ready_when: Vec<String>,
    /// Environment for the target.
    pub env: Option<EnvConfig>,
    /// Named variants of the target.
    #[serde(default)]
    pub configurations: HashMap<String, TargetOverride>,
}

/// Per-configuration adjustments of a target.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TargetOverride {
    /// Replaces the target command.
    pub command: Option<String>,
    /// Appended to the command.
    pub args: Option<String>,
    /// Replaces the ready markers.
    pub ready_when: Option<Vec<String>>,
}

/// Represents environment variables for a target.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EnvConfig {
    /// Optional path to an environment file.
    pub file: Option<String>,
    /// Key-value pairs of environment variables.
    pub vars: Option<HashMap<String, String>>,
}

impl EnvConfig {
    /// Resolves the full path to the env file based on a base directory.
    pub fn path(&self, base: &Path) -> Option<PathBuf> {
        self.file.as_ref().map(|f| {
            let path = Path::new(f);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        })
    }

    /// Variables from the env file, overridden by inline `vars`.
    pub fn resolve(&self, base: &Path) -> Result<Vec<(String, String)>, HarnessError> {
        let mut merged: Vec<(String, String)> = match self.path(base) {
            Some(path) => parse_env_file(&path)?,
            None => Vec::new(),
        };
        if let Some(vars) = &self.vars {
            let mut inline: Vec<_> = vars.iter().collect();
            inline.sort();
            for (key, value) in inline {
                merged.retain(|(existing, _)| existing != key);
                merged.push((key.clone(), value.clone()));
            }
        }
        Ok(merged)
    }
}

/// Reads `KEY=VALUE` lines, stripping surrounding double quotes.
fn parse_env_file(path: &Path) -> Result<Vec<(String, String)>, HarnessError> {
    let content = fs::read_to_string(path).map_err(|e| {
        HarnessError::Io(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })?;

    let mut vars = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let mut value = value.trim();

            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }
            vars.push((key.to_string(), value.to_string()));
        }
    }
    Ok(vars)
}

fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .unwrap_or_else(|err| unreachable!("static pattern is valid: {err}"))
    })
}

/// Expands `${VAR}` and `$VAR` from the environment. `$$` yields a literal `$`.
pub fn expand_env_vars(input: &str) -> Result<String, HarnessError> {
    let mut missing = None;
    let result = env_reference().replace_all(input, |caps: &Captures| {
        let Some(name) = caps.get(1).or_else(|| caps.get(2)) else {
            return "$".to_string();
        };
        match env::var(name.as_str()) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| name.as_str().to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(HarnessError::config(format!(
            "Missing environment variable: {name}"
        ))),
        None => Ok(result.into_owned()),
    }
}

fn read_file(path: &Path) -> Result<String, HarnessError> {
    fs::read_to_string(path).map_err(|e| {
        HarnessError::Io(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, path.display()),
        ))
    })
}

/// Loads and parses the workspace file, expanding environment variables.
pub fn load_workspace(path: Option<&Path>) -> Result<Workspace, HarnessError> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_WORKSPACE_FILE));
    let content = read_file(path)?;
    let expanded = expand_env_vars(&content)?;

    let mut workspace: Workspace = serde_yaml::from_str(&expanded)?;
    workspace.root = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    debug!(
        "Loaded {} project(s) from {}",
        workspace.projects.len(),
        path.display()
    );
    Ok(workspace)
}

/// Loads an executor options file (YAML or JSON) into its raw options struct.
pub fn load_options<T: DeserializeOwned>(path: &Path) -> Result<T, HarnessError> {
    let content = read_file(path)?;
    let expanded = expand_env_vars(&content)?;
    Ok(serde_yaml::from_str(&expanded)?)
}

/// What the coordinator needs from the host workspace.
pub trait TaskHost {
    /// Directory project roots are relative to.
    fn workspace_root(&self) -> &Path;

    /// Looks up a project by name.
    fn project(&self, name: &str) -> Option<&ProjectConfig>;

    /// Turns a target into a launchable command.
    fn launch_spec(&self, target: &Target) -> Result<LaunchSpec, HarnessError>;

    /// Reads a file relative to the workspace root. `Ok(None)` when the file is absent.
    fn read_text(&self, path: &Path) -> Result<Option<String>, HarnessError> {
        let full = self.workspace_root().join(path);
        match fs::read_to_string(&full) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads a JSON document relative to the workspace root. `Ok(None)` when the file is absent.
    fn read_json(&self, path: &Path) -> Result<Option<serde_json::Value>, HarnessError> {
        match self.read_text(path)? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }
}

impl TaskHost for Workspace {
    fn workspace_root(&self) -> &Path {
        &self.root
    }

    fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.get(name)
    }

    fn launch_spec(&self, target: &Target) -> Result<LaunchSpec, HarnessError> {
        let project = self.project(&target.project).ok_or_else(|| {
            HarnessError::config(format!("Cannot find project '{}'", target.project))
        })?;
        let config = project.targets.get(&target.task).ok_or_else(|| {
            HarnessError::config(format!(
                "Cannot find target '{}' for project '{}'",
                target.task, target.project
            ))
        })?;

        let mut command = config.command.clone();
        let mut ready_when = config.ready_when.clone();
        if let Some(name) = &target.configuration {
            let variant = config.configurations.get(name).ok_or_else(|| {
                HarnessError::config(format!(
                    "Cannot find configuration '{name}' for target '{}:{}'",
                    target.project, target.task
                ))
            })?;
            if let Some(replacement) = &variant.command {
                command = replacement.clone();
            }
            if let Some(args) = &variant.args {
                command = format!("{command} {args}");
            }
            if let Some(markers) = &variant.ready_when {
                ready_when = markers.clone();
            }
        }

        let cwd = match &config.cwd {
            Some(cwd) => self.root.join(cwd),
            None => self.root.join(&project.root),
        };

        let mut spec = LaunchSpec::new(target.project.clone(), command, cwd)
            .with_ready_when(ready_when);
        if let Some(env) = &config.env {
            spec.env = env.resolve(&self.root)?;
        }
        Ok(spec)
    }
}
