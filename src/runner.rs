//! The Cypress test runner, driven as an opaque subprocess.
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};

use serde::Deserialize;
use serde_json::{Map, Value, json};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, info, warn};

use crate::error::HarnessError;

/// Environment variable carrying the configuration name of the invoking target.
pub const TARGET_CONFIGURATION_ENV: &str = "NX_CYPRESS_TARGET_CONFIGURATION";

/// Which kind of Cypress tests to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, EnumString, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TestingType {
    #[default]
    E2e,
    Component,
}

/// A value that may be given as text or as a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Number(value) => write!(f, "{value}"),
            Scalar::Text(value) => write!(f, "{value}"),
        }
    }
}

/// One pattern or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
    One(String),
    Many(Vec<String>),
}

impl Patterns {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Patterns::One(pattern) => vec![pattern.clone()],
            Patterns::Many(patterns) => patterns.clone(),
        }
    }
}

/// Options passed through to Cypress unmodified.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CypressOptions {
    /// Path to the Cypress config file; the project directory is its parent.
    #[serde(default)]
    pub cypress_config: PathBuf,
    pub base_url: Option<String>,
    pub browser: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub spec: Option<String>,
    pub tag: Option<String>,
    pub exit: Option<bool>,
    #[serde(default)]
    pub headed: bool,
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub record: bool,
    pub key: Option<String>,
    #[serde(default)]
    pub parallel: bool,
    pub ci_build_id: Option<Scalar>,
    pub group: Option<String>,
    #[serde(default)]
    pub testing_type: TestingType,
    pub ignore_test_files: Option<Patterns>,
    pub reporter: Option<String>,
    pub reporter_options: Option<Value>,
    #[serde(default)]
    pub quiet: bool,
    pub auto_cancel_after_failures: Option<Scalar>,
    /// Temporary Tailwind config removed after the run.
    pub ct_tailwind_path: Option<PathBuf>,
    /// Port lock file removed after the run.
    pub port_lock_file_path: Option<PathBuf>,
    /// Configuration name of the invoking target.
    pub configuration_name: Option<String>,
}

impl CypressOptions {
    /// Directory holding the Cypress config file.
    pub fn project_dir(&self) -> PathBuf {
        match self.cypress_config.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// File name of the Cypress config file.
    pub fn config_file(&self) -> String {
        self.cypress_config
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The `--config` document: base URL and spec exclusions.
    pub fn config_overrides(&self) -> Option<Value> {
        let mut config = Map::new();
        if let Some(base_url) = &self.base_url {
            config.insert("baseUrl".into(), json!(base_url));
        }
        if let Some(ignored) = &self.ignore_test_files {
            config.insert(
                self.testing_type.to_string(),
                json!({ "excludeSpecPattern": ignored.to_vec() }),
            );
        }
        (!config.is_empty()).then_some(Value::Object(config))
    }

    fn env_json(&self) -> Option<String> {
        if self.env.is_empty() {
            return None;
        }
        serde_json::to_string(&self.env).ok()
    }
}

/// Result of one Cypress invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub total_failed: u32,
    pub failures: Option<String>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.total_failed == 0 && self.failures.is_none()
    }

    /// Cypress exits with the number of failed tests; no code means it was killed.
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self {
                total_failed: u32::try_from(code).unwrap_or(1),
                failures: None,
            },
            None => Self {
                total_failed: 0,
                failures: Some(format!("Cypress was terminated ({status})")),
            },
        }
    }
}

/// The test-runner collaborator.
pub trait TestRunner {
    /// Runs the suite headlessly.
    fn run(&self, options: &CypressOptions) -> Result<RunOutcome, HarnessError>;

    /// Opens the interactive runner and blocks until it is closed.
    fn open(&self, options: &CypressOptions) -> Result<RunOutcome, HarnessError>;
}

impl<T: TestRunner + ?Sized> TestRunner for &T {
    fn run(&self, options: &CypressOptions) -> Result<RunOutcome, HarnessError> {
        (**self).run(options)
    }

    fn open(&self, options: &CypressOptions) -> Result<RunOutcome, HarnessError> {
        (**self).open(options)
    }
}

/// Shells out to `npx cypress run|open`.
#[derive(Debug, Clone)]
pub struct CypressCli {
    program: String,
    prefix: Vec<String>,
    cwd: Option<PathBuf>,
}

impl Default for CypressCli {
    fn default() -> Self {
        let program = if cfg!(windows) { "npx.cmd" } else { "npx" };
        Self::new(program, ["cypress"])
    }
}

impl CypressCli {
    /// Runner invoking `program prefix... <run|open> ...`.
    pub fn new<I, S>(program: impl Into<String>, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            prefix: prefix.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    /// Runs Cypress from `dir`, which relative config paths are resolved against.
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Command-line arguments after the `run`/`open` verb.
    pub fn arguments(options: &CypressOptions, interactive: bool) -> Vec<String> {
        let mut args = vec![
            "--project".to_string(),
            options.project_dir().to_string_lossy().into_owned(),
        ];
        let config_file = options.config_file();
        if !config_file.is_empty() {
            args.extend(["--config-file".to_string(), config_file]);
        }
        if let Some(config) = options.config_overrides() {
            args.extend(["--config".to_string(), config.to_string()]);
        }
        if let Some(browser) = &options.browser {
            args.extend(["--browser".to_string(), browser.clone()]);
        }
        if let Some(env) = options.env_json() {
            args.extend(["--env".to_string(), env]);
        }
        args.push(format!("--{}", options.testing_type));

        if interactive {
            return args;
        }

        let mut push_value = |flag: &str, value: Option<String>| {
            if let Some(value) = value {
                args.extend([flag.to_string(), value]);
            }
        };
        push_value("--spec", options.spec.clone());
        push_value("--tag", options.tag.clone());
        push_value("--key", options.key.clone());
        push_value("--ci-build-id", options.ci_build_id.as_ref().map(ToString::to_string));
        push_value("--group", options.group.clone());
        push_value("--reporter", options.reporter.clone());
        push_value(
            "--reporter-options",
            options.reporter_options.as_ref().map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            }),
        );
        push_value(
            "--auto-cancel-after-failures",
            options
                .auto_cancel_after_failures
                .as_ref()
                .map(ToString::to_string),
        );

        for (enabled, flag) in [
            (options.headed, "--headed"),
            (options.headless, "--headless"),
            (options.record, "--record"),
            (options.parallel, "--parallel"),
            (options.quiet, "--quiet"),
            (options.exit == Some(false), "--no-exit"),
        ] {
            if enabled {
                args.push(flag.to_string());
            }
        }
        args
    }

    /// The command for `verb` and its printable form.
    pub fn command(&self, verb: &str, options: &CypressOptions) -> (Command, String) {
        let mut args = self.prefix.clone();
        args.push(verb.to_string());
        args.extend(Self::arguments(options, verb == "open"));

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        if let Some(name) = &options.configuration_name {
            cmd.env(TARGET_CONFIGURATION_ENV, name);
        }
        (cmd, format!("{} {}", self.program, args.join(" ")))
    }

    fn invoke(&self, verb: &str, options: &CypressOptions) -> Result<RunOutcome, HarnessError> {
        let (mut cmd, command_line) = self.command(verb, options);
        info!("Running `{command_line}`");

        let status = cmd.status().map_err(|source| HarnessError::ProcessSpawn {
            command: command_line,
            source,
        })?;
        let outcome = RunOutcome::from_status(status);
        debug!("Cypress finished with {status}: {outcome:?}");
        Ok(outcome)
    }
}

impl TestRunner for CypressCli {
    fn run(&self, options: &CypressOptions) -> Result<RunOutcome, HarnessError> {
        self.invoke("run", options)
    }

    fn open(&self, options: &CypressOptions) -> Result<RunOutcome, HarnessError> {
        self.invoke("open", options)
    }
}

/// Runs (or opens) Cypress, then removes the run's temporary files. Returns overall success.
pub fn run_cypress<R>(
    runner: &R,
    options: &CypressOptions,
    interactive: bool,
) -> Result<bool, HarnessError>
where
    R: TestRunner + ?Sized,
{
    let outcome = if interactive {
        runner.open(options)
    } else {
        runner.run(options)
    };

    remove_tmp_file(options.ct_tailwind_path.as_deref());
    remove_tmp_file(options.port_lock_file_path.as_deref());

    let outcome = outcome?;
    if !outcome.success() {
        warn!(
            "Cypress reported {} failed test(s){}",
            outcome.total_failed,
            outcome
                .failures
                .as_deref()
                .map(|reason| format!(": {reason}"))
                .unwrap_or_default()
        );
    }
    Ok(outcome.success())
}

fn remove_tmp_file(path: Option<&Path>) {
    let Some(path) = path else {
        return;
    };
    if path.exists()
        && let Err(err) = fs::remove_file(path)
    {
        debug!("Could not remove {}: {err}", path.display());
    }
}
