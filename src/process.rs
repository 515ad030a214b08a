//! Spawning companion commands as process-group leaders and tearing their trees down.
use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        Arc,
        mpsc::{self, Receiver, RecvTimeoutError},
    },
    thread,
    time::{Duration, Instant},
};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use chrono::{DateTime, Utc};
use strum_macros::{AsRefStr, Display, EnumString};
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::{
    error::HarnessError,
    logs::{StreamKind, spawn_output_pump},
};

/// How long a graceful stop may take before the group is killed outright.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// How long to wait for the kernel to deliver a `SIGKILL` before giving up on reaping.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Output lines buffered for a reader before further lines are dropped. Dropped lines were
/// already echoed to the terminal.
pub const OUTPUT_BACKLOG: usize = 4096;

/// The process model used for spawning and termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Platform {
    /// Process groups and signals.
    Posix,
    /// `taskkill` tree kills.
    Windows,
}

impl Platform {
    /// Platform of the running binary.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

/// How a companion is asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Display)]
#[strum(serialize_all = "lowercase")]
pub enum StopMode {
    /// `SIGKILL` the whole group right away.
    Kill,
    /// `SIGINT`, then `SIGKILL` after the grace period. Lets emulators export their data.
    Interrupt,
    /// `SIGTERM`, then `SIGKILL` after the grace period.
    Terminate,
}

/// Output observed on a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// One line of output, without its trailing newline.
    Line {
        /// Pipe the line was read from.
        stream: StreamKind,
        /// The line itself.
        text: String,
    },
    /// Both pipes reached EOF (or output was never captured).
    Closed,
}

/// Everything needed to launch a companion command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Short name used to prefix forwarded output.
    pub label: String,
    /// Shell command line.
    pub command: String,
    /// Working directory.
    pub cwd: PathBuf,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Start as a new process-group leader.
    pub detached: bool,
    /// Hand the terminal to the child instead of capturing output.
    pub inherit_stdio: bool,
    /// Output markers that signal readiness.
    pub ready_when: Vec<String>,
}

impl LaunchSpec {
    pub fn new(
        label: impl Into<String>,
        command: impl Into<String>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            cwd: cwd.into(),
            env: Vec::new(),
            detached: true,
            inherit_stdio: false,
            ready_when: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_ready_when<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ready_when.extend(markers.into_iter().map(Into::into));
        self
    }
}

/// Captured result of running an auxiliary utility such as `taskkill` or `lsof`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtilityOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs auxiliary platform utilities. Swappable so platform paths can be exercised anywhere.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<UtilityOutput>;
}

/// Runs utilities with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<UtilityOutput> {
        debug!("Running utility `{program} {}`", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(UtilityOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// A companion process owned by exactly one coordinator invocation.
pub struct SupervisedProcess {
    pid: u32,
    platform: Platform,
    label: String,
    command_line: String,
    started_at: DateTime<Utc>,
    child: Option<Child>,
    output: Option<Receiver<OutputEvent>>,
    exit: Option<ExitStatus>,
    terminated: bool,
}

impl SupervisedProcess {
    /// Wraps a process this crate did not spawn, so it can be terminated by PID.
    pub fn adopt(pid: u32, platform: Platform, command_line: impl Into<String>) -> Self {
        let command_line = command_line.into();
        Self {
            pid,
            platform,
            label: command_line.clone(),
            command_line,
            started_at: Utc::now(),
            child: None,
            output: None,
            exit: None,
            terminated: false,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether `terminate` already ran for this process.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Waits up to `timeout` for the next output event. `None` means nothing arrived in time.
    pub fn next_output(&self, timeout: Duration) -> Option<OutputEvent> {
        let Some(receiver) = self.output.as_ref() else {
            return Some(OutputEvent::Closed);
        };
        match receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(OutputEvent::Closed),
        }
    }

    /// Stops buffering output for readers. Lines are still echoed to the terminal.
    pub fn discard_output(&mut self) {
        if self.output.take().is_some() {
            debug!("No longer buffering output of '{}'", self.label);
        }
    }

    /// Exit status if the process has finished. Always `None` for adopted processes.
    pub fn try_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none()
            && let Some(child) = self.child.as_mut()
        {
            match child.try_wait() {
                Ok(status) => self.exit = status,
                Err(err) => debug!("try_wait failed for PID {}: {err}", self.pid),
            }
        }
        self.exit
    }

    pub fn has_exited(&mut self) -> bool {
        self.try_exit().is_some()
    }

    /// Gives a process that just closed its pipes a moment to be reaped.
    fn settle(&mut self) -> Option<ExitStatus> {
        let deadline = Instant::now() + Duration::from_millis(250);
        while self.child.is_some() && self.try_exit().is_none() && Instant::now() < deadline {
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        self.try_exit()
    }

    /// Human-readable exit state, used in error messages.
    pub fn exit_description(&mut self) -> String {
        match self.settle() {
            Some(status) => status.to_string(),
            None => "output closed".to_string(),
        }
    }

    /// Whether the process finished with a zero exit code.
    pub fn exited_successfully(&mut self) -> bool {
        self.settle().is_some_and(|status| status.success())
    }

    /// Blocks until the process exits. Adopted processes are polled by PID and yield `None`.
    pub fn wait(&mut self) -> Result<Option<ExitStatus>, HarnessError> {
        if let Some(status) = self.exit {
            return Ok(Some(status));
        }
        match self.child.as_mut() {
            Some(child) => {
                let status = child.wait()?;
                self.exit = Some(status);
                Ok(Some(status))
            }
            None => {
                while pid_alive(self.pid) {
                    thread::sleep(EXIT_POLL_INTERVAL);
                }
                Ok(None)
            }
        }
    }

    fn is_alive(&mut self) -> bool {
        if self.child.is_some() {
            return self.try_exit().is_none();
        }
        pid_alive(self.pid)
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("pid", &self.pid)
            .field("platform", &self.platform)
            .field("command_line", &self.command_line)
            .field("started_at", &self.started_at)
            .field("terminated", &self.terminated)
            .finish()
    }
}

/// Starting and stopping companions. The coordinator only talks to this seam.
pub trait ProcessControl {
    fn start(&self, spec: &LaunchSpec) -> Result<SupervisedProcess, HarnessError>;

    /// Stops the process and everything it spawned. Idempotent; a vanished process is not an error.
    fn terminate(
        &self,
        process: &mut SupervisedProcess,
        mode: StopMode,
    ) -> Result<(), HarnessError>;

    /// A detached routine that stops `pid` and its tree with `mode`, run from signal handlers.
    fn stop_hook(&self, _pid: u32, _mode: StopMode) -> Option<Box<dyn FnOnce() + Send>> {
        None
    }
}

/// Spawns commands through the platform shell and kills their whole tree on request.
#[derive(Clone)]
pub struct ProcessSupervisor {
    platform: Platform,
    runner: Arc<dyn CommandRunner>,
    grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    /// Supervisor for the current platform using real utilities.
    pub fn new() -> Self {
        Self::with_platform(Platform::current(), Arc::new(SystemRunner))
    }

    pub fn with_platform(platform: Platform, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            platform,
            runner,
            grace: DEFAULT_STOP_GRACE,
        }
    }

    /// Overrides the graceful-stop grace period.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    fn shell_command(&self, command_line: &str) -> Command {
        let mut cmd = match self.platform {
            Platform::Windows => {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(command_line);
                cmd
            }
            Platform::Posix => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command_line);
                cmd
            }
        };
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Spawns `spec.command` through the shell.
    ///
    /// A missing binary inside the command line surfaces later as an early exit, which readiness
    /// waiting reports instead of hanging.
    pub fn start(&self, spec: &LaunchSpec) -> Result<SupervisedProcess, HarnessError> {
        debug!("Launching '{}' with command: `{}`", spec.label, spec.command);

        let mut cmd = self.shell_command(&spec.command);
        cmd.current_dir(&spec.cwd);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let capture = !spec.inherit_stdio || !spec.ready_when.is_empty();
        if capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        #[cfg(unix)]
        {
            let detached = spec.detached;
            unsafe {
                cmd.pre_exec(move || {
                    // Own process group so the whole tree can be signalled without touching ours.
                    if detached && libc::setpgid(0, 0) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }

                    #[cfg(target_os = "linux")]
                    {
                        use libc::{PR_SET_PDEATHSIG, SIGTERM, prctl};
                        if prctl(PR_SET_PDEATHSIG, SIGTERM, 0, 0, 0) < 0 {
                            return Err(std::io::Error::last_os_error());
                        }
                    }

                    Ok(())
                });
            }
        }

        #[cfg(windows)]
        if spec.detached {
            use std::os::windows::process::CommandExt;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd.spawn().map_err(|source| HarnessError::ProcessSpawn {
            command: spec.command.clone(),
            source,
        })?;
        let pid = child.id();
        info!("Started '{}' (PID {pid}): `{}`", spec.label, spec.command);

        let output = if capture {
            let (tx, rx) = mpsc::sync_channel(OUTPUT_BACKLOG);
            if let Some(stdout) = child.stdout.take() {
                spawn_output_pump(&spec.label, stdout, StreamKind::Stdout, tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                spawn_output_pump(&spec.label, stderr, StreamKind::Stderr, tx);
            }
            Some(rx)
        } else {
            None
        };

        Ok(SupervisedProcess {
            pid,
            platform: self.platform,
            label: spec.label.clone(),
            command_line: spec.command.clone(),
            started_at: Utc::now(),
            child: Some(child),
            output,
            exit: None,
            terminated: false,
        })
    }

    /// Stops `process` and its descendants.
    ///
    /// POSIX signals the negative PID (the group) with `mode`, escalating to `SIGKILL` after the
    /// grace period, then sweeps descendants that left the group. Windows runs
    /// `taskkill /PID <pid> /F /T` once.
    pub fn terminate(
        &self,
        process: &mut SupervisedProcess,
        mode: StopMode,
    ) -> Result<(), HarnessError> {
        if process.terminated {
            debug!("'{}' (PID {}) already terminated", process.label, process.pid);
            return Ok(());
        }
        process.terminated = true;

        let result = match process.platform {
            Platform::Windows => self.terminate_windows(process),
            Platform::Posix => self.terminate_posix(process, mode),
        };

        match &result {
            Ok(()) => info!("Stopped '{}' (PID {})", process.label, process.pid),
            Err(err) => warn!("Failed to stop '{}' (PID {}): {err}", process.label, process.pid),
        }
        result
    }

    fn terminate_windows(&self, process: &mut SupervisedProcess) -> Result<(), HarnessError> {
        self.tree_kill(process.pid)?;
        if process.child.is_some() && !process.wait_for_exit(REAP_TIMEOUT) {
            warn!(
                "'{}' (PID {}) still running after taskkill",
                process.label, process.pid
            );
        }
        Ok(())
    }

    /// `taskkill /PID <pid> /F /T`; a process that is already gone counts as success.
    pub fn tree_kill(&self, pid: u32) -> Result<(), HarnessError> {
        let args: Vec<String> = vec![
            "/PID".into(),
            pid.to_string(),
            "/F".into(),
            "/T".into(),
        ];
        let output = self.runner.run("taskkill", &args).map_err(|err| {
            HarnessError::Cleanup(format!("failed to execute taskkill: {err}"))
        })?;

        if output.success {
            return Ok(());
        }
        if already_stopped(&output.stderr) || already_stopped(&output.stdout) {
            debug!("PID {pid} was already gone");
            return Ok(());
        }
        Err(HarnessError::Cleanup(format!(
            "taskkill failed for PID {pid}: {}",
            output.stderr.trim()
        )))
    }

    #[cfg(unix)]
    fn terminate_posix(
        &self,
        process: &mut SupervisedProcess,
        mode: StopMode,
    ) -> Result<(), HarnessError> {
        use nix::sys::signal::Signal;

        let pid = process.pid;
        // Snapshot first: once the leader dies its children are reparented and untraceable.
        let stragglers = Self::descendants(pid);
        // A reaped PID may be reused; only its process group can still be addressed safely.
        let direct = !process.has_exited();

        let mut stopped = false;
        if let Some(signal) = graceful_signal(mode) {
            signal_group(pid, signal, direct).map_err(|err| {
                HarnessError::Cleanup(format!("failed to send {signal} to group {pid}: {err}"))
            })?;
            stopped = process.wait_for_exit(self.grace);
            if !stopped {
                warn!(
                    "'{}' did not exit within {:?} after {signal}; sending SIGKILL",
                    process.label, self.grace
                );
            }
        }

        if !stopped {
            signal_group(pid, Signal::SIGKILL, direct).map_err(|err| {
                HarnessError::Cleanup(format!("failed to kill group {pid}: {err}"))
            })?;
            if !process.wait_for_exit(REAP_TIMEOUT) {
                if let Some(child) = process.child.as_mut() {
                    let _ = child.kill();
                }
                if !process.wait_for_exit(REAP_TIMEOUT) {
                    return Err(HarnessError::Cleanup(format!(
                        "PID {pid} survived SIGKILL"
                    )));
                }
            }
        }

        for straggler in stragglers {
            if pid_alive(straggler) {
                debug!("Killing straggler PID {straggler} of '{}'", process.label);
                kill_pid(straggler);
            }
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate_posix(
        &self,
        process: &mut SupervisedProcess,
        _mode: StopMode,
    ) -> Result<(), HarnessError> {
        Err(HarnessError::Cleanup(format!(
            "process groups are unavailable here; cannot signal PID {}",
            process.pid
        )))
    }

    /// Stops `pid` and its tree without a [`SupervisedProcess`] handle. Errors are logged.
    ///
    /// POSIX sends the graceful signal of `mode` to the group, waits up to the grace period for
    /// the leader to finish, then kills whatever is left. Windows always tree-kills.
    pub fn stop_tree(&self, pid: u32, mode: StopMode) {
        match self.platform {
            Platform::Windows => {
                if let Err(err) = self.tree_kill(pid) {
                    warn!("{err}");
                }
            }
            Platform::Posix => {
                #[cfg(unix)]
                self.stop_group(pid, mode);
                #[cfg(not(unix))]
                warn!("process groups are unavailable here; cannot stop PID {pid} with {mode}");
            }
        }
    }

    #[cfg(unix)]
    fn stop_group(&self, pid: u32, mode: StopMode) {
        use nix::sys::signal::Signal;

        let stragglers = Self::descendants(pid);
        let mut stopped = false;
        if let Some(signal) = graceful_signal(mode) {
            match signal_group(pid, signal, true) {
                Ok(()) => {
                    stopped = wait_until_gone(pid, self.grace);
                    if !stopped {
                        warn!("PID {pid} did not exit within {:?} after {signal}", self.grace);
                    }
                }
                Err(err) => warn!("Failed to send {signal} to group {pid}: {err}"),
            }
        }

        if !stopped && let Err(err) = signal_group(pid, Signal::SIGKILL, true) {
            warn!("Failed to kill group {pid}: {err}");
        }
        for straggler in stragglers {
            if pid_alive(straggler) {
                kill_pid(straggler);
            }
        }
    }

    /// Descendant PIDs of `root` (children, grandchildren, ...) from a process-table snapshot.
    pub fn descendants(root: u32) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, process) in system.processes() {
            if let Some(parent) = process.parent() {
                children
                    .entry(parent.as_u32())
                    .or_default()
                    .push(pid.as_u32());
            }
        }

        let mut found = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            for &child in children.get(&current).into_iter().flatten() {
                if child != root && !found.contains(&child) {
                    found.push(child);
                    queue.push_back(child);
                }
            }
        }
        found
    }
}

impl<T: ProcessControl + ?Sized> ProcessControl for &T {
    fn start(&self, spec: &LaunchSpec) -> Result<SupervisedProcess, HarnessError> {
        (**self).start(spec)
    }

    fn terminate(
        &self,
        process: &mut SupervisedProcess,
        mode: StopMode,
    ) -> Result<(), HarnessError> {
        (**self).terminate(process, mode)
    }

    fn stop_hook(&self, pid: u32, mode: StopMode) -> Option<Box<dyn FnOnce() + Send>> {
        (**self).stop_hook(pid, mode)
    }
}

impl ProcessControl for ProcessSupervisor {
    fn start(&self, spec: &LaunchSpec) -> Result<SupervisedProcess, HarnessError> {
        ProcessSupervisor::start(self, spec)
    }

    fn terminate(
        &self,
        process: &mut SupervisedProcess,
        mode: StopMode,
    ) -> Result<(), HarnessError> {
        ProcessSupervisor::terminate(self, process, mode)
    }

    fn stop_hook(&self, pid: u32, mode: StopMode) -> Option<Box<dyn FnOnce() + Send>> {
        let supervisor = self.clone();
        Some(Box::new(move || supervisor.stop_tree(pid, mode)))
    }
}

fn already_stopped(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("not found")
        || lower.contains("no running instance")
        || lower.contains("could not be terminated because")
}

#[cfg(unix)]
fn signal_group(
    pid: u32,
    signal: nix::sys::signal::Signal,
    direct: bool,
) -> Result<(), nix::errno::Errno> {
    use nix::{
        errno::Errno,
        sys::signal::{kill, killpg},
        unistd::Pid,
    };

    let target = Pid::from_raw(pid as i32);
    match killpg(target, signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) if !direct => Ok(()),
        // No such group: the process was not a group leader or everything is gone already.
        Err(Errno::ESRCH) => match kill(target, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(err),
        },
        Err(Errno::EPERM) => {
            warn!("Insufficient permissions to signal group {pid}; falling back to direct signal");
            match kill(target, signal) {
                Ok(()) | Err(Errno::ESRCH) => Ok(()),
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
fn graceful_signal(mode: StopMode) -> Option<nix::sys::signal::Signal> {
    use nix::sys::signal::Signal;
    match mode {
        StopMode::Kill => None,
        StopMode::Interrupt => Some(Signal::SIGINT),
        StopMode::Terminate => Some(Signal::SIGTERM),
    }
}

/// Polls until `pid` is gone or a zombie nobody reaped yet.
#[cfg(unix)]
fn wait_until_gone(pid: u32, timeout: Duration) -> bool {
    use sysinfo::ProcessStatus;

    let deadline = Instant::now() + timeout;
    let target = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    loop {
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        let running = system.process(target).is_some_and(|process| {
            !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
        });
        if !running {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn kill_pid(pid: u32) {
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
    !matches!(kill(Pid::from_raw(pid as i32), None), Err(Errno::ESRCH))
}

#[cfg(not(unix))]
fn pid_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(
        ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
        true,
    );
    system.process(sysinfo::Pid::from_u32(pid)).is_some()
}
