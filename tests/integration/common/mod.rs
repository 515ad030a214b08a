#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    fs,
    net::TcpListener,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use cyfire::{
    error::{HarnessError, ReclaimError},
    process::{
        CommandRunner, LaunchSpec, Platform, ProcessControl, StopMode, SupervisedProcess,
        UtilityOutput,
    },
    reclaim::{Protocol, Reclaim},
    runner::{CypressOptions, RunOutcome, TestRunner},
};

/// Writes `workspace.yaml` into `dir` and returns its path.
pub fn write_workspace(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("workspace.yaml");
    fs::write(&path, body).expect("failed to write workspace");
    path
}

/// A port nothing listens on right now.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let port = listener.local_addr().expect("no local addr").port();
    drop(listener);
    port
}

/// Records utility invocations and answers each with the same scripted output.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl RecordingRunner {
    pub fn succeeding(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            success: true,
            ..Default::default()
        }
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(program, _)| program.clone())
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String]) -> std::io::Result<UtilityOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));
        Ok(UtilityOutput {
            success: self.success,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }
}

/// Hands out adopted processes and counts lifecycle calls.
#[derive(Default)]
pub struct StubControl {
    pub starts: Cell<usize>,
    pub terminations: Cell<usize>,
    pub launched: RefCell<Vec<String>>,
    pub fail_start: bool,
}

impl ProcessControl for StubControl {
    fn start(&self, spec: &LaunchSpec) -> Result<SupervisedProcess, HarnessError> {
        self.starts.set(self.starts.get() + 1);
        self.launched.borrow_mut().push(spec.command.clone());
        if self.fail_start {
            return Err(HarnessError::ProcessSpawn {
                command: spec.command.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"),
            });
        }
        Ok(SupervisedProcess::adopt(
            4242,
            Platform::Posix,
            spec.command.clone(),
        ))
    }

    fn terminate(&self, _: &mut SupervisedProcess, _: StopMode) -> Result<(), HarnessError> {
        self.terminations.set(self.terminations.get() + 1);
        Ok(())
    }
}

/// Records every reclaimed port.
#[derive(Default)]
pub struct StubReclaim {
    pub ports: RefCell<Vec<u16>>,
}

impl Reclaim for StubReclaim {
    fn force_free_port(&self, port: u16, _: Protocol) -> Result<(), ReclaimError> {
        self.ports.borrow_mut().push(port);
        Ok(())
    }
}

/// Records reclaimed ports, including ports freed from a detached interrupt hook.
#[derive(Default, Clone)]
pub struct SharedReclaim {
    pub ports: Arc<Mutex<Vec<u16>>>,
}

impl SharedReclaim {
    pub fn ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }
}

impl Reclaim for SharedReclaim {
    fn force_free_port(&self, port: u16, _: Protocol) -> Result<(), ReclaimError> {
        self.ports.lock().unwrap().push(port);
        Ok(())
    }

    fn reclaim_hook(&self, ports: Vec<u16>) -> Option<Box<dyn FnOnce() + Send>> {
        let shared = self.clone();
        Some(Box::new(move || {
            for port in ports {
                let _ = shared.force_free_port(port, Protocol::Tcp);
            }
        }))
    }
}

#[cfg(target_os = "linux")]
pub fn wait_for_process_exit(pid: u32) {
    let deadline = Instant::now() + Duration::from_secs(10);
    let proc_path = PathBuf::from(format!("/proc/{pid}"));
    let stat_path = proc_path.join("stat");

    while Instant::now() < deadline {
        if !proc_path.exists() {
            return;
        }

        // Zombies count as exited; nothing in the test reaps reparented children.
        if let Ok(stat) = fs::read_to_string(&stat_path)
            && let Some(state_start) = stat.rfind(')')
            && let Some(state) = stat[state_start + 1..].trim().chars().next()
            && (state == 'Z' || state == 'X')
        {
            return;
        }

        thread::sleep(Duration::from_millis(100));
    }

    panic!("Timed out waiting for PID {pid} to exit");
}

/// Test runner that reports a fixed outcome and counts invocations.
#[derive(Default)]
pub struct StubRunner {
    pub runs: Cell<usize>,
    pub opens: Cell<usize>,
    pub seen: RefCell<Vec<CypressOptions>>,
    pub total_failed: u32,
}

impl TestRunner for StubRunner {
    fn run(&self, options: &CypressOptions) -> Result<RunOutcome, HarnessError> {
        self.runs.set(self.runs.get() + 1);
        self.seen.borrow_mut().push(options.clone());
        Ok(RunOutcome {
            total_failed: self.total_failed,
            failures: None,
        })
    }

    fn open(&self, options: &CypressOptions) -> Result<RunOutcome, HarnessError> {
        self.opens.set(self.opens.get() + 1);
        self.seen.borrow_mut().push(options.clone());
        Ok(RunOutcome::default())
    }
}
