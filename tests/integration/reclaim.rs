#[path = "common/mod.rs"]
mod common;

use std::{
    io,
    process::{Command, Stdio},
    sync::Arc,
};

use cyfire::{
    error::ReclaimError,
    process::{CommandRunner, Platform, UtilityOutput},
    reclaim::{PortReclaimer, Protocol, Reclaim},
};
use common::{RecordingRunner, closed_port};

const NETSTAT: &str = "
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:9099           0.0.0.0:0              LISTENING       5120
  TCP    0.0.0.0:90990          0.0.0.0:0              LISTENING       777
  TCP    [::]:9099              [::]:0                 LISTENING       5120
  UDP    0.0.0.0:9099           *:*                                    6001
";

#[test]
fn nothing_listening_resolves_without_killing() {
    let runner = Arc::new(RecordingRunner::default());
    let reclaimer = PortReclaimer::with_platform(Platform::Posix, runner.clone());

    reclaimer.force_free_port(9099, Protocol::Tcp).unwrap();

    assert_eq!(runner.programs(), vec!["lsof"]);
    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls[0].1, vec!["-i", "tcp:9099", "-P", "-n"]);
}

struct MissingUtilities;

impl CommandRunner for MissingUtilities {
    fn run(&self, program: &str, _: &[String]) -> io::Result<UtilityOutput> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{program}: command not found"),
        ))
    }
}

fn lsof_available() -> bool {
    Command::new("lsof")
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

#[test]
fn missing_lsof_is_a_reclaim_failure() {
    let reclaimer = PortReclaimer::with_platform(Platform::Posix, Arc::new(MissingUtilities));

    let err = reclaimer.force_free_port(9099, Protocol::Tcp).unwrap_err();
    match err {
        ReclaimError::Utility { program, source } => {
            assert_eq!(program, "lsof");
            assert_eq!(source.kind(), io::ErrorKind::NotFound);
        }
        other => panic!("expected a utility failure, got {other:?}"),
    }
}

#[test]
fn reclaim_hook_frees_every_port_off_thread() {
    let runner = Arc::new(RecordingRunner::default());
    let reclaimer = PortReclaimer::with_platform(Platform::Posix, runner.clone());

    let hook = reclaimer.reclaim_hook(vec![9099, 8080]).unwrap();
    std::thread::spawn(hook).join().unwrap();

    let calls = runner.calls.lock().unwrap();
    let targets: Vec<&str> = calls.iter().map(|(_, args)| args[1].as_str()).collect();
    assert_eq!(targets, vec!["tcp:9099", "tcp:8080"]);
}

#[test]
fn real_free_port_is_a_no_op() {
    if !lsof_available() {
        return;
    }
    PortReclaimer::new()
        .force_free_port(closed_port(), Protocol::Tcp)
        .unwrap();
}

#[test]
fn port_zero_is_rejected() {
    let runner = Arc::new(RecordingRunner::default());
    let reclaimer = PortReclaimer::with_platform(Platform::Posix, runner.clone());
    assert!(matches!(
        reclaimer.force_free_port(0, Protocol::Tcp),
        Err(ReclaimError::InvalidPort(0))
    ));
    assert!(runner.programs().is_empty());
}

#[test]
fn windows_kills_only_exact_port_owners() {
    let runner = Arc::new(RecordingRunner::succeeding(NETSTAT));
    let reclaimer = PortReclaimer::with_platform(Platform::Windows, runner.clone());

    reclaimer.force_free_port(9099, Protocol::Tcp).unwrap();

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "netstat");
    assert_eq!(calls[1].0, "taskkill");
    assert_eq!(calls[1].1, vec!["/F", "/PID", "5120"]);
}

#[test]
fn posix_kill_failure_is_reported() {
    let runner = Arc::new(RecordingRunner {
        stdout: "node 4100 dev 22u IPv4 0x1 0t0 TCP *:4200 (LISTEN)\n".into(),
        stderr: "kill: (4100) - Operation not permitted".into(),
        success: false,
        ..Default::default()
    });
    let reclaimer = PortReclaimer::with_platform(Platform::Posix, runner.clone());

    let err = reclaimer.force_free_port(4200, Protocol::Tcp).unwrap_err();
    assert!(matches!(
        err,
        ReclaimError::KillFailed {
            pid: 4100,
            port: 4200,
            ..
        }
    ));
    assert_eq!(runner.programs(), vec!["lsof", "kill"]);
}
