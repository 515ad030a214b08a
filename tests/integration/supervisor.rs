#[path = "common/mod.rs"]
mod common;

#[cfg(target_os = "linux")]
mod linux {
    use std::time::{Duration, Instant};

    use cyfire::{
        error::HarnessError,
        process::{LaunchSpec, OutputEvent, ProcessControl, ProcessSupervisor, StopMode},
        readiness::{ReadinessPolicy, ReadyMarkers, wait_for_markers},
    };
    use tempfile::tempdir;

    use super::common::wait_for_process_exit;

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new().with_grace(Duration::from_secs(2))
    }

    #[test]
    fn markers_resolve_and_terminate_is_idempotent() {
        let dir = tempdir().unwrap();
        let supervisor = supervisor();
        let spec = LaunchSpec::new("web", "echo 'ready in 12ms'; exec sleep 30", dir.path())
            .with_ready_when(["ready in"]);

        let mut process = supervisor.start(&spec).unwrap();
        let mut markers = ReadyMarkers::new(spec.ready_when.iter().cloned());
        wait_for_markers(&mut process, &mut markers, &ReadinessPolicy::with_timeout(Duration::from_secs(5)))
            .unwrap();

        let pid = process.pid();
        supervisor.terminate(&mut process, StopMode::Terminate).unwrap();
        assert!(process.is_terminated());
        wait_for_process_exit(pid);

        // Second call is a no-op, not an error.
        supervisor.terminate(&mut process, StopMode::Terminate).unwrap();
    }

    #[test]
    fn terminate_reaches_the_whole_tree() {
        let dir = tempdir().unwrap();
        let supervisor = supervisor();
        let spec = LaunchSpec::new("tree", "sleep 30 & sleep 30 & echo spawned; wait", dir.path())
            .with_ready_when(["spawned"]);

        let mut process = supervisor.start(&spec).unwrap();
        let mut markers = ReadyMarkers::new(["spawned"]);
        wait_for_markers(&mut process, &mut markers, &ReadinessPolicy::default()).unwrap();

        let children = ProcessSupervisor::descendants(process.pid());
        assert!(children.len() >= 2, "expected two sleepers, got {children:?}");

        supervisor.terminate(&mut process, StopMode::Kill).unwrap();
        wait_for_process_exit(process.pid());
        for child in children {
            wait_for_process_exit(child);
        }
    }

    #[test]
    fn interrupt_escalates_when_ignored() {
        let dir = tempdir().unwrap();
        let supervisor = ProcessSupervisor::new().with_grace(Duration::from_millis(300));
        let spec = LaunchSpec::new(
            "stubborn",
            "trap '' INT; echo armed; while true; do sleep 0.1; done",
            dir.path(),
        )
        .with_ready_when(["armed"]);

        let mut process = supervisor.start(&spec).unwrap();
        let mut markers = ReadyMarkers::new(["armed"]);
        wait_for_markers(&mut process, &mut markers, &ReadinessPolicy::default()).unwrap();

        let started = Instant::now();
        supervisor.terminate(&mut process, StopMode::Interrupt).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!process.exited_successfully());
    }

    #[test]
    fn early_exit_is_reported_instead_of_hanging() {
        let dir = tempdir().unwrap();
        let supervisor = supervisor();
        let spec = LaunchSpec::new("broken", "echo booting; exit 3", dir.path())
            .with_ready_when(["listening"]);

        let mut process = supervisor.start(&spec).unwrap();
        let mut markers = ReadyMarkers::new(["listening"]);
        let err = wait_for_markers(&mut process, &mut markers, &ReadinessPolicy::default())
            .unwrap_err();
        match err {
            HarnessError::CompanionExited { command, status } => {
                assert!(command.contains("exit 3"));
                assert!(status.contains('3'), "unexpected status {status}");
            }
            other => panic!("expected CompanionExited, got {other:?}"),
        }
        supervisor.terminate(&mut process, StopMode::Kill).unwrap();
    }

    #[test]
    fn unread_output_is_not_buffered_after_readiness() {
        let dir = tempdir().unwrap();
        let supervisor = supervisor();
        let spec = LaunchSpec::new("chatty", "echo ready; seq 1 20000", dir.path())
            .with_ready_when(["ready"]);

        let mut process = supervisor.start(&spec).unwrap();
        let mut markers = ReadyMarkers::new(["ready"]);
        wait_for_markers(&mut process, &mut markers, &ReadinessPolicy::default()).unwrap();
        process.discard_output();

        assert_eq!(process.next_output(Duration::ZERO), Some(OutputEvent::Closed));
        let status = process.wait().unwrap();
        assert!(status.is_some_and(|status| status.success()));
    }

    #[test]
    fn environment_reaches_the_child() {
        let dir = tempdir().unwrap();
        let supervisor = supervisor();
        let spec = LaunchSpec::new("env", "echo \"port=$PORT\"", dir.path()).with_env("PORT", "4311");

        let mut process = supervisor.start(&spec).unwrap();
        let mut seen = Vec::new();
        loop {
            match process.next_output(Duration::from_secs(5)) {
                Some(OutputEvent::Line { text, .. }) => seen.push(text),
                Some(OutputEvent::Closed) | None => break,
            }
        }
        assert!(seen.iter().any(|line| line.contains("port=4311")), "{seen:?}");
        assert!(process.exited_successfully());
    }
}
