#[path = "common/mod.rs"]
mod common;

use std::{cell::Cell, fs, path::PathBuf};

use cyfire::{
    config::{Workspace, load_workspace},
    coordinator::{CompanionPlan, CoordinatorState, LifecycleCoordinator},
    endpoint::ServiceEndpoint,
    error::HarnessError,
    executors::{
        Collaborators, ExecutorContext, FIREBASE_READY_MARKER,
        e2e::{self, E2eMode, RawE2eOptions, RawPort},
    },
    process::{LaunchSpec, StopMode},
    readiness::ReadinessPolicy,
    registry::LifecycleRegistry,
    runner::CypressOptions,
};
use common::{SharedReclaim, StubControl, StubReclaim, StubRunner, write_workspace};
use tempfile::{TempDir, tempdir};

const WORKSPACE: &str = r#"
projects:
  web-e2e:
    root: apps/web-e2e
  app-e2e:
    root: apps/app-e2e
    implicitDependencies: [firebase-app]
  firebase-app:
    root: apps/firebase
    targets:
      emulate:
        command: "firebase emulators:start --project demo"
  web:
    root: apps/web
    targets:
      serve:
        command: "npm run dev"
        readyWhen: ["ready in"]
"#;

const FIREBASE_JSON: &str = r#"{
  "emulators": {
    "ui": { "port": 4000 },
    "auth": { "port": 9099 },
    "firestore": { "port": 8080 },
    "hosting": { "port": 5000 }
  }
}"#;

fn workspace() -> (TempDir, Workspace) {
    let dir = tempdir().unwrap();
    let path = write_workspace(dir.path(), WORKSPACE);
    fs::create_dir_all(dir.path().join("apps/firebase")).unwrap();
    fs::write(dir.path().join("apps/firebase/firebase.json"), FIREBASE_JSON).unwrap();
    let workspace = load_workspace(Some(&path)).unwrap();
    (dir, workspace)
}

fn raw(yaml: &str) -> RawE2eOptions {
    let mut raw: RawE2eOptions = serde_yaml::from_str(yaml).unwrap();
    if raw.cypress.cypress_config.as_os_str().is_empty() {
        raw.cypress = CypressOptions {
            cypress_config: PathBuf::from("apps/web-e2e/cypress.config.ts"),
            ..raw.cypress
        };
    }
    raw
}

#[test]
fn missing_dev_server_is_rejected_before_any_probe() {
    let (_dir, workspace) = workspace();
    let registry = LifecycleRegistry::new();
    let ctx = ExecutorContext::new(&workspace, "web-e2e", &registry);
    let options = raw("headless: true").normalize(E2eMode::Run).unwrap();

    let control = StubControl::default();
    let runner = StubRunner::default();
    let err = e2e::execute(
        &options,
        &ctx,
        Collaborators {
            probe: |_: &ServiceEndpoint| -> bool { panic!("no network call expected") },
            control: &control,
            reclaimer: StubReclaim::default(),
            runner: &runner,
        },
    )
    .unwrap_err();

    match err {
        HarnessError::Configuration(message) => {
            assert_eq!(
                message,
                "Either devServerTarget or webServerCommand is required for 'web-e2e'"
            );
        }
        other => panic!("expected a configuration error, got {other:?}"),
    }
    assert_eq!(control.starts.get(), 0);
    assert_eq!(runner.runs.get(), 0);
}

#[test]
fn running_server_is_reused_without_spawning() {
    let (_dir, workspace) = workspace();
    let registry = LifecycleRegistry::new();
    let ctx = ExecutorContext::new(&workspace, "web-e2e", &registry);
    let options = raw("devServerTarget: web:serve\nbaseUrl: http://localhost:4200\n")
        .normalize(E2eMode::E2eCi)
        .unwrap();

    let control = StubControl::default();
    let reclaimer = StubReclaim::default();
    let runner = StubRunner::default();
    let result = e2e::execute(
        &options,
        &ctx,
        Collaborators {
            probe: |_: &ServiceEndpoint| true,
            control: &control,
            reclaimer: &reclaimer,
            runner: &runner,
        },
    )
    .unwrap();

    assert!(result.success);
    assert_eq!(control.starts.get(), 0);
    assert_eq!(control.terminations.get(), 0);
    assert_eq!(*reclaimer.ports.borrow(), vec![4200]);
    assert_eq!(runner.runs.get(), 1);
    assert_eq!(
        runner.seen.borrow()[0].base_url.as_deref(),
        Some("http://localhost:4200")
    );
}

#[test]
fn reuse_disabled_conflict_fails_without_spawning() {
    let (_dir, workspace) = workspace();
    let registry = LifecycleRegistry::new();
    let ctx = ExecutorContext::new(&workspace, "web-e2e", &registry);
    let options = raw(
        "webServerCommand: npm start\nbaseUrl: http://localhost:4200\nreuseExistingServer: false\n",
    )
    .normalize(E2eMode::Run)
    .unwrap();

    let control = StubControl::default();
    let reclaimer = StubReclaim::default();
    let runner = StubRunner::default();
    let result = e2e::execute(
        &options,
        &ctx,
        Collaborators {
            probe: |_: &ServiceEndpoint| true,
            control: &control,
            reclaimer: &reclaimer,
            runner: &runner,
        },
    )
    .unwrap();

    assert!(!result.success);
    assert_eq!(control.starts.get(), 0);
    assert_eq!(runner.runs.get(), 0);
    assert!(reclaimer.ports.borrow().is_empty());
}

#[test]
fn failing_task_is_cleaned_up_exactly_once() {
    let registry = LifecycleRegistry::new();
    let probes = Cell::new(0);
    let control = StubControl::default();
    let reclaimer = StubReclaim::default();
    let mut coordinator = LifecycleCoordinator::new(
        |_: &ServiceEndpoint| {
            probes.set(probes.get() + 1);
            probes.get() > 1
        },
        &control,
        &reclaimer,
        &registry,
    );
    let plan = CompanionPlan::new("web")
        .with_endpoint(ServiceEndpoint::from_port(4200))
        .with_launch(LaunchSpec::new("web", "npm run dev", "."))
        .with_reclaim_ports([4200]);

    let result = coordinator.run(Some(&plan), &ReadinessPolicy::default(), false, || {
        Err(HarnessError::TaskFailed("cypress crashed".into()))
    });

    assert!(!result.success);
    assert_eq!(control.starts.get(), 1);
    assert_eq!(control.terminations.get(), 1);
    assert_eq!(*reclaimer.ports.borrow(), vec![4200]);
    assert_eq!(coordinator.state(), CoordinatorState::Done);
    assert_eq!(registry.pending(), 0);
}

#[test]
fn failed_spawn_skips_task_and_cleanup() {
    let registry = LifecycleRegistry::new();
    let control = StubControl {
        fail_start: true,
        ..Default::default()
    };
    let ran = Cell::new(false);
    let mut coordinator =
        LifecycleCoordinator::new(|_: &ServiceEndpoint| false, &control, StubReclaim::default(), &registry);
    let plan = CompanionPlan::new("web").with_launch(LaunchSpec::new("web", "nope", "."));

    let result = coordinator.run(Some(&plan), &ReadinessPolicy::default(), false, || {
        ran.set(true);
        Ok(true)
    });

    assert!(!result.success);
    assert!(!ran.get());
    assert_eq!(control.terminations.get(), 0);
}

#[test]
fn firebase_companion_is_planned_from_implicit_dependency() {
    let (dir, workspace) = workspace();
    let registry = LifecycleRegistry::new();
    let ctx = ExecutorContext::new(&workspace, "app-e2e", &registry);
    let options = raw("emulatorCommand: firebase-app:emulate\n")
        .normalize(E2eMode::Run)
        .unwrap();

    let prepared = e2e::prepare(&options, &ctx).unwrap();
    let plan = prepared.plan.unwrap();
    let launch = plan.launch.as_ref().unwrap();

    assert_eq!(plan.label, "firebase-app");
    assert_eq!(plan.endpoint, Some(ServiceEndpoint::from_port(9099)));
    assert_eq!(plan.reclaim_ports, vec![9099, 8080]);
    assert_eq!(plan.stop_mode, StopMode::Interrupt);
    assert_eq!(launch.command, "firebase emulators:start --project demo");
    assert_eq!(launch.cwd, dir.path().join("apps/firebase"));
    assert_eq!(launch.ready_when, vec![FIREBASE_READY_MARKER]);
}

#[test]
fn auto_port_is_locked_and_exported() {
    let (_dir, workspace) = workspace();
    let locks = tempdir().unwrap();
    let registry = LifecycleRegistry::new();
    let ctx = ExecutorContext::new(&workspace, "web-e2e", &registry).with_lock_dir(locks.path());
    let mut options = raw("webServerCommand: npm start\n");
    options.port = Some(RawPort::Text("cypress-auto".into()));
    let options = options.normalize(E2eMode::Run).unwrap();

    let prepared = e2e::prepare(&options, &ctx).unwrap();
    let lock = prepared.lock.as_ref().unwrap();
    let port = lock.port();
    let plan = prepared.plan.unwrap();
    let launch = plan.launch.unwrap();

    assert!(lock.path().exists());
    assert_eq!(launch.env, vec![("PORT".to_string(), port.to_string())]);
    assert_eq!(prepared.cypress.base_url, Some(format!("http://localhost:{port}")));
    assert_eq!(prepared.cypress.port_lock_file_path.as_deref(), Some(lock.path()));
    assert_eq!(plan.reclaim_ports, vec![port]);
}

#[test]
fn reused_companion_registers_reclaim_for_interrupts() {
    let registry = LifecycleRegistry::new();
    let control = StubControl::default();
    let reclaimer = SharedReclaim::default();
    let mut coordinator =
        LifecycleCoordinator::new(|_: &ServiceEndpoint| true, &control, reclaimer.clone(), &registry);
    let plan = CompanionPlan::new("web")
        .with_endpoint(ServiceEndpoint::from_port(4200))
        .with_reclaim_ports([4200]);

    let mut pending = 0;
    let result = coordinator.run(Some(&plan), &ReadinessPolicy::default(), false, || {
        pending = registry.pending();
        Ok(true)
    });

    assert!(result.success);
    assert_eq!(pending, 1);
    assert_eq!(registry.pending(), 0);
    assert_eq!(control.starts.get(), 0);
    assert_eq!(reclaimer.ports(), vec![4200]);
}

#[cfg(target_os = "linux")]
mod linux {
    use std::{cell::Cell, fs, time::Duration};

    use cyfire::{
        coordinator::{CompanionPlan, LifecycleCoordinator},
        endpoint::ServiceEndpoint,
        process::{LaunchSpec, ProcessSupervisor, StopMode},
        readiness::ReadinessPolicy,
        registry::LifecycleRegistry,
    };
    use tempfile::tempdir;

    use super::common::{SharedReclaim, StubReclaim, closed_port};

    #[test]
    fn interrupt_hooks_stop_gracefully_then_reclaim() {
        let dir = tempdir().unwrap();
        let exported = dir.path().join("exported");
        let registry = LifecycleRegistry::new();
        let reclaimer = SharedReclaim::default();
        let mut coordinator = LifecycleCoordinator::new(
            |_: &ServiceEndpoint| false,
            ProcessSupervisor::new().with_grace(Duration::from_secs(5)),
            reclaimer.clone(),
            &registry,
        );
        let plan = CompanionPlan::new("emulators")
            .with_launch(
                LaunchSpec::new(
                    "emulators",
                    "trap 'echo saved > exported; exit 0' INT; echo ready; while true; do sleep 0.1; done",
                    dir.path(),
                )
                .with_ready_when(["ready"]),
            )
            .with_reclaim_ports([9099])
            .with_stop_mode(StopMode::Interrupt);

        // What the signal handler does before exiting.
        let mut reclaimed_by_hook = Vec::new();
        let result = coordinator.run(Some(&plan), &ReadinessPolicy::default(), false, || {
            registry.run_all();
            reclaimed_by_hook = reclaimer.ports();
            Ok(exported.exists())
        });

        assert!(result.success);
        assert_eq!(reclaimed_by_hook, vec![9099]);
        assert_eq!(fs::read_to_string(&exported).unwrap().trim(), "saved");
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn watch_mode_reruns_on_each_ready_marker() {
        let dir = tempdir().unwrap();
        let registry = LifecycleRegistry::new();
        let runs = Cell::new(0);
        let mut coordinator = LifecycleCoordinator::new(
            |_: &ServiceEndpoint| false,
            ProcessSupervisor::new(),
            StubReclaim::default(),
            &registry,
        );
        let plan = CompanionPlan::new("dev").with_launch(
            LaunchSpec::new("dev", "echo compiled; sleep 0.3; echo compiled; sleep 0.3", dir.path())
                .with_ready_when(["compiled"]),
        );

        let result = coordinator.run(Some(&plan), &ReadinessPolicy::default(), true, || {
            runs.set(runs.get() + 1);
            Ok(true)
        });

        assert!(result.success);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn watch_mode_fails_when_companion_exits_non_zero() {
        let dir = tempdir().unwrap();
        let registry = LifecycleRegistry::new();
        let runs = Cell::new(0);
        let mut coordinator = LifecycleCoordinator::new(
            |_: &ServiceEndpoint| false,
            ProcessSupervisor::new(),
            StubReclaim::default(),
            &registry,
        );
        let plan = CompanionPlan::new("dev").with_launch(
            LaunchSpec::new("dev", "echo compiled; sleep 0.2; exit 2", dir.path())
                .with_ready_when(["compiled"]),
        );

        let result = coordinator.run(Some(&plan), &ReadinessPolicy::default(), true, || {
            runs.set(runs.get() + 1);
            Ok(true)
        });

        assert!(!result.success);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn companion_dying_during_startup_fails_fast() {
        let dir = tempdir().unwrap();
        let registry = LifecycleRegistry::new();
        let ran = Cell::new(false);
        let mut coordinator = LifecycleCoordinator::new(
            |_: &ServiceEndpoint| false,
            ProcessSupervisor::new(),
            StubReclaim::default(),
            &registry,
        );
        let plan = CompanionPlan::new("dev")
            .with_endpoint(ServiceEndpoint::from_port(closed_port()))
            .with_launch(LaunchSpec::new("dev", "exit 1", dir.path()));

        let started = std::time::Instant::now();
        let result = coordinator.run(Some(&plan), &ReadinessPolicy::default(), false, || {
            ran.set(true);
            Ok(true)
        });

        assert!(!result.success);
        assert!(!ran.get());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
