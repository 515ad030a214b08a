#[path = "common/mod.rs"]
mod common;

use std::{fs, net::TcpListener};

use assert_cmd::Command;
use common::{closed_port, write_workspace};
use predicates::{boolean::PredicateBooleanExt, str::contains};
use tempfile::tempdir;

fn cyfire() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("cyfire"))
}

#[test]
fn help_lists_every_executor() {
    cyfire()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            contains("run")
                .and(contains("e2e-ci"))
                .and(contains("open"))
                .and(contains("serve"))
                .and(contains("emulators"))
                .and(contains("deploy")),
        );
}

#[test]
fn probe_of_closed_port_exits_non_zero() {
    cyfire()
        .args(["probe", &closed_port().to_string()])
        .assert()
        .failure()
        .stdout(contains("is down"));
}

#[test]
fn probe_of_listening_port_succeeds() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    cyfire()
        .args(["probe", &format!("tcp://127.0.0.1:{port}")])
        .assert()
        .success()
        .stdout(contains("is up"));
}

#[test]
fn probe_with_timeout_reports_readiness_timeout() {
    cyfire()
        .args([
            "probe",
            &closed_port().to_string(),
            "--timeout-ms",
            "200",
            "--poll-interval-ms",
            "50",
        ])
        .assert()
        .failure()
        .stderr(contains("was not ready within"));
}

#[test]
fn run_without_dev_server_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let workspace = write_workspace(dir.path(), "projects:\n  web-e2e:\n    root: apps/web-e2e\n");
    let options = dir.path().join("options.yaml");
    fs::write(&options, "cypressConfig: apps/web-e2e/cypress.config.ts\n").unwrap();

    cyfire()
        .args(["run", "--project", "web-e2e", "--no-cache", "--options"])
        .arg(&options)
        .arg("--workspace")
        .arg(&workspace)
        .assert()
        .failure()
        .stderr(contains("Either devServerTarget or webServerCommand is required"));
}

#[test]
fn malformed_options_file_is_rejected() {
    let dir = tempdir().unwrap();
    let workspace = write_workspace(dir.path(), "projects: {}\n");
    let options = dir.path().join("options.yaml");
    fs::write(&options, "only:\n  auth: true\n").unwrap();

    cyfire()
        .args(["emulators", "--project", "firebase-app", "--options"])
        .arg(&options)
        .arg("--workspace")
        .arg(&workspace)
        .assert()
        .failure()
        .stderr(contains("Invalid YAML format"));
}

#[test]
fn serve_requires_a_base_target() {
    let dir = tempdir().unwrap();
    let workspace = write_workspace(dir.path(), "projects: {}\n");

    cyfire()
        .args(["serve", "--project", "firebase-app", "--workspace"])
        .arg(&workspace)
        .assert()
        .failure()
        .stderr(contains("A base server target is required."));
}
