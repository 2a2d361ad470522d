mod common;

use common::TestProject;
use predicates::prelude::*;
use std::fs;

#[test]
fn test_cli_help() {
    TestProject::new()
        .command()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("delete"))
        .stdout(predicate::str::contains("version"));
}

#[test]
fn test_cli_version() {
    TestProject::new()
        .command()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("clusterflow"));
}

#[test]
fn test_invalid_command() {
    TestProject::new()
        .command()
        .arg("invalid-command")
        .assert()
        .failure();
}

#[test]
fn test_update_help_lists_targets() {
    TestProject::new()
        .command()
        .args(["update", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--cluster"))
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--concurrency"));
}

#[test]
fn test_terraform_target_writes_document() {
    let project = TestProject::new();
    project
        .command()
        .args(["update", "--cluster", "cluster.yaml", "--target", "terraform", "--out", "tf"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    let document = fs::read_to_string(project.file("tf/kubernetes.tf")).unwrap();
    assert!(document.contains("resource \"scaleway_instance_server\" \"nodes-fr-par-1-1\" {"));
    assert!(document.contains("resource \"scaleway_lb\" \"api-demo-example-com\" {"));
    assert!(document.contains("source  = \"scaleway/scaleway\""));

    // Rendering files takes no state lock and records no state.
    assert!(!project.file(".clusterflow/demo.example.com/state.json").exists());
}

#[test]
fn test_settings_file_selects_target() {
    let project = TestProject::new();
    project.write_settings("target: terraform\nout_dir: generated\n");

    project
        .command()
        .args(["update", "--cluster", "cluster.yaml"])
        .assert()
        .success();

    assert!(project.file("generated/kubernetes.tf").exists());
}

#[test]
fn test_offline_dry_run_prints_plan() {
    TestProject::new()
        .command()
        .args(["update", "--cluster", "cluster.yaml", "--target", "dry-run", "--offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Will create resources:"))
        .stdout(predicate::str::contains("LoadBalancer/api.demo.example.com"))
        .stdout(predicate::str::contains("to create, 0 to update"));
}

#[test]
fn test_direct_update_without_credentials_fails() {
    TestProject::new()
        .command()
        .args(["update", "--cluster", "cluster.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SCW_ACCESS_KEY has to be set"))
        .stderr(predicate::str::contains("SCW_DEFAULT_PROJECT_ID has to be set"));
}

#[test]
fn test_missing_cluster_file_fails() {
    TestProject::new()
        .command()
        .args(["update", "--cluster", "missing.yaml", "--target", "terraform"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load cluster description"));
}

#[test]
fn test_invalid_settings_rejected() {
    let project = TestProject::new();
    project.write_settings("concurrency: 0\n");

    project
        .command()
        .args(["update", "--cluster", "cluster.yaml", "--target", "terraform"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency must be at least 1"));
}

#[test]
fn test_delete_requires_confirmation() {
    TestProject::new()
        .command()
        .args(["delete", "--cluster", "cluster.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pass --yes to delete"));
}
