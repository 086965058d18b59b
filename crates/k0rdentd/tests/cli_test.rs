#![allow(deprecated)] // TODO: migrate Command::cargo_bin to cargo_bin_cmd!

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn k0rdentd() -> Command {
    let mut cmd = Command::cargo_bin("k0rdentd").unwrap();
    cmd.env_remove("K0RDENTD_CONFIG_FILE").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    k0rdentd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("uninstall"))
        .stdout(predicate::str::contains("registry"))
        .stdout(predicate::str::contains("export-worker-artifacts"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_registry_help_lists_flags() {
    k0rdentd()
        .args(["registry", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--bundle-path"))
        .stdout(predicate::str::contains("--push-concurrency"))
        .stdout(predicate::str::contains("--cosign-key"));
}

#[cfg(not(feature = "airgap"))]
#[test]
fn test_version_and_flavor() {
    k0rdentd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("k0rdentd"))
        .stdout(predicate::str::contains("(online)"));

    k0rdentd()
        .arg("show-flavor")
        .assert()
        .success()
        .stdout("online\n");
}

#[test]
fn test_version_json() {
    k0rdentd()
        .args(["version", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"flavor\""))
        .stdout(predicate::str::contains("\"buildTime\""));
}

#[test]
fn test_config_init_then_validate_and_show() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("k0rdentd.yaml");

    k0rdentd()
        .args(["config", "init", "-o"])
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    k0rdentd()
        .arg("-c")
        .arg(&path)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));

    k0rdentd()
        .arg("-c")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("namespace: kcm-system"));

    // Existing files are not overwritten
    k0rdentd()
        .args(["config", "init", "-o"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_validate_reports_invalid_credentials() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(
        &path,
        "k0rdent:\n  credentials:\n    aws:\n      - name: prod\n        region: us-east-1\n",
    )
    .unwrap();

    k0rdentd()
        .arg("-c")
        .arg(&path)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn test_missing_explicit_config_fails() {
    k0rdentd()
        .args(["-c", "/nonexistent/k0rdentd.yaml", "config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[cfg(not(feature = "airgap"))]
#[test]
fn test_install_dry_run_prints_plan() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("k0rdentd.yaml");
    std::fs::write(&path, "k0rdent:\n  version: 1.2.2\n").unwrap();

    k0rdentd()
        .arg("-c")
        .arg(&path)
        .args(["--dry-run", "install", "--k0rdent-version", "1.3.0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"))
        .stdout(predicate::str::contains("Write k0s configuration to /etc/k0s/k0s.yaml"))
        .stdout(predicate::str::contains("Wait up to 15m for k0rdent 1.3.0"));
}

#[test]
fn test_uninstall_dry_run() {
    k0rdentd()
        .args(["uninstall", "-n"])
        .assert()
        .success()
        .stdout(predicate::str::contains("k0s reset"));
}

#[test]
fn test_registry_dry_run() {
    k0rdentd()
        .args([
            "registry",
            "--dry-run",
            "--bundle-path",
            "/opt/bundle.tar.gz",
            "--port",
            "5001",
            "--verify",
            "false",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("0.0.0.0:5001"))
        .stdout(predicate::str::contains("Verify").not());
}

#[cfg(not(feature = "airgap"))]
#[test]
fn test_export_refused_in_online_build() {
    let dir = tempdir().unwrap();
    k0rdentd()
        .args(["export-worker-artifacts", "--bundle-path", "/opt/bundle.tar.gz", "-o"])
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("only available in the airgap build"));
}
