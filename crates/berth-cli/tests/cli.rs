//! Binary-level tests that need no Docker daemon.

use assert_cmd::Command;
use predicates::prelude::*;

fn berth() -> Command {
    let mut cmd = Command::cargo_bin("berth").expect("binary");
    cmd.env_remove("BERTH_CONFIG").env_remove("BERTH_HOST_OVERRIDE");
    cmd
}

#[test]
fn services_lists_cassandra() {
    berth()
        .arg("services")
        .assert()
        .success()
        .stdout(predicate::str::contains("cassandra").and(predicate::str::contains("3.11.2")));
}

#[test]
fn services_json() {
    berth()
        .args(["--format", "json", "services"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"default_tag\": \"3.11.2\""));
}

#[test]
fn up_rejects_unknown_service() {
    berth()
        .args(["up", "oracle:19c"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("oracle"));
}

#[test]
fn up_rejects_malformed_reference() {
    berth()
        .args(["up", "cassandra:"])
        .assert()
        .failure();
}

#[test]
fn config_file_is_loaded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("berth.toml");
    std::fs::write(&path, "[startup]\nattempts = 0\n").expect("write");

    berth()
        .args(["--config"])
        .arg(&path)
        .arg("services")
        .assert()
        .failure()
        .stderr(predicate::str::contains("berth.toml"));
}
