//! Command line parsing tests for `rpush` and `rpull`
//!
//! These run the real binaries but never reach a remote host: every case is either answered by
//! clap, rejected before a connection is attempted or stops at a missing local source.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_runs() {
    for bin in ["rpush", "rpull"] {
        Command::cargo_bin(bin)
            .unwrap()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("--pattern"))
            .stdout(predicate::str::contains("--retry-delay"));
    }
}

#[test]
fn test_version_runs() {
    for bin in ["rpush", "rpull"] {
        Command::cargo_bin(bin)
            .unwrap()
            .arg("--version")
            .assert()
            .success();
    }
}

#[test]
fn test_missing_destination_is_usage_error() {
    Command::cargo_bin("rpush")
        .unwrap()
        .arg("/tmp")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_pattern_with_slash_is_rejected() {
    Command::cargo_bin("rpush")
        .unwrap()
        .args(["--pattern", "dir/*.txt", "/tmp", "host:/tmp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("file names only"));
}

#[test]
fn test_humantime_durations_are_accepted() {
    Command::cargo_bin("rpull")
        .unwrap()
        .args([
            "--retry-delay",
            "250ms",
            "--connect-timeout",
            "1min",
            "--io-timeout",
            "30s",
            "--poll-interval",
            "1s",
            "--help",
        ])
        .assert()
        .success();
}

#[test]
fn test_invalid_duration_is_rejected() {
    Command::cargo_bin("rpull")
        .unwrap()
        .args(["--retry-delay", "soon", "host:/a", "/b"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_push_requires_remote_destination() {
    let tmp = tempfile::tempdir().unwrap();
    Command::cargo_bin("rpush")
        .unwrap()
        .args([
            tmp.path().to_str().unwrap(),
            tmp.path().join("out").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("remote destination"));
}

#[test]
fn test_pull_requires_local_destination() {
    Command::cargo_bin("rpull")
        .unwrap()
        .args(["host:/a", "other:/b"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("local destination"));
}

#[test]
fn test_quiet_suppresses_error_report() {
    Command::cargo_bin("rpull")
        .unwrap()
        .args(["-q", "/a", "/b"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::is_empty());
}

#[test]
fn test_missing_source_reports_nothing_to_transfer() {
    let tmp = tempfile::tempdir().unwrap();
    Command::cargo_bin("rpush")
        .unwrap()
        .args([tmp.path().join("missing").to_str().unwrap(), "host:/srv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to transfer"))
        .stdout(predicate::str::contains("all files pushed").not());
}

#[test]
fn test_password_conflicts_with_identity() {
    Command::cargo_bin("rpush")
        .unwrap()
        .args(["--password", "secret", "-i", "/keys/id", "/tmp", "host:/tmp"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_password_from_environment_is_accepted() {
    let tmp = tempfile::tempdir().unwrap();
    Command::cargo_bin("rpush")
        .unwrap()
        .env("RXFER_PASSWORD", "secret")
        .args([tmp.path().join("missing").to_str().unwrap(), "host:/srv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("secret").not());
}

#[test]
fn test_help_hides_password_value() {
    Command::cargo_bin("rpull")
        .unwrap()
        .env("RXFER_PASSWORD", "secret")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("RXFER_PASSWORD"))
        .stdout(predicate::str::contains("secret").not());
}
