#![allow(deprecated)]

/// End-to-end tests for the command-line entry point
///
/// These only exercise paths that fail or exit before any database or
/// model backend is contacted.
use assert_cmd::Command;
use predicates::prelude::*;
mod common;

#[test]
fn test_help_lists_commands() {
    let mut cmd = Command::cargo_bin("spatialmind").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("ask"))
        .stdout(predicate::str::contains("chat"));
}

#[test]
fn test_ask_requires_database_name() {
    let mut cmd = Command::cargo_bin("spatialmind").unwrap();
    cmd.args(["ask", "--db-user", "analyst", "cities?"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--db-name"));
}

#[test]
fn test_ask_rejects_unknown_pipeline() {
    let (_temp_dir, config_path) = common::temp_config_file("server:\n  port: 8000\n");

    let mut cmd = Command::cargo_bin("spatialmind").unwrap();
    cmd.arg("--config")
        .arg(config_path)
        .args([
            "ask",
            "--db-name",
            "gis",
            "--db-user",
            "analyst",
            "--pipeline",
            "openai_text",
            "cities?",
        ]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported chatbot type"));
}

#[test]
fn test_ask_missing_image_fails_before_connecting() {
    let (temp_dir, config_path) = common::temp_config_file("server:\n  port: 8000\n");
    let missing = temp_dir.path().join("nope.png");

    let mut cmd = Command::cargo_bin("spatialmind").unwrap();
    cmd.arg("--config")
        .arg(config_path)
        .args([
            "ask",
            "--db-name",
            "gis",
            "--db-user",
            "analyst",
            "--pipeline",
            "ollama_vision",
            "--image",
        ])
        .arg(missing)
        .arg("what is this?");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Image error"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_temp_dir, config_path) =
        common::temp_config_file("pipeline:\n  request_timeout_seconds: 0\n");

    let mut cmd = Command::cargo_bin("spatialmind").unwrap();
    cmd.arg("--config").arg(config_path).arg("serve");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("request_timeout_seconds"));
}

#[test]
fn test_unparseable_config_is_rejected() {
    let (_temp_dir, config_path) = common::temp_config_file("server: [not, a, map\n");

    let mut cmd = Command::cargo_bin("spatialmind").unwrap();
    cmd.arg("--config").arg(config_path).arg("serve");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse config"));
}
