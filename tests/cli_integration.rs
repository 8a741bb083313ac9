//! Binary-level tests for the `avatalk` command

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn avatalk() -> Command {
    let mut cmd = Command::cargo_bin("avatalk").expect("binary should build");
    for var in [
        "AVATALK_AVATAR_ID",
        "AVATALK_LANGUAGE",
        "AVATALK_MAX_DURATION_SECS",
        "AVATALK_PROXY_URL",
        "AVATALK_SERVER_URL",
        "AVATALK_UPSTREAM_URL",
        "AVATALK_API_KEY",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_lists_commands() {
    avatalk()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("proxy"))
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("type"));
}

#[test]
fn test_provision_requires_avatar_id() {
    let (_dir, config) = common::temp_config_file("avatar:\n  language: en\n");
    avatalk()
        .args(["--config", config.to_str().unwrap(), "provision"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("avatar_id"));
}

#[test]
fn test_invalid_duration_in_config_fails_validation() {
    let (_dir, config) = common::temp_config_file("avatar:\n  max_duration_secs: 7200\n");
    avatalk()
        .args(["--config", config.to_str().unwrap(), "type"])
        .write_stdin("ignored")
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_duration_secs"));
}

#[test]
fn test_proxy_requires_api_key() {
    let (_dir, config) = common::temp_config_file(
        "proxy:\n  bind_address: 127.0.0.1:0\n  upstream_url: http://127.0.0.1:9\n",
    );
    avatalk()
        .args(["--config", config.to_str().unwrap(), "proxy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("AVATALK_API_KEY"));
}

#[test]
fn test_type_renders_file_contents() {
    let (dir, config) = common::temp_config_file(
        "renderer:\n  style: sentence\n  sentence_interval_ms: 1\n  sentence_pause_ms: 1\n",
    );
    let input = dir.path().join("reply.txt");
    std::fs::write(&input, "Typed out. Tail without stop").unwrap();

    avatalk()
        .args([
            "--config",
            config.to_str().unwrap(),
            "type",
            "--file",
            input.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Typed out. Tail without stop"));
}

#[test]
fn test_type_reads_stdin() {
    let (_dir, config) = common::temp_config_file("renderer:\n  character_interval_ms: 1\n");
    avatalk()
        .args(["--config", config.to_str().unwrap(), "type"])
        .write_stdin("from stdin")
        .assert()
        .success()
        .stdout(predicate::str::contains("from stdin"));
}
