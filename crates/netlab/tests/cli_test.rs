//! Integration tests for the `netlab` CLI binary.
//!
//! Everything runs against the in-memory backend, with config lookups
//! pointed at temporary directories.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `netlab` binary with env isolation.
///
/// Clears all `NETLAB_*` env vars and points the config file at a path
/// inside `dir` so tests never touch the user's real configuration.
fn netlab_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("netlab");
    cmd.env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir)
        .env("NETLAB_CONFIG", dir.join("config.toml"))
        .env_remove("NETLAB_OUTPUT")
        .env_remove("NETLAB_HUB__ROUTER_TAG")
        .env_remove("NETLAB_HUB__OPERATION_TIMEOUT")
        .env_remove("NETLAB_MONITORING__ADDRESS")
        .env_remove("NETLAB_MONITORING__PORT")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

const SINGLE_LAN: &str = r#"
[[networks]]
name = "lan1"
subnet = "10.0.0.0/24"

[[devices]]
name = "router1"
kind = "router"
image = "netlab/router:latest"
networks = ["lan1"]

[[devices]]
name = "h1"
kind = "host"
networks = ["lan1"]
"#;

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let dir = TempDir::new().unwrap();
    let output = netlab_cmd(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    netlab_cmd(dir.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("validate")
            .and(predicate::str::contains("plan"))
            .and(predicate::str::contains("config")),
    );
}

#[test]
fn test_version_flag() {
    let dir = TempDir::new().unwrap();
    netlab_cmd(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("netlab"));
}

#[test]
fn test_completions_bash() {
    let dir = TempDir::new().unwrap();
    netlab_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("netlab"));
}

#[test]
fn test_invalid_subcommand() {
    let dir = TempDir::new().unwrap();
    netlab_cmd(dir.path())
        .arg("deploy-everything")
        .assert()
        .code(2);
}

// ── validate ────────────────────────────────────────────────────────

#[test]
fn test_validate_lists_networks_and_devices() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "lab.toml", SINGLE_LAN);
    netlab_cmd(dir.path())
        .arg("validate")
        .arg(&file)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("lan1")
                .and(predicate::str::contains("10.0.0.0/24"))
                .and(predicate::str::contains("10.0.0.1"))
                .and(predicate::str::contains("router1"))
                .and(predicate::str::contains("(default)")),
        );
}

#[test]
fn test_validate_plain_prints_names() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "lab.toml", SINGLE_LAN);
    netlab_cmd(dir.path())
        .args(["-o", "plain", "validate"])
        .arg(&file)
        .assert()
        .success()
        .stdout("lan1\nrouter1\nh1\n");
}

#[test]
fn test_validate_warns_about_unknown_networks() {
    let dir = TempDir::new().unwrap();
    let topo = format!("{SINGLE_LAN}\n[[devices]]\nname = \"h2\"\nkind = \"host\"\nnetworks = [\"ghost\"]\n");
    let file = write(dir.path(), "lab.toml", &topo);
    netlab_cmd(dir.path())
        .arg("validate")
        .arg(&file)
        .assert()
        .success()
        .stderr(predicate::str::contains("warning").and(predicate::str::contains("ghost")));
}

#[test]
fn test_validate_rejects_bad_subnet() {
    let dir = TempDir::new().unwrap();
    let file = write(
        dir.path(),
        "lab.toml",
        "[[networks]]\nname = \"lan1\"\nsubnet = \"10.0.0.1/24\"\n",
    );
    let output = netlab_cmd(dir.path())
        .arg("validate")
        .arg(&file)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(text.contains("lan1"), "{text}");
}

#[test]
fn test_validate_missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    netlab_cmd(dir.path())
        .arg("validate")
        .arg(dir.path().join("nope.toml"))
        .assert()
        .code(4);
}

// ── plan ────────────────────────────────────────────────────────────

#[test]
fn test_plan_prints_call_sequence_and_addresses() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "lab.toml", SINGLE_LAN);
    netlab_cmd(dir.path())
        .arg("plan")
        .arg(&file)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("create_network(lan1)")
                .and(predicate::str::contains("deploy_device(router1, netlab/router:latest)"))
                .and(predicate::str::contains("connect_device_to_network(router1, lan1)"))
                .and(predicate::str::contains("lan1=10.0.0.2"))
                .and(predicate::str::contains("lan1=10.0.0.3")),
        );
}

#[test]
fn test_plan_plain_is_call_per_line() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "lab.toml", SINGLE_LAN);
    netlab_cmd(dir.path())
        .args(["-o", "plain", "plan"])
        .arg(&file)
        .assert()
        .success()
        .stdout(
            "create_network(lan1)\n\
             deploy_device(router1, netlab/router:latest)\n\
             connect_device_to_network(router1, lan1)\n\
             deploy_device(h1, netlab/router:latest)\n\
             connect_device_to_network(h1, lan1)\n",
        );
}

#[test]
fn test_plan_json_reports_devices_and_teardown() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "lab.toml", SINGLE_LAN);
    let output = netlab_cmd(dir.path())
        .args(["-o", "json", "plan"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["backend"], "sim");
    assert_eq!(plan["calls"].as_array().unwrap().len(), 5);
    assert_eq!(plan["calls"][0]["op"], "create_network");
    assert_eq!(plan["devices"][0]["name"], "router1");
    assert_eq!(plan["devices"][0]["attachments"][0]["address"], "10.0.0.2");
    // Two device destroys and one network destroy.
    assert_eq!(plan["teardown_calls"], 3);
}

#[test]
fn test_plan_uses_config_file() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "config.toml",
        "[hub]\nrouter_tag = \"frr:9\"\n\n[monitoring]\naddress = \"10.9.9.9\"\nport = 9200\n",
    );
    let file = write(dir.path(), "lab.toml", SINGLE_LAN);
    netlab_cmd(dir.path())
        .args(["-o", "plain", "plan"])
        .arg(&file)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("deploy_device(h1, frr:9, 10.9.9.9:9200)").and(
                predicate::str::contains(
                    "deploy_device(router1, netlab/router:latest, 10.9.9.9:9200)",
                ),
            ),
        );
}

#[test]
fn test_plan_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "config.toml",
        "[hub]\noperation_timeout = \"soon\"\n",
    );
    let file = write(dir.path(), "lab.toml", SINGLE_LAN);
    netlab_cmd(dir.path())
        .arg("plan")
        .arg(&file)
        .assert()
        .code(7)
        .stderr(predicate::str::contains("operation_timeout"));
}

// ── config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_override() {
    let dir = TempDir::new().unwrap();
    netlab_cmd(dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    netlab_cmd(dir.path())
        .args(["config", "init"])
        .assert()
        .success();
    assert!(dir.path().join("config.toml").exists());

    netlab_cmd(dir.path())
        .args(["config", "init"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("--force"));

    netlab_cmd(dir.path())
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn test_config_show_defaults_and_env() {
    let dir = TempDir::new().unwrap();
    netlab_cmd(dir.path())
        .args(["config", "show"])
        .env("NETLAB_HUB__ROUTER_TAG", "frr:10")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[hub]")
                .and(predicate::str::contains("frr:10"))
                .and(predicate::str::contains("2m")),
        );
}

#[test]
fn test_config_show_malformed_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "config.toml", "[hub\nrouter_tag = ");
    netlab_cmd(dir.path())
        .args(["config", "show"])
        .assert()
        .code(7);
}
