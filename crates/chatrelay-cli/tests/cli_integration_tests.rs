//! CLI integration tests for chatrelay
//!
//! Runs the chatrelay binary end-to-end with isolated config and data
//! directories and no provider credentials.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const KEY_VARS: [&str; 16] = [
    "OPENROUTER_API_KEY",
    "GROQ_API_KEY",
    "OPENAI_API_KEY",
    "MISTRAL_API_KEY",
    "DEEPSEEK_API_KEY",
    "GEMINI_API_KEY",
    "CLOUDFLARE_API_TOKEN",
    "CLOUDFLARE_ACCOUNT_ID",
    "CHATRELAY_OPENROUTER_API_KEY",
    "CHATRELAY_GROQ_API_KEY",
    "CHATRELAY_OPENAI_API_KEY",
    "CHATRELAY_MISTRAL_API_KEY",
    "CHATRELAY_DEEPSEEK_API_KEY",
    "CHATRELAY_GEMINI_API_KEY",
    "CHATRELAY_CLOUDFLARE_API_KEY",
    "CHATRELAY_CLOUDFLARE_ACCOUNT_ID",
];

/// Command with its own config/data directories and no API keys.
///
/// The working directory is the temp dir so no stray `.env` is picked up.
#[allow(deprecated)]
fn chatrelay_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("chatrelay").unwrap();
    cmd.current_dir(home.path());
    cmd.env("CHATRELAY_CONFIG_DIR", home.path().join("config"));
    cmd.env("CHATRELAY_DATA_DIR", home.path().join("data"));
    cmd.env_remove("RUST_LOG");
    for var in KEY_VARS {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_lists_commands() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ask"))
        .stdout(predicate::str::contains("health"))
        .stdout(predicate::str::contains("providers"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_path_honours_env() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains(
            home.path().join("config").display().to_string(),
        ));
}

#[test]
fn test_config_set_then_get() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .args(["config", "set", "router.max_attempts", "6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set router.max_attempts = 6"));

    assert!(home.path().join("config").join("config.toml").exists());

    chatrelay_cmd(&home)
        .args(["config", "get", "router.max_attempts"])
        .assert()
        .success()
        .stdout(predicate::str::diff("6\n"));
}

#[test]
fn test_config_rejects_bad_values() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .args(["config", "set", "router.max_attempts", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least 1"));

    chatrelay_cmd(&home)
        .args(["config", "set", "api_key.groq", "secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("environment variable"));

    chatrelay_cmd(&home)
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_config_list_and_reset() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .args(["config", "set", "health.cooldown_secs", "60"])
        .assert()
        .success();

    chatrelay_cmd(&home)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("health.cooldown_secs = 60"))
        .stdout(predicate::str::contains("api_key.groq = (not set"));

    chatrelay_cmd(&home)
        .args(["config", "reset"])
        .assert()
        .success();

    chatrelay_cmd(&home)
        .args(["config", "get", "health.cooldown_secs"])
        .assert()
        .success()
        .stdout(predicate::str::diff("900\n"));
}

#[test]
fn test_ask_without_keys_is_configuration_error() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .args(["ask", "hello there"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_health_without_keys_succeeds() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .arg("health")
        .assert()
        .success()
        .stdout(predicate::str::contains("No providers enabled"));

    assert!(home.path().join("data").join("health.db").exists());
}

#[test]
fn test_health_for_explicit_ids_reports_zero_state() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .args(["--format", "json", "health", "groq:llama-3.3-70b-versatile"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"consecutive_failures\": 0"))
        .stdout(predicate::str::contains("\"is_cooling_down\": false"));
}

#[test]
fn test_providers_lists_disabled_backends() {
    let home = TempDir::new().unwrap();

    chatrelay_cmd(&home)
        .args(["providers", "--vision"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Intent: vision"))
        .stdout(predicate::str::contains("GROQ_API_KEY"));
}
