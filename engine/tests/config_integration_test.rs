//! Integration tests for configuration management
//!
//! Loads config files from disk the way the binary does with `--config`.

use pilot_engine::config::Config;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_from_path_expands_and_creates_data_dir() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("data");
    let config_path = temp_dir.path().join("config.toml");

    let toml_content = format!(
        r#"
[core]
log_level = "debug"
data_dir = "{}"

[llm]
max_tokens = 4096

[llm.proxy]
base_url = "http://localhost:4100"
api_key_env = "TEST_PROXY_KEY"

[actuation]
base_url = "http://desktop:9990"

[agent]
default_provider = "proxy"
default_model = "gpt-4o"
summarization_ratio = 0.5
"#,
        data_dir.display()
    );
    fs::write(&config_path, toml_content).unwrap();

    let config = Config::load_from_path(&config_path).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert!(data_dir.exists());
    assert_eq!(config.database_path(), data_dir.join("pilot.db"));
    assert_eq!(config.llm.max_tokens, 4096);
    assert_eq!(config.llm.proxy.base_url, "http://localhost:4100");
    assert_eq!(config.actuation.base_url, "http://desktop:9990");
    assert_eq!(config.agent.default_provider, "proxy");
    assert_eq!(config.agent.summarization_ratio, 0.5);
    // untouched sections keep their defaults
    assert_eq!(config.agent.default_context_window, 200_000);
    assert_eq!(config.agent.plan_context_messages, 10);
    assert_eq!(config.llm.anthropic.api_key_env, "ANTHROPIC_API_KEY");
}

#[test]
fn test_load_from_path_rejects_invalid_values() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[agent]
default_context_window = 0
"#,
    )
    .unwrap();

    assert!(Config::load_from_path(&config_path).is_err());
}

#[test]
fn test_load_from_path_rejects_malformed_toml() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[core\nlog_level = ").unwrap();

    assert!(Config::load_from_path(&config_path).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    assert!(Config::load_from_path(&temp_dir.path().join("absent.toml")).is_err());
}
