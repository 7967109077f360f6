//! Configuration system integration tests
//!
//! Tests configuration loading, validation, and environment overrides
//! through the CLI surface.

use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

mod common;

struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        Self { _temp_dir: temp_dir, config_path }
    }

    fn write_config(&self, content: &str) {
        fs::write(&self.config_path, content).unwrap();
    }

    fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }
}

fn shepherd_cmd() -> assert_cmd::Command {
    assert_cmd::Command::cargo_bin("shepherd").unwrap()
}

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_minimal_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[node]
role = "standalone"
"#,
    );

    shepherd_cmd().arg("config").arg("validate").arg("--config").arg(fixture.path()).assert().success();
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[node]
id = "test-node-001"
name = "Test Node"
role = "hybrid"
tags = ["gpu", "fast", "test"]

[node.client]
master_url = "ws://localhost:7700"
heartbeat_interval_ms = 15000

[node.resources]
max_memory_mb = 16384
max_gpu_memory_mb = 8192
max_gpu_percent = 90
max_threads = 8
enable_gpu = true

[scheduler]
strategy = "resource_aware"

[logging]
level = "debug"
file = "/tmp/shepherd.log"
max_file_size_mb = 50
max_files = 3
json_format = false

[ports]
base = 9000
max = 9100
"#,
    );

    shepherd_cmd().arg("config").arg("validate").arg("--config").arg(fixture.path()).assert().success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

// ─────────────────────────────────────────────────────────────────
// Fixture-backed Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_valid_config_fixture_passes_validation() {
    shepherd_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::valid_config_fixture().to_str().unwrap())
        .assert()
        .success();
}

#[test]
fn test_invalid_config_fixture_fails_validation() {
    shepherd_cmd()
        .arg("config")
        .arg("validate")
        .arg("--config")
        .arg(common::invalid_config_fixture().to_str().unwrap())
        .assert()
        .failure();
}

#[test]
fn test_client_role_without_master_url_rejected() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[node]
role = "client"
"#,
    );

    shepherd_cmd().arg("config").arg("validate").arg("--config").arg(fixture.path()).assert().failure();
}

#[test]
fn test_invalid_gpu_percent() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[node]
role = "standalone"

[node.resources]
max_gpu_percent = 150
"#,
    );

    shepherd_cmd().arg("config").arg("validate").arg("--config").arg(fixture.path()).assert().failure();
}

#[test]
fn test_invalid_port_range() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[ports]
base = 9000
max = 8081
"#,
    );

    shepherd_cmd().arg("config").arg("validate").arg("--config").arg(fixture.path()).assert().failure();
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[logging]
level = "invalid_level"
"#,
    );

    shepherd_cmd().arg("config").arg("validate").arg("--config").arg(fixture.path()).assert().failure();
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[node
role = "standalone"
"#,
    );

    shepherd_cmd().arg("config").arg("validate").arg("--config").arg(fixture.path()).assert().failure();
}

// ─────────────────────────────────────────────────────────────────
// Config Show Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_custom() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[node]
id = "custom-id-123"
name = "Custom Node"
role = "standalone"

[node.resources]
max_memory_mb = 32768
"#,
    );

    shepherd_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .assert()
        .success()
        .stdout(predicates::str::contains("custom-id-123"))
        .stdout(predicates::str::contains("Custom Node"))
        .stdout(predicates::str::contains("32768"));
}

// ─────────────────────────────────────────────────────────────────
// Config Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("new_config.toml");

    shepherd_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(config_path.to_str().unwrap())
        .assert()
        .success()
        .stdout(predicates::str::contains("written"));

    assert!(config_path.exists());

    shepherd_cmd().arg("config").arg("validate").arg("--config").arg(config_path.to_str().unwrap()).assert().success();
}

#[test]
fn test_config_init_refuses_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[node]\nrole = \"standalone\"\n");

    shepherd_cmd()
        .arg("config")
        .arg("init")
        .arg("--path")
        .arg(fixture.path())
        .assert()
        .failure()
        .stderr(predicates::str::contains("already exists"));
}

#[test]
fn test_config_init_force_overwrite() {
    let fixture = ConfigFixture::new();
    fixture.write_config("[node]\nid = \"old\"\nrole = \"standalone\"\n");

    shepherd_cmd().arg("config").arg("init").arg("--path").arg(fixture.path()).arg("--force").assert().success();

    let content = fs::read_to_string(fixture.path()).unwrap();
    assert!(!content.contains("\"old\""));
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_override_node_id() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[node]
id = "from-file"
role = "standalone"
"#,
    );

    shepherd_cmd()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(fixture.path())
        .env("SHEPHERD_NODE_ID", "from-env")
        .assert()
        .success()
        .stdout(predicates::str::contains("from-env"));
}

#[test]
fn test_env_override_resources() {
    shepherd_cmd()
        .arg("config")
        .arg("show")
        .env("SHEPHERD_MAX_MEMORY_MB", "65536")
        .env_remove("SHEPHERD_CONFIG")
        .assert()
        .success()
        .stdout(predicates::str::contains("65536"));
}

// ─────────────────────────────────────────────────────────────────
// Path Expansion Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_tilde_expansion() {
    let fixture = ConfigFixture::new();
    fixture.write_config(
        r#"
[node]
role = "standalone"

[node.executor]
bin_dir = "~/shepherd-bin"
"#,
    );

    let output = shepherd_cmd().arg("config").arg("show").arg("--config").arg(fixture.path()).assert().success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(!stdout.contains("bin_dir = \"~"));
}
