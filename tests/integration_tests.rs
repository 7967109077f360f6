//! Integration test harness
//!
//! Comprehensive integration tests with fixtures and mock systems

use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

// ─────────────────────────────────────────────────────────────────
// Test Fixtures
// ─────────────────────────────────────────────────────────────────

/// Complete test environment with all necessary directories and files
pub struct TestEnvironment {
    pub root: TempDir,
    pub config_path: PathBuf,
    pub bin_dir: PathBuf,
    pub model_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl TestEnvironment {
    /// Create a new test environment with default configuration
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp directory");
        let root_path = root.path();

        let bin_dir = root_path.join("bin");
        let model_dir = root_path.join("models");
        let log_dir = root_path.join("logs");
        let config_path = root_path.join("config.toml");

        fs::create_dir_all(&bin_dir).expect("Failed to create bin dir");
        fs::create_dir_all(&model_dir).expect("Failed to create model dir");
        fs::create_dir_all(&log_dir).expect("Failed to create log dir");

        let config = format!(
            r#"
[node]
id = "test-node"
name = "Integration Test Node"
role = "standalone"

[node.executor]
bin_dir = "{}"

[node.resources]
max_memory_mb = 4096
max_gpu_memory_mb = 0
max_gpu_percent = 50
max_threads = 2
enable_gpu = false

[models]
paths = ["{}"]
auto_scan = false

[logging]
level = "debug"
file = "{}"
max_file_size_mb = 10
max_files = 2
json_format = false
"#,
            bin_dir.display(),
            model_dir.display(),
            log_dir.join("test.log").display(),
        );

        fs::write(&config_path, config).expect("Failed to write config");

        Self { root, config_path, bin_dir, model_dir, log_dir }
    }

    pub fn with_config(config_content: &str) -> Self {
        let env = Self::new();
        fs::write(&env.config_path, config_content).expect("Failed to write custom config");
        env
    }

    pub fn config(&self) -> &str {
        self.config_path.to_str().unwrap()
    }

    pub fn shepherd_cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("shepherd").unwrap();
        cmd.arg("--config").arg(self.config());
        cmd
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────
// End-to-End Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_full_config_workflow() {
    let env = TestEnvironment::new();

    assert_cmd::Command::cargo_bin("shepherd")
        .unwrap()
        .arg("config")
        .arg("show")
        .arg("--config")
        .arg(env.config())
        .assert()
        .success()
        .stdout(predicates::str::contains("test-node"));

    assert_cmd::Command::cargo_bin("shepherd").unwrap().arg("config").arg("validate").arg("--config").arg(env.config()).assert().success();

    assert_cmd::Command::cargo_bin("shepherd")
        .unwrap()
        .arg("scan")
        .arg("--config")
        .arg(env.config())
        .assert()
        .success()
        .stdout(predicates::str::contains("found 0 model(s)"));
}

#[test]
fn test_models_directory_scanned() {
    let env = TestEnvironment::new();

    assert!(env.model_dir.exists());

    assert_cmd::Command::cargo_bin("shepherd")
        .unwrap()
        .arg("scan")
        .arg("--path")
        .arg(env.model_dir.to_str().unwrap())
        .assert()
        .success();
}

#[test]
fn test_log_directory_configured() {
    let env = TestEnvironment::new();
    assert!(env.log_dir.exists());

    let config_content = fs::read_to_string(&env.config_path).unwrap();
    assert!(config_content.contains(&env.log_dir.display().to_string()));
}

// ─────────────────────────────────────────────────────────────────
// Error Scenario Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_error_exit_codes() {
    let result = assert_cmd::Command::cargo_bin("shepherd")
        .unwrap()
        .arg("run")
        .arg("--config")
        .arg("/nonexistent/path/config.toml")
        .assert()
        .failure();

    let exit_code = result.get_output().status.code().unwrap_or(1);
    assert_eq!(exit_code, 10, "Expected config error exit code (10)");
}

#[test]
fn test_invalid_config_exit_code() {
    let env = TestEnvironment::with_config(
        r#"
[node]
role = "client"
"#,
    );

    let result = assert_cmd::Command::cargo_bin("shepherd").unwrap().arg("config").arg("validate").arg("--config").arg(env.config()).assert().failure();

    let exit_code = result.get_output().status.code().unwrap_or(1);
    assert_eq!(exit_code, 10);
}

// ─────────────────────────────────────────────────────────────────
// Performance Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_startup_time() {
    use std::time::Instant;

    let start = Instant::now();
    assert_cmd::Command::cargo_bin("shepherd").unwrap().arg("version").assert().success();
    let elapsed = start.elapsed();

    assert!(elapsed < Duration::from_secs(1), "Startup too slow: {:?}", elapsed);
}

#[test]
fn test_config_parse_time() {
    use std::time::Instant;

    let env = TestEnvironment::new();
    let start = Instant::now();

    assert_cmd::Command::cargo_bin("shepherd").unwrap().arg("config").arg("show").arg("--config").arg(env.config()).assert().success();

    let elapsed = start.elapsed();
    assert!(elapsed < Duration::from_millis(500), "Config parsing too slow: {:?}", elapsed);
}

// ─────────────────────────────────────────────────────────────────
// Concurrent Access Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_concurrent_config_reads() {
    use std::thread;

    let env = TestEnvironment::new();
    let config_path = env.config().to_string();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = config_path.clone();
            thread::spawn(move || {
                assert_cmd::Command::cargo_bin("shepherd").unwrap().arg("config").arg("validate").arg("--config").arg(&path).assert().success();
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
}
