use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn harvest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("harvest");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Port 9 (discard) refuses connections, so the doc source fails to gather.
    let config_content = format!(
        r#"[db]
path = "{}/data/harvest.sqlite"

[harvest]
probe_services = false

[http]
timeout_secs = 5

[logging]
filter = "warn"

[sources.doc.unreachable]
url = "http://127.0.0.1:9/doc.xml"
owner = "nobody"

[sources.waf.rivers]
url = "http://127.0.0.1:9/waf/"
active = false
"#,
        root.display()
    );

    let config_path = config_dir.join("harvest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_harvest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harvest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("HARVEST_DEBUG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harvest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn job_id(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("job: "))
        .unwrap_or_else(|| panic!("no job id in output: {}", stdout))
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_harvest(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/harvest.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_harvest(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_harvest(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_sources_lists_configured_sources() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_harvest(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("SOURCE"));
    assert!(stdout.contains("doc:unreachable"));
    assert!(stdout.contains("waf:rivers"));
    assert!(stdout.contains("nobody"));
}

#[test]
fn test_run_records_gather_error_and_report_shows_it() {
    let (_tmp, config_path) = setup_test_env();

    run_harvest(&config_path, &["init"]);
    let (stdout, stderr, success) = run_harvest(&config_path, &["run", "doc:unreachable"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("harvest doc:unreachable"));
    assert!(stdout.contains("gathered: 0 records"));
    assert!(stdout.contains("gather errors: 1"));
    assert!(stdout.contains("status: FINISHED"));
    assert!(stdout.contains("ok"));

    let id = job_id(&stdout);
    let (report, _, success) = run_harvest(&config_path, &["report", &id]);
    assert!(success);
    assert!(report.contains(&format!("job {}", id)));
    assert!(report.contains("source: doc:unreachable"));
    assert!(report.contains("Unable to get document:"));

    let (json, _, success) = run_harvest(&config_path, &["report", &id, "--json"]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["job"]["status"], "FINISHED");
    assert_eq!(value["gather_errors"].as_array().unwrap().len(), 1);
}

#[test]
fn test_run_unknown_source_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_harvest(&config_path, &["init"]);
    let (_, stderr, success) = run_harvest(&config_path, &["run", "csw:nowhere"]);
    assert!(!success);
    assert!(stderr.contains("Unknown source"));

    let (_, stderr, success) = run_harvest(&config_path, &["run", "ftp"]);
    assert!(!success);
    assert!(stderr.contains("Unknown source kind"));
}

#[test]
fn test_report_unknown_job_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_harvest(&config_path, &["init"]);
    let (_, stderr, success) = run_harvest(&config_path, &["report", "no-such-job"]);
    assert!(!success);
    assert!(stderr.contains("Job not found"));

    let (_, stderr, success) = run_harvest(&config_path, &["history", "no-such-guid"]);
    assert!(!success);
    assert!(stderr.contains("No harvest attempts"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_harvest(&tmp.path().join("missing.toml"), &["sources"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_run_all_skips_inactive_sources() {
    let (_tmp, config_path) = setup_test_env();

    run_harvest(&config_path, &["init"]);
    let (stdout, stderr, success) = run_harvest(&config_path, &["run", "all"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("harvest doc:unreachable"));
    assert!(!stdout.contains("harvest waf:rivers"));
}
