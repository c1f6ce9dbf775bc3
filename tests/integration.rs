use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn inkdex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("inkdex");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    // Studio sites on a closed local port: every fetch fails fast.
    fs::write(
        config_dir.join("studios.toml"),
        r#"
[[studios]]
source_id = "black-anchor"
display_name = "Black Anchor"
website_url = "http://127.0.0.1:1/black-anchor"
address = { city = "Austin" }

[[studios]]
source_id = "iron-rose"
display_name = "Iron Rose"
website_url = "http://127.0.0.1:1/iron-rose"
address = { city = "Austin" }

[[studios]]
source_id = "gold-lotus"
display_name = "Gold Lotus"
website_url = "http://127.0.0.1:1/gold-lotus"
address = { city = "Denver" }
"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/inkdex.sqlite"

[index]
path = "{root}/data/index.sqlite"

[discovery]
provider = "seed"
seed_file = "studios.toml"

[extract]
timeout_secs = 1

[scrape]
timeout_secs = 1

[retry]
max_attempts = 1
base_delay_ms = 1
max_delay_ms = 5

[sync]
shards = 2
"#,
        root = root.display()
    );

    let config_path = config_dir.join("inkdex.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_inkdex(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = inkdex_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run inkdex binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn json(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("not JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_creates_databases() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_inkdex(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/inkdex.sqlite").exists());
    assert!(tmp.path().join("data/index.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_inkdex(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_inkdex(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_discover_reports_unreachable_studios_as_item_failures() {
    let (_tmp, config_path) = setup_test_env();
    run_inkdex(&config_path, &["init"]);

    let (stdout, stderr, success) = run_inkdex(&config_path, &["discover", "austin"]);
    assert!(success, "discover failed: stdout={}, stderr={}", stdout, stderr);

    let summary = json(&stdout);
    assert_eq!(summary["state"], "completed");
    assert_eq!(summary["discovered"], 2);
    assert_eq!(summary["extracted"], 0);
    assert_eq!(summary["ingested"], 0);
    let failed = summary["failed"].as_array().unwrap();
    assert_eq!(failed.len(), 2);
    assert!(failed.iter().all(|f| f["stage"] == "extraction"));
    assert!(failed.iter().all(|f| f["kind"] == "transient_network"));
}

#[test]
fn test_discover_is_recorded_in_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_inkdex(&config_path, &["init"]);
    run_inkdex(&config_path, &["discover", "denver"]);

    let (stdout, stderr, success) = run_inkdex(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Artists:      0"));
    assert!(stdout.contains("Recent runs:"));
    assert!(stdout.contains("denver"));
}

#[test]
fn test_sync_on_empty_feed() {
    let (_tmp, config_path) = setup_test_env();
    run_inkdex(&config_path, &["init"]);

    let (stdout, stderr, success) = run_inkdex(&config_path, &["sync"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    let report = json(&stdout);
    assert_eq!(report["events_read"], 0);
    assert_eq!(report["dead_lettered"], 0);
    assert_eq!(report["head"], 0);
}

#[test]
fn test_status_lists_every_shard() {
    let (_tmp, config_path) = setup_test_env();
    run_inkdex(&config_path, &["init"]);

    let (stdout, stderr, success) = run_inkdex(&config_path, &["status"]);
    assert!(success, "status failed: stdout={}, stderr={}", stdout, stderr);
    let status = json(&stdout);
    assert_eq!(status["shards"].as_array().unwrap().len(), 2);
    assert_eq!(status["behind"], 0);
    assert_eq!(status["dead_letters"], 0);
}

#[test]
fn test_find_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();
    run_inkdex(&config_path, &["init"]);

    let (stdout, _, success) = run_inkdex(
        &config_path,
        &["find", "--city", "austin", "--style", "blackwork"],
    );
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_reconcile_dry_run_clean() {
    let (_tmp, config_path) = setup_test_env();
    run_inkdex(&config_path, &["init"]);

    let (stdout, stderr, success) = run_inkdex(&config_path, &["reconcile", "--dry-run"]);
    assert!(success, "reconcile failed: stdout={}, stderr={}", stdout, stderr);
    let report = json(&stdout);
    assert_eq!(report["examined"], 0);
    assert!(report["drift"].as_array().unwrap().is_empty());
}

#[test]
fn test_reconcile_rejects_unknown_direction() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_inkdex(&config_path, &["reconcile", "--direction", "sideways"]);
    assert!(!success);
    assert!(stderr.contains("sideways"));
}

#[test]
fn test_dead_letters_empty() {
    let (_tmp, config_path) = setup_test_env();
    run_inkdex(&config_path, &["init"]);

    let (stdout, _, success) = run_inkdex(&config_path, &["dead-letters", "list"]);
    assert!(success);
    assert!(stdout.contains("No dead letters."));

    let (_, _, success) = run_inkdex(&config_path, &["dead-letters", "replay", "nope"]);
    assert!(!success);
}

#[test]
fn test_get_and_takedown_unknown_record() {
    let (_tmp, config_path) = setup_test_env();
    run_inkdex(&config_path, &["init"]);

    let (_, _, success) = run_inkdex(&config_path, &["takedown", "artist:missing"]);
    assert!(!success);

    let (_, _, success) = run_inkdex(&config_path, &["curate", "delist", "studio:missing"]);
    assert!(!success);
}

#[test]
fn test_missing_config_error() {
    let (stdout, stderr, success) = run_inkdex(Path::new("/nonexistent/inkdex.toml"), &["init"]);
    assert!(!success);
    assert!(
        stderr.contains("Failed to read config"),
        "stdout={}, stderr={}",
        stdout,
        stderr
    );
}
