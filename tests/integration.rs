use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rcl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rcl");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    // Page export for import tests
    fs::write(
        root.join("pages.json"),
        r#"[
            {
                "id": "p-100",
                "title": "Deploy Runbook",
                "author": "sam",
                "created_at": "2024-01-01T00:00:00Z",
                "updated_at": "2024-03-01T00:00:00Z",
                "content": "How we deploy services to production."
            },
            {
                "id": "p-101",
                "title": "Oncall Guide",
                "author": "kim",
                "created_at": "2024-01-05T00:00:00Z",
                "updated_at": "2024-02-01T00:00:00Z",
                "content": "Escalation paths and paging policy.",
                "comments": [
                    { "text": "link is stale", "author": "lee", "timestamp": "2024-02-10T00:00:00Z" }
                ]
            }
        ]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/rcl.sqlite"

[reconcile]
retry_limit = 1
poll_interval_ms = 10
dispatch_delay_ms = 0

[server]
bind = "127.0.0.1:7431"
"#,
        root.display()
    );

    let config_path = config_dir.join("rcl.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rcl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rcl_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rcl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rcl(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_rcl(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_rcl(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_from_export_file() {
    let (tmp, config_path) = setup_test_env();

    run_rcl(&config_path, &["init"]);
    let export = tmp.path().join("pages.json");
    let (stdout, stderr, success) = run_rcl(
        &config_path,
        &["import", "--file", export.to_str().unwrap(), "--space", "ENG"],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Imported 2 pages into space ENG"));
}

#[test]
fn test_import_idempotent() {
    let (tmp, config_path) = setup_test_env();

    run_rcl(&config_path, &["init"]);
    let export = tmp.path().join("pages.json");
    let export = export.to_str().unwrap();

    let (stdout1, _, _) = run_rcl(&config_path, &["import", "--file", export, "--space", "ENG"]);
    assert!(stdout1.contains("Imported 2 pages"));

    // Re-import upserts the same 2 pages, never duplicates.
    let (stdout2, _, _) = run_rcl(&config_path, &["import", "--file", export, "--space", "ENG"]);
    assert!(stdout2.contains("Imported 2 pages"));
}

#[test]
fn test_import_missing_file_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_rcl(&config_path, &["init"]);
    let (_, stderr, success) = run_rcl(
        &config_path,
        &["import", "--file", "/nonexistent/pages.json", "--space", "ENG"],
    );
    assert!(!success);
    assert!(stderr.contains("cannot read"), "stderr: {}", stderr);
}

#[test]
fn test_reconcile_with_disabled_provider_reports_remaining() {
    let (tmp, config_path) = setup_test_env();

    run_rcl(&config_path, &["init"]);
    let export = tmp.path().join("pages.json");
    run_rcl(
        &config_path,
        &["import", "--file", export.to_str().unwrap(), "--space", "ENG"],
    );

    // The default provider is disabled, so every dispatch fails and both
    // pages stay stale.
    let (stdout, stderr, success) = run_rcl(&config_path, &["reconcile", "--kind", "pages"]);
    assert!(success, "reconcile failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 still stale"), "stdout: {}", stdout);
}

#[test]
fn test_reconcile_with_nothing_to_do_converges() {
    let (_tmp, config_path) = setup_test_env();

    run_rcl(&config_path, &["init"]);
    let (stdout, _, success) = run_rcl(&config_path, &["reconcile", "--kind", "pages"]);
    assert!(success);
    assert!(stdout.contains("converged in 0 attempts"), "stdout: {}", stdout);
}

#[test]
fn test_unknown_kind_rejected() {
    let (_tmp, config_path) = setup_test_env();

    run_rcl(&config_path, &["init"]);
    let (_, stderr, success) = run_rcl(&config_path, &["reconcile", "--kind", "chunks"]);
    assert!(!success);
    assert!(stderr.contains("Unknown record kind"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let (_tmp, _config_path) = setup_test_env();

    let missing = Path::new("/nonexistent/rcl.toml");
    let (_, stderr, success) = run_rcl(missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("config"), "stderr: {}", stderr);
}
