use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn bt_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_bt"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("store");
    (tmp, dir)
}

fn run_bt(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = bt_binary();
    let output = Command::new(&binary)
        .arg("--dir")
        .arg(dir)
        .args(args)
        .env_remove("BEATS_DIR")
        .env_remove("RUST_LOG")
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run bt binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn add(dir: &Path, content: &str, date: &str) -> String {
    let (stdout, stderr, success) = run_bt(dir, &["add", content, "--date", date]);
    assert!(success, "add failed: stdout={}, stderr={}", stdout, stderr);
    stdout.trim().to_string()
}

#[test]
fn test_init_creates_store() {
    let (_tmp, dir) = setup_test_env();

    let (stdout, stderr, success) = run_bt(&dir, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Initialized"));
    assert!(dir.join("beats.db").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, dir) = setup_test_env();

    let (_, _, success1) = run_bt(&dir, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_bt(&dir, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_add_assigns_sequential_ids() {
    let (_tmp, dir) = setup_test_env();

    assert_eq!(add(&dir, "First beat", "2025-01-05"), "beat-20250105-001");
    assert_eq!(add(&dir, "Second beat", "2025-01-05"), "beat-20250105-002");
    assert_eq!(add(&dir, "Other day", "2025-01-06"), "beat-20250106-001");

    let log = fs::read_to_string(dir.join("beats.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 3);
    assert!(log.contains("\"impetus\""));
}

#[test]
fn test_show_and_list() {
    let (_tmp, dir) = setup_test_env();
    let id = add(&dir, "Breakfast with the team", "2025-02-01");

    let (stdout, _, success) = run_bt(&dir, &["show", &id]);
    assert!(success);
    assert!(stdout.contains("Breakfast with the team"));
    assert!(stdout.contains("Manual entry"));

    let (stdout, _, success) = run_bt(&dir, &["--json", "show", &id]);
    assert!(success);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["id"], id.as_str());

    let (stdout, _, success) = run_bt(&dir, &["list"]);
    assert!(success);
    assert!(stdout.contains(&id));
}

#[test]
fn test_show_missing_record() {
    let (_tmp, dir) = setup_test_env();
    add(&dir, "Something", "2025-02-01");

    let (_, stderr, success) = run_bt(&dir, &["show", "beat-20990101-001"]);
    assert!(!success, "show of a missing id should fail");
    assert!(stderr.contains("beat-20990101-001"));
}

#[test]
fn test_deleted_id_not_reused() {
    let (_tmp, dir) = setup_test_env();
    add(&dir, "one", "2025-03-03");
    let second = add(&dir, "two", "2025-03-03");

    let (stdout, _, success) = run_bt(&dir, &["delete", &second]);
    assert!(success);
    assert!(stdout.contains("Deleted"));

    assert_eq!(add(&dir, "three", "2025-03-03"), "beat-20250303-003");
}

#[test]
fn test_redate_regenerates_id() {
    let (_tmp, dir) = setup_test_env();
    let id = add(&dir, "Moved later", "2025-04-01");

    let (stdout, stderr, success) = run_bt(&dir, &["redate", &id, "2025-04-10"]);
    assert!(success, "redate failed: {}", stderr);
    assert!(stdout.contains("beat-20250410-001"), "got: {}", stdout);

    let (_, _, success) = run_bt(&dir, &["show", &id]);
    assert!(!success, "old id should be gone");
}

#[test]
fn test_link_and_edit() {
    let (_tmp, dir) = setup_test_env();
    let id = add(&dir, "Follow-up", "2025-05-02");

    let (stdout, stderr, success) = run_bt(&dir, &["link", &id, "bd-42", "bd-7"]);
    assert!(success, "link failed: {}", stderr);
    assert!(stdout.contains("bd-42"), "got: {}", stdout);

    let (stdout, _, _) = run_bt(&dir, &["--json", "show", &id]);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let linked: Vec<&str> = value["linked_beads"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(linked, vec!["bd-42", "bd-7"]);

    let (_, stderr, success) = run_bt(&dir, &["unlink", &id, "bd-42"]);
    assert!(success, "unlink failed: {}", stderr);

    let (_, stderr, success) = run_bt(
        &dir,
        &["edit", &id, "--content", "Follow-up, revised", "--add-ref", "url:https://example.com"],
    );
    assert!(success, "edit failed: {}", stderr);

    let (stdout, _, _) = run_bt(&dir, &["--json", "show", &id]);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["content"], "Follow-up, revised");
    assert_eq!(value["linked_beads"], serde_json::json!(["bd-7"]));
    assert_eq!(value["references"][0]["locator"], "https://example.com");
}

#[test]
fn test_link_requires_a_bead_and_an_existing_record() {
    let (_tmp, dir) = setup_test_env();
    let id = add(&dir, "Lonely", "2025-05-03");

    let (_, _, success) = run_bt(&dir, &["link", &id]);
    assert!(!success, "link without bead ids should fail");

    let (_, stderr, success) = run_bt(&dir, &["link", "beat-20990101-001", "bd-1"]);
    assert!(!success, "linking from a missing record should fail");
    assert!(stderr.contains("beat-20990101-001"));
}

#[test]
fn test_amend_edits_most_recent() {
    let (_tmp, dir) = setup_test_env();
    add(&dir, "Older", "2025-05-01");
    let latest = add(&dir, "Newest", "2025-05-03");

    let (stdout, stderr, success) = run_bt(&dir, &["amend", "--label", "Reflection"]);
    assert!(success, "amend failed: {}", stderr);
    assert!(stdout.contains(&latest));

    let (stdout, _, _) = run_bt(&dir, &["show", &latest]);
    assert!(stdout.contains("Reflection"));
}

#[test]
fn test_search_keyword() {
    let (_tmp, dir) = setup_test_env();
    add(&dir, "Debugging the flaky deploy pipeline", "2025-06-01");
    add(&dir, "Lunch in the park", "2025-06-01");

    let (stdout, _, success) = run_bt(&dir, &["search", "deploy"]);
    assert!(success, "search failed");
    assert!(stdout.contains("beat-20250601-001"), "got: {}", stdout);
    assert!(!stdout.contains("beat-20250601-002"));
}

#[test]
fn test_search_fulltext() {
    let (_tmp, dir) = setup_test_env();
    run_bt(&dir, &["init"]);
    add(&dir, "Debugging the flaky deploy pipeline", "2025-06-01");

    let (stdout, stderr, success) =
        run_bt(&dir, &["--json", "search", "deplo", "--mode", "fulltext"]);
    assert!(success, "search failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["mode"], "fulltext");
    assert_eq!(value["fallback"], false);
    assert_eq!(value["results"][0]["id"], "beat-20250601-001");
}

#[test]
fn test_search_semantic_falls_back_when_disabled() {
    let (_tmp, dir) = setup_test_env();
    add(&dir, "Quiet morning by the lake", "2025-06-02");

    let (stdout, stderr, success) =
        run_bt(&dir, &["--json", "search", "lake", "--mode", "semantic"]);
    assert!(success, "search failed: {}", stderr);
    let value: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(value["mode"], "keyword");
    assert_eq!(value["fallback"], true);
    assert_eq!(value["results"].as_array().unwrap().len(), 1);
}

#[test]
fn test_search_empty_query() {
    let (_tmp, dir) = setup_test_env();
    let (_, _, success) = run_bt(&dir, &["search", "  "]);
    assert!(!success, "empty query should fail");
}

#[test]
fn test_search_unknown_mode_errors() {
    let (_tmp, dir) = setup_test_env();
    add(&dir, "anything", "2025-06-03");
    let (_, stderr, success) = run_bt(&dir, &["search", "anything", "--mode", "hybrid"]);
    assert!(!success);
    assert!(stderr.contains("Unknown search mode"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, dir) = setup_test_env();
    add(&dir, "anything", "2025-06-03");
    let (stdout, _, success) = run_bt(&dir, &["search", "zebra"]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_embed_compute_errors_when_disabled() {
    let (_tmp, dir) = setup_test_env();
    let (_, stderr, success) = run_bt(&dir, &["embed", "compute"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_embed_status_reports_coverage() {
    let (_tmp, dir) = setup_test_env();
    add(&dir, "one", "2025-06-04");
    let (stdout, _, success) = run_bt(&dir, &["embed", "status"]);
    assert!(success);
    assert!(stdout.contains("0 / 1"), "got: {}", stdout);
}

#[test]
fn test_export_import_roundtrip() {
    let (tmp, dir) = setup_test_env();
    add(&dir, "alpha", "2025-07-01");
    add(&dir, "beta, with a comma", "2025-07-02");

    let out = tmp.path().join("export.jsonl");
    let (_, stderr, success) = run_bt(
        &dir,
        &["export", "--format", "jsonl", "--output", out.to_str().unwrap()],
    );
    assert!(success, "export failed: {}", stderr);
    assert_eq!(fs::read_to_string(&out).unwrap().lines().count(), 2);

    let other = tmp.path().join("other");
    let (stdout, stderr, success) = run_bt(&other, &["import", out.to_str().unwrap()]);
    assert!(success, "import failed: {}", stderr);
    assert!(stdout.contains("imported: 2"));

    // Same ids again conflict by default
    let (_, _, success) = run_bt(&other, &["import", out.to_str().unwrap()]);
    assert!(!success);
    let (stdout, _, success) = run_bt(
        &other,
        &["import", out.to_str().unwrap(), "--on-conflict", "skip"],
    );
    assert!(success);
    assert!(stdout.contains("skipped: 2"));

    let (stdout, _, success) = run_bt(&dir, &["export", "--format", "csv"]);
    assert!(success);
    assert!(stdout.starts_with("id,created_at"));
    assert!(stdout.contains("\"beta, with a comma\""));
}

#[test]
fn test_hooks_trigger_synthesis() {
    let (_tmp, dir) = setup_test_env();

    let (stdout, stderr, success) = run_bt(&dir, &["hooks", "init", "--threshold", "2"]);
    assert!(success, "hooks init failed: {}", stderr);
    assert!(stdout.contains("Hooks enabled"));

    add(&dir, "first", "2025-08-01");
    assert!(!dir.join("synthesis_needed.json").exists());
    add(&dir, "second", "2025-08-01");
    assert!(dir.join("synthesis_needed.json").exists());

    let (stdout, _, success) = run_bt(&dir, &["hooks", "status"]);
    assert!(success);
    assert!(stdout.contains("pending:    yes"), "got: {}", stdout);

    let (stdout, _, success) = run_bt(&dir, &["hooks", "clear"]);
    assert!(success);
    assert!(stdout.contains("Cleared"));
    assert!(!dir.join("synthesis_needed.json").exists());
}

#[test]
fn test_where_prints_paths() {
    let (_tmp, dir) = setup_test_env();
    let (stdout, _, success) = run_bt(&dir, &["where"]);
    assert!(success);
    assert!(stdout.contains("beats.jsonl"));
    assert!(stdout.contains("marker:  0:0"));
}
