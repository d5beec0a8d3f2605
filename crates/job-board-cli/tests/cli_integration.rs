use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

struct TempDb {
    path: PathBuf,
}

impl TempDb {
    fn new(label: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "job-board-cli-{label}-{}.sqlite3",
            ulid::Ulid::new()
        ));
        Self { path }
    }

    fn args<'a>(&'a self, rest: &[&'a str]) -> Vec<&'a str> {
        let mut args = vec!["--db", path_str(&self.path)];
        args.extend_from_slice(rest);
        args
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str()
        .unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn run_jb<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_jb"))
        .args(args)
        .env_remove("JOB_BOARD_DB")
        .env("RUST_LOG", "off")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute jb binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_jb(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "jb command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn create(db: &TempDb, title: &str, extra: &[&str]) -> Value {
    let mut args = db.args(&["job", "create", "--title", title]);
    args.extend_from_slice(extra);
    run_json(args)
}

#[test]
fn cli_db_migrate_and_schema_version() {
    let db = TempDb::new("migrate");

    let planned = run_json(db.args(&["db", "migrate", "--dry-run"]));
    assert_eq!(as_str(&planned, "contract_version"), "cli.v1");
    assert_eq!(planned.get("dry_run").and_then(Value::as_bool), Some(true));

    let applied = run_json(db.args(&["db", "migrate"]));
    assert_eq!(as_i64(&applied, "after_version"), 2);

    let status = run_json(db.args(&["db", "schema-version"]));
    assert_eq!(status.get("up_to_date").and_then(Value::as_bool), Some(true));
}

#[test]
fn cli_create_reorder_and_list_keep_orders_dense() {
    let db = TempDb::new("flow");

    let first = create(&db, "Backend Engineer", &["--tag", "remote"]);
    let second = create(&db, "Frontend Engineer", &[]);
    let third = create(&db, "Data Engineer", &["--tag", "remote"]);
    assert_eq!(as_i64(&first, "order"), 1);
    assert_eq!(as_i64(&third, "order"), 3);

    let inserted = create(&db, "Staff Engineer", &["--order", "1"]);
    assert_eq!(as_i64(&inserted, "order"), 1);
    assert_eq!(as_str(&inserted, "slug"), "staff-engineer");

    let second_id = as_str(&second, "id");
    let moved = run_json(db.args(&[
        "job", "reorder", "--id", second_id, "--from", "3", "--to", "1",
    ]));
    assert_eq!(as_i64(&moved, "order"), 1);

    let page = run_json(db.args(&["job", "list"]));
    assert_eq!(as_i64(&page, "total"), 4);
    let titles: Vec<&str> = page
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("title")?.as_str())
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(
        titles,
        vec![
            "Frontend Engineer",
            "Staff Engineer",
            "Backend Engineer",
            "Data Engineer"
        ]
    );

    let remote = run_json(db.args(&["job", "list", "--tag", " remote "]));
    assert_eq!(as_i64(&remote, "total"), 2);

    let report = run_json(db.args(&["db", "integrity-check"]));
    assert_eq!(report.get("healthy").and_then(Value::as_bool), Some(true));
}

#[test]
fn cli_stale_reorder_fails_with_conflict() {
    let db = TempDb::new("conflict");
    let job = create(&db, "Recruiter", &[]);
    create(&db, "Coordinator", &[]);
    let job_id = as_str(&job, "id");

    let output = run_jb(db.args(&[
        "job", "reorder", "--id", job_id, "--from", "2", "--to", "1",
    ]));
    assert!(!output.status.success());
    let stderr = stderr_of(&output);
    assert!(
        stderr.contains("order conflict"),
        "unexpected stderr: {stderr}"
    );

    let shown = run_json(db.args(&["job", "show", "--id", job_id]));
    assert_eq!(as_i64(&shown, "order"), 1);
}

#[test]
fn cli_update_and_delete() {
    let db = TempDb::new("update");
    let first = create(&db, "Analyst", &["--tag", "finance"]);
    let second = create(&db, "Designer", &[]);
    let first_id = as_str(&first, "id");
    let second_id = as_str(&second, "id");

    let updated = run_json(db.args(&[
        "job",
        "update",
        "--id",
        first_id,
        "--status",
        "archived",
        "--clear-tags",
        "--order",
        "2",
    ]));
    assert_eq!(as_str(&updated, "status"), "archived");
    assert_eq!(as_i64(&updated, "order"), 2);
    let tags = updated.get("tags").and_then(Value::as_array);
    assert_eq!(tags.map(Vec::len), Some(0));

    let deleted = run_json(db.args(&["job", "delete", "--id", second_id]));
    assert_eq!(as_str(&deleted, "id"), second_id);

    let shown = run_json(db.args(&["job", "show", "--id", first_id]));
    assert_eq!(as_i64(&shown, "order"), 1);
}

#[test]
fn cli_rejects_invalid_positions_and_fault_rates() {
    let db = TempDb::new("invalid");
    create(&db, "Only Role", &[]);

    let output = run_jb(db.args(&["job", "create", "--title", "Gap", "--order", "5"]));
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("invalid argument"));

    let output = run_jb(db.args(&["--reorder-failure-rate", "1.5", "job", "list"]));
    assert!(!output.status.success());

    let output = run_jb(db.args(&["--mutation-failure-rate=-0.5", "job", "list"]));
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("mutation_failure_rate"));
}

#[test]
fn cli_certain_mutation_faults_leave_store_unchanged() {
    let db = TempDb::new("faults");
    create(&db, "Stable Role", &[]);

    let output = run_jb(db.args(&[
        "--mutation-failure-rate",
        "1.0",
        "--fault-seed",
        "7",
        "job",
        "create",
        "--title",
        "Doomed Role",
        "--order",
        "1",
    ]));
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("transaction failure"));

    let page = run_json(db.args(&["job", "list"]));
    assert_eq!(as_i64(&page, "total"), 1);
}
