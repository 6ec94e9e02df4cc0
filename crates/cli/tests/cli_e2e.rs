#![forbid(unsafe_code)]
//! End-to-end exercises of the compiled binary: enqueue through worker
//! drain, DLQ flow, and the exit-code contract.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const BIN: &str = env!("CARGO_BIN_EXE_queuectl");

struct TestQueue {
    dir: PathBuf,
    config_path: PathBuf,
}

impl TestQueue {
    fn new(test_name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!(
            "queuectl_e2e_{test_name}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let db_path = dir.join("queuectl.db");
        let config_path = dir.join("queuectl.config.json");
        std::fs::write(
            &config_path,
            format!(
                "{{\"db_path\": {:?}, \"worker_poll_interval\": 1, \"worker_heartbeat_interval\": 1, \"job_timeout\": 5}}\n",
                db_path.to_string_lossy()
            ),
        )
        .expect("write config");
        Self { dir, config_path }
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(BIN)
            .args(args)
            .env("QUEUECTL_CONFIG", &self.config_path)
            .current_dir(&self.dir)
            .output()
            .expect("run queuectl")
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "command {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn exit_code(&self, args: &[&str]) -> i32 {
        self.run(args).status.code().unwrap_or(-1)
    }
}

fn job_field(queue: &TestQueue, id: &str, column: &str) -> String {
    // Reads straight from the DB file to assert on persisted state.
    let db = queue.dir.join("queuectl.db");
    sqlite_scalar(&db, &format!("SELECT {column} FROM jobs WHERE id='{id}'"))
}

fn sqlite_scalar(db: &Path, sql: &str) -> String {
    let conn = rusqlite::Connection::open(db).expect("open db");
    conn.query_row(sql, [], |row| {
        row.get::<_, rusqlite::types::Value>(0).map(|v| match v {
            rusqlite::types::Value::Null => "NULL".to_string(),
            rusqlite::types::Value::Integer(i) => i.to_string(),
            rusqlite::types::Value::Real(f) => f.to_string(),
            rusqlite::types::Value::Text(t) => t,
            rusqlite::types::Value::Blob(_) => "<blob>".to_string(),
        })
    })
    .expect("query db")
}

#[test]
fn enqueue_drain_and_complete() {
    let queue = TestQueue::new("enqueue_drain_complete");

    let out = queue.run_ok(&["enqueue", r#"{"id":"hw","command":"echo hi","note":"smoke"}"#]);
    assert!(out.contains("hw"), "stdout: {out}");

    // Duplicate id: exit code 4 per the error contract.
    assert_eq!(
        queue.exit_code(&["enqueue", r#"{"id":"hw","command":"echo again"}"#]),
        4
    );

    queue.run_ok(&["worker", "run", "--exit-when-idle", "--max-idle", "1"]);

    assert_eq!(job_field(&queue, "hw", "state"), "completed");
    assert_eq!(job_field(&queue, "hw", "attempts"), "1");
    assert_eq!(job_field(&queue, "hw", "worker_id"), "NULL");
    // Metadata rides along untouched.
    assert!(job_field(&queue, "hw", "metadata_json").contains("smoke"));

    let listed = queue.run_ok(&["list", "--state", "completed"]);
    assert!(listed.contains("hw"), "list output: {listed}");

    let status = queue.run_ok(&["status"]);
    assert!(status.contains("completed"), "status output: {status}");
}

#[test]
fn failing_job_lands_in_dlq_and_can_be_requeued() {
    let queue = TestQueue::new("dlq_flow");

    queue.run_ok(&[
        "enqueue",
        r#"{"id":"bad","command":"nonexistent_command_xyz","max_retries":1}"#,
    ]);
    queue.run_ok(&["worker", "run", "--exit-when-idle", "--max-idle", "1"]);

    assert_eq!(job_field(&queue, "bad", "state"), "dlq");
    assert_eq!(job_field(&queue, "bad", "attempts"), "1");
    let error = job_field(&queue, "bad", "error_message");
    assert!(
        error.contains("exit code"),
        "error message should carry the exit detail, got: {error}"
    );

    let dlq = queue.run_ok(&["dlq", "list"]);
    assert!(dlq.contains("bad"), "dlq output: {dlq}");

    // Retrying a job that is not in the DLQ is an invalid state transition.
    queue.run_ok(&["enqueue", r#"{"id":"fine","command":"true"}"#]);
    assert_eq!(queue.exit_code(&["dlq", "retry", "fine"]), 5);
    assert_eq!(queue.exit_code(&["dlq", "retry", "missing"]), 3);

    queue.run_ok(&["dlq", "retry", "bad"]);
    assert_eq!(job_field(&queue, "bad", "state"), "pending");
    assert_eq!(job_field(&queue, "bad", "attempts"), "0");
    assert_eq!(job_field(&queue, "bad", "error_message"), "NULL");
}

#[test]
fn validation_failures_use_exit_code_two() {
    let queue = TestQueue::new("validation_exit_codes");

    assert_eq!(queue.exit_code(&["enqueue", "not json"]), 2);
    assert_eq!(queue.exit_code(&["enqueue", r#"{"command":"echo"}"#]), 2);
    assert_eq!(queue.exit_code(&["list", "--state", "bogus"]), 2);
    assert_eq!(queue.exit_code(&["config", "set", "max_retries", "0"]), 2);
    assert_eq!(queue.exit_code(&["config", "set", "no_such_key", "1"]), 2);
    assert_eq!(queue.exit_code(&["frobnicate"]), 2);
}

#[test]
fn config_set_and_reset_round_trip() {
    let queue = TestQueue::new("config_round_trip");

    queue.run_ok(&["config", "set", "max_retries", "7"]);
    let got = queue.run_ok(&["config", "get", "max_retries"]);
    assert!(got.contains('7'), "config get output: {got}");

    queue.run_ok(&["config", "reset", "max_retries"]);
    let got = queue.run_ok(&["config", "get", "max_retries"]);
    assert!(got.contains('3'), "config get output: {got}");

    let all = queue.run_ok(&["config", "get"]);
    assert!(all.contains("backoff_base"), "config table: {all}");
}

#[test]
fn worker_respects_per_job_timeout() {
    let queue = TestQueue::new("job_timeout");

    // job_timeout is 5s in the test config; the command sleeps far longer.
    queue.run_ok(&[
        "enqueue",
        r#"{"id":"slow","command":"sleep 60","max_retries":1}"#,
    ]);
    queue.run_ok(&["worker", "run", "--exit-when-idle", "--max-idle", "1"]);

    assert_eq!(job_field(&queue, "slow", "state"), "dlq");
    let error = job_field(&queue, "slow", "error_message");
    assert!(
        error.contains("timeout after 5 seconds"),
        "expected timeout message, got: {error}"
    );
}
