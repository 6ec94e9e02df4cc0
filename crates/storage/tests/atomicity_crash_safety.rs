#![forbid(unsafe_code)]

use qc_storage::{JobInsertRequest, SqliteStore};
use rusqlite::{Connection, params};
use std::path::PathBuf;

fn temp_db(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("qc_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir.join("queuectl.db")
}

#[test]
fn uncommitted_transaction_is_not_persisted_after_reopen() {
    let db_path = temp_db("uncommitted_not_persisted");

    {
        let _store = SqliteStore::open(&db_path).expect("open store");
    }

    {
        let mut conn = Connection::open(&db_path).expect("open db");
        let tx = conn.transaction().expect("begin tx");
        tx.execute(
            r#"
            INSERT INTO jobs(id, command, state, attempts, max_retries, next_run_at_ms, created_at_ms, updated_at_ms)
            VALUES (?1, ?2, 'pending', 0, 3, 0, 0, 0)
            "#,
            params!["phantom", "echo hi"],
        )
        .expect("insert job");
        // Drop without commit -> rollback (simulated crash before commit).
    }

    let store = SqliteStore::open(&db_path).expect("open store again");
    assert!(
        store.job_get("phantom").expect("get").is_none(),
        "uncommitted transaction should not persist"
    );
}

#[test]
fn committed_state_survives_reopen() {
    let db_path = temp_db("committed_survives");

    {
        let mut store = SqliteStore::open(&db_path).expect("open store");
        store
            .insert_job(JobInsertRequest {
                id: "durable".to_string(),
                command: "echo hi".to_string(),
                max_retries: 3,
                metadata_json: Some(r#"{"env":"ci"}"#.to_string()),
            })
            .expect("insert");
        store
            .claim_next("worker-1", i64::MAX)
            .expect("claim")
            .expect("job");
    }

    let store = SqliteStore::open(&db_path).expect("reopen");
    let job = store.job_get("durable").expect("get").expect("present");
    assert_eq!(job.state, "processing");
    assert_eq!(job.attempts, 1);
    assert_eq!(job.metadata_json.as_deref(), Some(r#"{"env":"ci"}"#));
}

#[test]
fn schema_migration_is_idempotent() {
    let db_path = temp_db("migration_idempotent");
    for _ in 0..3 {
        SqliteStore::open(&db_path).expect("open store");
    }
}
