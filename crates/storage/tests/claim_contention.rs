#![forbid(unsafe_code)]

use qc_storage::{JobInsertRequest, SqliteStore};
use std::collections::HashSet;
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

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Any two concurrent claimers must receive distinct jobs or nothing.
/// Each thread opens its own connection to the shared file, the same shape
/// a pool of worker processes has.
#[test]
fn concurrent_claimers_never_share_a_job() {
    const JOBS: usize = 24;
    const CLAIMERS: usize = 4;

    let db_path = temp_db("concurrent_claimers");
    let mut store = SqliteStore::open(&db_path).expect("open store");
    for n in 0..JOBS {
        store
            .insert_job(JobInsertRequest {
                id: format!("job-{n:03}"),
                command: "echo hi".to_string(),
                max_retries: 3,
                metadata_json: None,
            })
            .expect("insert job");
    }
    drop(store);

    let mut handles = Vec::new();
    for c in 0..CLAIMERS {
        let db_path = db_path.clone();
        handles.push(std::thread::spawn(move || {
            let worker_id = format!("worker-{c}");
            let mut store = SqliteStore::open(&db_path).expect("open store in thread");
            let mut claimed = Vec::<String>::new();
            loop {
                match store.claim_next(&worker_id, now_ms()).expect("claim") {
                    Some(job) => {
                        assert_eq!(job.worker_id.as_deref(), Some(worker_id.as_str()));
                        claimed.push(job.id);
                    }
                    None => break,
                }
            }
            claimed
        }));
    }

    let mut seen = HashSet::<String>::new();
    let mut total = 0usize;
    for handle in handles {
        let claimed = handle.join().expect("claimer thread");
        total += claimed.len();
        for id in claimed {
            assert!(seen.insert(id.clone()), "job {id} was claimed twice");
        }
    }
    assert_eq!(total, JOBS, "every job must be claimed exactly once");

    let store = SqliteStore::open(&db_path).expect("reopen");
    let counts = store.jobs_status_counts().expect("counts");
    assert_eq!(counts.processing, JOBS as u64);
    assert_eq!(counts.pending, 0);
}

/// Duplicate enqueues race through separate connections; exactly one wins.
#[test]
fn concurrent_duplicate_enqueues_resolve_to_one_row() {
    let db_path = temp_db("concurrent_duplicate_enqueues");
    SqliteStore::open(&db_path).expect("create schema");

    let mut handles = Vec::new();
    for n in 0..4 {
        let db_path = db_path.clone();
        handles.push(std::thread::spawn(move || {
            let mut store = SqliteStore::open(&db_path).expect("open store in thread");
            store
                .insert_job(JobInsertRequest {
                    id: "contested".to_string(),
                    command: format!("echo {n}"),
                    max_retries: 3,
                    metadata_json: None,
                })
                .is_ok()
        }));
    }

    let wins = handles
        .into_iter()
        .map(|h| h.join().expect("enqueue thread"))
        .filter(|ok| *ok)
        .count();
    assert_eq!(wins, 1, "exactly one duplicate enqueue may succeed");

    let store = SqliteStore::open(&db_path).expect("reopen");
    let job = store.job_get("contested").expect("get").expect("present");
    assert_eq!(job.attempts, 0);
    assert_eq!(job.state, "pending");
}
