#![forbid(unsafe_code)]
//! Stateless orchestration over the store: job intake, claim/outcome
//! handling with the retry policy, DLQ management, crash recovery.

use crate::config::Config;
use crate::error::QueueError;
use qc_core::backoff;
use qc_core::ids::JobId;
use qc_storage::{
    JobInsertRequest, JobRow, JobsListRequest, JobsListResult, JobsStatusCounts, SqliteStore,
    WorkerRow, WorkersStatusCounts,
};
use serde_json::{Map, Value};

#[derive(Clone, Debug)]
pub struct JobSpec {
    pub id: String,
    pub command: String,
    pub max_retries: Option<i64>,
    pub metadata_json: Option<String>,
}

/// Parses the enqueue payload: `{"id", "command", "max_retries"?, ...}`.
/// Every field beyond the known three is carried verbatim as metadata.
pub fn parse_job_spec(raw: &str) -> Result<JobSpec, QueueError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| QueueError::validation(format!("invalid JSON: {err}")))?;
    let Value::Object(map) = value else {
        return Err(QueueError::validation("job payload must be a JSON object"));
    };

    let id = map
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| QueueError::validation("job payload requires a string \"id\""))?;
    let id = JobId::try_new(id)
        .map_err(|err| QueueError::validation(err.message()))?
        .into_string();

    let command = map
        .get("command")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            QueueError::validation("job payload requires a non-empty string \"command\"")
        })?
        .to_string();

    let max_retries = match map.get("max_retries") {
        None => None,
        Some(value) => {
            let Some(v) = value.as_i64() else {
                return Err(QueueError::validation("max_retries must be an integer >= 1"));
            };
            if v < 1 {
                return Err(QueueError::validation("max_retries must be an integer >= 1"));
            }
            Some(v)
        }
    };

    let metadata: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "id" | "command" | "max_retries"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let metadata_json = if metadata.is_empty() {
        None
    } else {
        Some(Value::Object(metadata).to_string())
    };

    Ok(JobSpec {
        id,
        command,
        max_retries,
        metadata_json,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry { delay_secs: u64 },
    DeadLetter,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RecoveryReport {
    pub orphans: u64,
    pub pruned_workers: u64,
}

#[derive(Clone, Debug)]
pub struct QueueStatus {
    pub jobs: JobsStatusCounts,
    pub workers: WorkersStatusCounts,
}

pub struct QueueManager {
    store: SqliteStore,
    config: Config,
}

impl QueueManager {
    pub fn open(config: &Config) -> Result<Self, QueueError> {
        let store = SqliteStore::open(&config.db_path)?;
        Ok(Self {
            store,
            config: config.clone(),
        })
    }

    pub fn store_mut(&mut self) -> &mut SqliteStore {
        &mut self.store
    }

    pub fn enqueue(&mut self, spec: JobSpec) -> Result<JobRow, QueueError> {
        let max_retries = spec
            .max_retries
            .unwrap_or(i64::from(self.config.max_retries));
        Ok(self.store.insert_job(JobInsertRequest {
            id: spec.id,
            command: spec.command,
            max_retries,
            metadata_json: spec.metadata_json,
        })?)
    }

    pub fn claim(&mut self, worker_id: &str) -> Result<Option<JobRow>, QueueError> {
        Ok(self.store.claim_next(worker_id, crate::now_ms())?)
    }

    pub fn report_success(&mut self, job: &JobRow, worker_id: &str) -> Result<JobRow, QueueError> {
        Ok(self.store.mark_completed(&job.id, worker_id)?)
    }

    /// The attempt was charged at claim time, so `job.attempts` is the
    /// number of the attempt that just failed. Budget exhausted means DLQ;
    /// otherwise the job sinks back into the queue under backoff.
    pub fn report_failure(
        &mut self,
        job: &JobRow,
        worker_id: &str,
        error: &str,
    ) -> Result<FailureDisposition, QueueError> {
        if job.attempts >= job.max_retries {
            self.store.fail_and_dlq(&job.id, worker_id, error)?;
            return Ok(FailureDisposition::DeadLetter);
        }

        let attempt = job.attempts.clamp(0, i64::from(u32::MAX)) as u32;
        let delay_secs = backoff::delay_secs(
            self.config.backoff_base,
            attempt,
            self.config.backoff_max_delay,
        );
        let next_run_at_ms = crate::now_ms().saturating_add((delay_secs as i64).saturating_mul(1000));
        self.store
            .fail_and_reschedule(&job.id, worker_id, error, next_run_at_ms)?;
        Ok(FailureDisposition::Retry { delay_secs })
    }

    pub fn retry_dlq(&mut self, id: &str) -> Result<JobRow, QueueError> {
        Ok(self.store.requeue_from_dlq(id, crate::now_ms())?)
    }

    /// Reverts claims held by dead workers and prunes their registry rows.
    /// Invoked at worker startup and repeated while a worker sits idle;
    /// safe to call any number of times.
    pub fn recover_from_crash(&mut self) -> Result<RecoveryReport, QueueError> {
        let now = crate::now_ms();
        let window_ms = (self.config.worker_heartbeat_interval.max(1) as i64).saturating_mul(2_000);
        let stale_before = now - window_ms;
        let orphans = self.store.recover_orphans(stale_before, now)?;
        let pruned_workers = self.store.prune_stale_workers(stale_before)?;
        Ok(RecoveryReport {
            orphans,
            pruned_workers,
        })
    }

    pub fn list(
        &self,
        state: Option<String>,
        limit: usize,
    ) -> Result<JobsListResult, QueueError> {
        Ok(self.store.jobs_list(JobsListRequest { state, limit })?)
    }

    pub fn dlq_list(&self, limit: usize) -> Result<JobsListResult, QueueError> {
        Ok(self.store.jobs_list(JobsListRequest {
            state: Some("dlq".to_string()),
            limit,
        })?)
    }

    pub fn status(&self) -> Result<QueueStatus, QueueError> {
        Ok(QueueStatus {
            jobs: self.store.jobs_status_counts()?,
            workers: self.store.workers_status_counts()?,
        })
    }

    pub fn workers(&self) -> Result<Vec<WorkerRow>, QueueError> {
        Ok(self.store.workers_list()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(test_name: &str) -> Config {
        let dir = std::env::temp_dir().join(format!(
            "queuectl_queue_{test_name}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        Config {
            db_path: dir.join("queuectl.db").to_string_lossy().to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn job_spec_extracts_metadata_verbatim() {
        let spec = parse_job_spec(
            r#"{"id":"rpt","command":"echo hi","max_retries":2,"team":"infra","retries_left":5}"#,
        )
        .expect("parse");
        assert_eq!(spec.id, "rpt");
        assert_eq!(spec.command, "echo hi");
        assert_eq!(spec.max_retries, Some(2));
        let metadata: Value =
            serde_json::from_str(spec.metadata_json.as_deref().expect("metadata")).expect("json");
        assert_eq!(metadata["team"], "infra");
        assert_eq!(metadata["retries_left"], 5);
    }

    #[test]
    fn job_spec_rejects_malformed_payloads() {
        for raw in [
            "not json",
            "[1,2]",
            r#"{"command":"echo hi"}"#,
            r#"{"id":"","command":"echo hi"}"#,
            r#"{"id":"x","command":""}"#,
            r#"{"id":"x","command":"echo hi","max_retries":0}"#,
            r#"{"id":"x","command":"echo hi","max_retries":"three"}"#,
        ] {
            let err = parse_job_spec(raw).expect_err(raw);
            assert_eq!(err.code(), "VALIDATION", "payload: {raw}");
        }
    }

    #[test]
    fn enqueue_defaults_the_retry_budget_from_config() {
        let mut config = temp_config("enqueue_defaults");
        config.max_retries = 5;
        let mut qm = QueueManager::open(&config).expect("open");

        let job = qm
            .enqueue(parse_job_spec(r#"{"id":"a","command":"echo hi"}"#).expect("spec"))
            .expect("enqueue");
        assert_eq!(job.max_retries, 5);

        let job = qm
            .enqueue(
                parse_job_spec(r#"{"id":"b","command":"echo hi","max_retries":1}"#).expect("spec"),
            )
            .expect("enqueue");
        assert_eq!(job.max_retries, 1);
    }

    #[test]
    fn failure_reports_follow_backoff_then_dlq() {
        let config = temp_config("failure_backoff_dlq");
        let mut qm = QueueManager::open(&config).expect("open");
        qm.enqueue(
            parse_job_spec(r#"{"id":"f","command":"exit 1","max_retries":2}"#).expect("spec"),
        )
        .expect("enqueue");

        let before = crate::now_ms();
        let job = qm.claim("worker-1").expect("claim").expect("job");
        let disposition = qm
            .report_failure(&job, "worker-1", "exit code 1: boom")
            .expect("report");
        assert_eq!(disposition, FailureDisposition::Retry { delay_secs: 2 });

        let job = qm
            .store_mut()
            .job_get("f")
            .expect("get")
            .expect("present");
        assert_eq!(job.state, "pending");
        assert!(job.next_run_at_ms >= before + 2_000);

        // Second (and final) attempt exhausts the budget.
        let job = qm
            .store_mut()
            .claim_next("worker-1", job.next_run_at_ms)
            .expect("claim")
            .expect("job");
        let disposition = qm
            .report_failure(&job, "worker-1", "exit code 1: boom again")
            .expect("report");
        assert_eq!(disposition, FailureDisposition::DeadLetter);

        let job = qm
            .store_mut()
            .job_get("f")
            .expect("get")
            .expect("present");
        assert_eq!(job.state, "dlq");
        assert_eq!(job.attempts, 2);

        let job = qm.retry_dlq("f").expect("dlq retry");
        assert_eq!(job.state, "pending");
        assert_eq!(job.attempts, 0);
    }
}
