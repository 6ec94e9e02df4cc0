#![forbid(unsafe_code)]

use super::*;
use qc_core::ids::JobId;
use qc_core::model::JobState;
use rusqlite::{OptionalExtension, Transaction, params};

const MAX_COMMAND_LEN: usize = 10_000;
const MAX_ERROR_LEN: usize = 2_000;
const MAX_LIST_LIMIT: usize = 500;

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, worker_id, next_run_at_ms, \
     claimed_at_ms, error_message, metadata_json, created_at_ms, updated_at_ms, completed_at_ms";

fn normalize_job_id(raw: &str) -> Result<String, StoreError> {
    match JobId::try_new(raw) {
        Ok(id) => Ok(id.into_string()),
        Err(err) => Err(StoreError::InvalidInput(err.message())),
    }
}

fn normalize_command(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("job command must not be empty"));
    }
    if raw.len() > MAX_COMMAND_LEN {
        return Err(StoreError::InvalidInput("job command is too long"));
    }
    Ok(raw.to_string())
}

fn normalize_worker_id(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("worker id must not be empty"));
    }
    Ok(raw.to_string())
}

fn normalize_state_filter(raw: Option<&str>) -> Result<Option<String>, StoreError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    let Some(state) = JobState::parse(raw) else {
        return Err(StoreError::InvalidInput(
            "state must be one of pending|processing|completed|failed|dlq",
        ));
    };
    Ok(Some(state.as_str().to_string()))
}

fn normalize_error(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_ERROR_LEN).collect())
}

fn read_job_row(row: &rusqlite::Row<'_>) -> Result<JobRow, rusqlite::Error> {
    Ok(JobRow {
        id: row.get(0)?,
        command: row.get(1)?,
        state: row.get(2)?,
        attempts: row.get(3)?,
        max_retries: row.get(4)?,
        worker_id: row.get(5)?,
        next_run_at_ms: row.get(6)?,
        claimed_at_ms: row.get(7)?,
        error_message: row.get(8)?,
        metadata_json: row.get(9)?,
        created_at_ms: row.get(10)?,
        updated_at_ms: row.get(11)?,
        completed_at_ms: row.get(12)?,
    })
}

fn job_get_tx(tx: &Transaction<'_>, id: &str) -> Result<Option<JobRow>, StoreError> {
    Ok(tx
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?1"),
            params![id],
            read_job_row,
        )
        .optional()?)
}

/// Loads the current claim fields and rejects outcome reports whose caller
/// does not hold the claim. Split-brain defence: after orphan recovery a
/// lost worker may come back and report a job it no longer owns.
fn require_claim_tx(
    tx: &Transaction<'_>,
    id: &str,
    worker_id: &str,
) -> Result<(), StoreError> {
    let current: Option<(String, Option<String>)> = tx
        .query_row(
            "SELECT state, worker_id FROM jobs WHERE id=?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((state, holder)) = current else {
        return Err(StoreError::NotFound {
            entity: "job",
            id: id.to_string(),
        });
    };
    if state != JobState::Processing.as_str() {
        return Err(StoreError::NotProcessing {
            job_id: id.to_string(),
            state,
        });
    }
    if holder.as_deref() != Some(worker_id) {
        return Err(StoreError::ClaimMismatch {
            job_id: id.to_string(),
            expected_worker_id: holder,
            actual_worker_id: worker_id.to_string(),
        });
    }
    Ok(())
}

impl SqliteStore {
    pub fn insert_job(&mut self, request: JobInsertRequest) -> Result<JobRow, StoreError> {
        let id = normalize_job_id(&request.id)?;
        let command = normalize_command(&request.command)?;
        if request.max_retries < 1 {
            return Err(StoreError::InvalidInput("max_retries must be >= 1"));
        }
        let now_ms = now_ms();

        let tx = self.write_tx()?;
        let exists: Option<i64> = tx
            .query_row("SELECT 1 FROM jobs WHERE id=?1", params![id.as_str()], |row| {
                row.get(0)
            })
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists { entity: "job", id });
        }

        tx.execute(
            r#"
            INSERT INTO jobs(
              id, command, state, attempts, max_retries, worker_id, next_run_at_ms,
              claimed_at_ms, error_message, metadata_json, created_at_ms, updated_at_ms, completed_at_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                id.as_str(),
                command.as_str(),
                JobState::Pending.as_str(),
                0i64,
                request.max_retries,
                Option::<String>::None,
                now_ms,
                Option::<i64>::None,
                Option::<String>::None,
                request.metadata_json,
                now_ms,
                now_ms,
                Option::<i64>::None,
            ],
        )?;
        tx.commit()?;

        Ok(JobRow {
            id,
            command,
            state: JobState::Pending.as_str().to_string(),
            attempts: 0,
            max_retries: request.max_retries,
            worker_id: None,
            next_run_at_ms: now_ms,
            claimed_at_ms: None,
            error_message: None,
            metadata_json: request.metadata_json,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            completed_at_ms: None,
        })
    }

    pub fn job_get(&self, id: &str) -> Result<Option<JobRow>, StoreError> {
        let id = normalize_job_id(id)?;
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?1"),
                params![id.as_str()],
                read_job_row,
            )
            .optional()?)
    }

    pub fn jobs_list(&self, request: JobsListRequest) -> Result<JobsListResult, StoreError> {
        let limit = request.limit.clamp(1, MAX_LIST_LIMIT);
        let state = normalize_state_filter(request.state.as_deref())?;

        let mut jobs = Vec::<JobRow>::new();
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM jobs
            WHERE (?1 IS NULL OR state=?1)
            ORDER BY created_at_ms DESC, id ASC
            LIMIT ?2
            "#
        ))?;
        let rows = stmt.query_map(params![state.as_deref(), (limit + 1) as i64], read_job_row)?;
        for row in rows {
            jobs.push(row?);
        }

        let has_more = jobs.len() > limit;
        jobs.truncate(limit);
        Ok(JobsListResult { jobs, has_more })
    }

    pub fn jobs_status_counts(&self) -> Result<JobsStatusCounts, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
              COALESCE(SUM(CASE WHEN state='pending' THEN 1 ELSE 0 END), 0),
              COALESCE(SUM(CASE WHEN state='processing' THEN 1 ELSE 0 END), 0),
              COALESCE(SUM(CASE WHEN state='completed' THEN 1 ELSE 0 END), 0),
              COALESCE(SUM(CASE WHEN state='dlq' THEN 1 ELSE 0 END), 0)
            FROM jobs
            "#,
        )?;
        let (pending, processing, completed, dlq) = stmt.query_row([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        Ok(JobsStatusCounts {
            pending: pending.max(0) as u64,
            processing: processing.max(0) as u64,
            completed: completed.max(0) as u64,
            dlq: dlq.max(0) as u64,
        })
    }

    /// Atomically hands the oldest eligible pending job to `worker_id`.
    ///
    /// Selection and mutation share one IMMEDIATE transaction, so any two
    /// concurrent callers receive distinct jobs or nothing. The attempt
    /// counter is charged here, at claim time.
    pub fn claim_next(
        &mut self,
        worker_id: &str,
        now_ms: i64,
    ) -> Result<Option<JobRow>, StoreError> {
        let worker_id = normalize_worker_id(worker_id)?;

        let tx = self.write_tx()?;
        let candidate: Option<String> = tx
            .query_row(
                r#"
                SELECT id
                FROM jobs
                WHERE state='pending' AND next_run_at_ms <= ?1
                ORDER BY next_run_at_ms ASC, created_at_ms ASC, id ASC
                LIMIT 1
                "#,
                params![now_ms],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = candidate else {
            return Ok(None);
        };

        let changed = tx.execute(
            r#"
            UPDATE jobs
            SET state='processing', worker_id=?2, claimed_at_ms=?3, attempts=attempts+1, updated_at_ms=?3
            WHERE id=?1 AND state='pending'
            "#,
            params![id.as_str(), worker_id.as_str(), now_ms],
        )?;
        if changed != 1 {
            // Unreachable under the IMMEDIATE write lock; bail out empty
            // rather than hand over a row we did not mutate.
            return Ok(None);
        }

        let job = job_get_tx(&tx, &id)?.ok_or(StoreError::NotFound {
            entity: "job",
            id: id.clone(),
        })?;
        tx.commit()?;
        Ok(Some(job))
    }

    pub fn mark_completed(&mut self, id: &str, worker_id: &str) -> Result<JobRow, StoreError> {
        let id = normalize_job_id(id)?;
        let worker_id = normalize_worker_id(worker_id)?;
        let now_ms = now_ms();

        let tx = self.write_tx()?;
        require_claim_tx(&tx, &id, &worker_id)?;
        tx.execute(
            r#"
            UPDATE jobs
            SET state='completed', worker_id=NULL, claimed_at_ms=NULL, error_message=NULL,
                updated_at_ms=?2, completed_at_ms=?2
            WHERE id=?1 AND state='processing' AND worker_id=?3
            "#,
            params![id.as_str(), now_ms, worker_id.as_str()],
        )?;
        let job = job_get_tx(&tx, &id)?.ok_or(StoreError::NotFound {
            entity: "job",
            id: id.clone(),
        })?;
        tx.commit()?;
        Ok(job)
    }

    pub fn fail_and_reschedule(
        &mut self,
        id: &str,
        worker_id: &str,
        error: &str,
        next_run_at_ms: i64,
    ) -> Result<JobRow, StoreError> {
        let id = normalize_job_id(id)?;
        let worker_id = normalize_worker_id(worker_id)?;
        let error = normalize_error(error);
        let now_ms = now_ms();

        let tx = self.write_tx()?;
        require_claim_tx(&tx, &id, &worker_id)?;
        tx.execute(
            r#"
            UPDATE jobs
            SET state='pending', worker_id=NULL, claimed_at_ms=NULL, error_message=?2,
                next_run_at_ms=?3, updated_at_ms=?4
            WHERE id=?1 AND state='processing' AND worker_id=?5
            "#,
            params![
                id.as_str(),
                error.as_deref(),
                next_run_at_ms,
                now_ms,
                worker_id.as_str()
            ],
        )?;
        let job = job_get_tx(&tx, &id)?.ok_or(StoreError::NotFound {
            entity: "job",
            id: id.clone(),
        })?;
        tx.commit()?;
        Ok(job)
    }

    pub fn fail_and_dlq(
        &mut self,
        id: &str,
        worker_id: &str,
        error: &str,
    ) -> Result<JobRow, StoreError> {
        let id = normalize_job_id(id)?;
        let worker_id = normalize_worker_id(worker_id)?;
        let error = normalize_error(error);
        let now_ms = now_ms();

        let tx = self.write_tx()?;
        require_claim_tx(&tx, &id, &worker_id)?;
        tx.execute(
            r#"
            UPDATE jobs
            SET state='dlq', worker_id=NULL, claimed_at_ms=NULL, error_message=?2, updated_at_ms=?3
            WHERE id=?1 AND state='processing' AND worker_id=?4
            "#,
            params![id.as_str(), error.as_deref(), now_ms, worker_id.as_str()],
        )?;
        let job = job_get_tx(&tx, &id)?.ok_or(StoreError::NotFound {
            entity: "job",
            id: id.clone(),
        })?;
        tx.commit()?;
        Ok(job)
    }

    /// Operator action: return a dead-lettered job to the queue with a fresh
    /// retry budget.
    pub fn requeue_from_dlq(&mut self, id: &str, now_ms: i64) -> Result<JobRow, StoreError> {
        let id = normalize_job_id(id)?;

        let tx = self.write_tx()?;
        let state: Option<String> = tx
            .query_row(
                "SELECT state FROM jobs WHERE id=?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(state) = state else {
            return Err(StoreError::NotFound {
                entity: "job",
                id,
            });
        };
        if state != JobState::Dlq.as_str() {
            return Err(StoreError::NotInDlq { job_id: id, state });
        }

        tx.execute(
            r#"
            UPDATE jobs
            SET state='pending', attempts=0, worker_id=NULL, claimed_at_ms=NULL,
                error_message=NULL, next_run_at_ms=?2, updated_at_ms=?2, completed_at_ms=NULL
            WHERE id=?1 AND state='dlq'
            "#,
            params![id.as_str(), now_ms],
        )?;
        let job = job_get_tx(&tx, &id)?.ok_or(StoreError::NotFound {
            entity: "job",
            id: id.clone(),
        })?;
        tx.commit()?;
        Ok(job)
    }

    /// Reverts every `processing` job whose claiming worker is dead: no
    /// `active` row with a heartbeat at or after `stale_before_ms`. Claim
    /// fields that are inconsistent (NULL holder on a processing job) are
    /// recovered unconditionally. The interrupted attempt is refunded so an
    /// infrastructure failure does not consume the retry budget. Returns the
    /// number of recovered jobs.
    pub fn recover_orphans(
        &mut self,
        stale_before_ms: i64,
        now_ms: i64,
    ) -> Result<u64, StoreError> {
        let tx = self.write_tx()?;
        let changed = tx.execute(
            r#"
            UPDATE jobs
            SET state='pending',
                attempts=CASE WHEN attempts > 0 THEN attempts - 1 ELSE 0 END,
                worker_id=NULL, claimed_at_ms=NULL, updated_at_ms=?2
            WHERE state='processing'
              AND (
                worker_id IS NULL
                OR claimed_at_ms IS NULL
                OR worker_id NOT IN (
                    SELECT id FROM workers WHERE status='active' AND last_heartbeat_ms >= ?1
                )
              )
            "#,
            params![stale_before_ms, now_ms],
        )?;
        tx.commit()?;
        Ok(changed as u64)
    }
}
