#![forbid(unsafe_code)]

use super::*;
use qc_core::model::WorkerStatus;
use rusqlite::{OptionalExtension, params};

const MAX_WORKER_ID_LEN: usize = 256;

fn normalize_worker_id(raw: &str) -> Result<String, StoreError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(StoreError::InvalidInput("worker id must not be empty"));
    }
    if raw.len() > MAX_WORKER_ID_LEN {
        return Err(StoreError::InvalidInput("worker id is too long"));
    }
    Ok(raw.to_string())
}

fn read_worker_row(row: &rusqlite::Row<'_>) -> Result<WorkerRow, rusqlite::Error> {
    Ok(WorkerRow {
        id: row.get(0)?,
        pid: row.get(1)?,
        status: row.get(2)?,
        started_at_ms: row.get(3)?,
        last_heartbeat_ms: row.get(4)?,
    })
}

impl SqliteStore {
    /// Registers (or re-registers after a restart) a worker process. A fresh
    /// row wins over any stale one under the same id.
    pub fn register_worker(
        &mut self,
        request: WorkerRegisterRequest,
    ) -> Result<WorkerRow, StoreError> {
        let id = normalize_worker_id(&request.id)?;
        if request.pid <= 0 {
            return Err(StoreError::InvalidInput("worker pid must be positive"));
        }
        let now_ms = now_ms();

        let tx = self.write_tx()?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO workers(id, pid, status, started_at_ms, last_heartbeat_ms)
            VALUES (?1, ?2, ?3, ?4, ?4)
            "#,
            params![
                id.as_str(),
                request.pid,
                WorkerStatus::Active.as_str(),
                now_ms
            ],
        )?;
        tx.commit()?;

        Ok(WorkerRow {
            id,
            pid: request.pid,
            status: WorkerStatus::Active.as_str().to_string(),
            started_at_ms: now_ms,
            last_heartbeat_ms: now_ms,
        })
    }

    pub fn heartbeat_worker(&mut self, id: &str) -> Result<(), StoreError> {
        let id = normalize_worker_id(id)?;
        let now_ms = now_ms();

        let tx = self.write_tx()?;
        let changed = tx.execute(
            "UPDATE workers SET last_heartbeat_ms=?2 WHERE id=?1",
            params![id.as_str(), now_ms],
        )?;
        if changed != 1 {
            return Err(StoreError::NotFound {
                entity: "worker",
                id,
            });
        }
        tx.commit()?;
        Ok(())
    }

    /// Graceful exit: releases any job the worker still holds (with the
    /// attempt refunded, same rule as orphan recovery) and marks the row
    /// stopped. Missing rows are tolerated so shutdown stays idempotent.
    pub fn deregister_worker(&mut self, id: &str) -> Result<(), StoreError> {
        let id = normalize_worker_id(id)?;
        let now_ms = now_ms();

        let tx = self.write_tx()?;
        tx.execute(
            r#"
            UPDATE jobs
            SET state='pending',
                attempts=CASE WHEN attempts > 0 THEN attempts - 1 ELSE 0 END,
                worker_id=NULL, claimed_at_ms=NULL, updated_at_ms=?2
            WHERE worker_id=?1 AND state='processing'
            "#,
            params![id.as_str(), now_ms],
        )?;
        tx.execute(
            "UPDATE workers SET status=?2, last_heartbeat_ms=?3 WHERE id=?1",
            params![id.as_str(), WorkerStatus::Stopped.as_str(), now_ms],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn workers_list(&self) -> Result<Vec<WorkerRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, pid, status, started_at_ms, last_heartbeat_ms
            FROM workers
            ORDER BY started_at_ms ASC, id ASC
            "#,
        )?;
        let rows = stmt.query_map([], read_worker_row)?;
        let mut workers = Vec::<WorkerRow>::new();
        for row in rows {
            workers.push(row?);
        }
        Ok(workers)
    }

    pub fn workers_status_counts(&self) -> Result<WorkersStatusCounts, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
              COALESCE(SUM(CASE WHEN status='active' THEN 1 ELSE 0 END), 0),
              COALESCE(SUM(CASE WHEN status='stopped' THEN 1 ELSE 0 END), 0)
            FROM workers
            "#,
        )?;
        let (active, stopped) = stmt.query_row([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(WorkersStatusCounts {
            active: active.max(0) as u64,
            stopped: stopped.max(0) as u64,
        })
    }

    /// Drops registry rows whose heartbeat predates `before_ms`. Live jobs
    /// are untouched; orphan recovery handles those separately.
    pub fn prune_stale_workers(&mut self, before_ms: i64) -> Result<u64, StoreError> {
        let tx = self.write_tx()?;
        let changed = tx.execute(
            "DELETE FROM workers WHERE last_heartbeat_ms < ?1",
            params![before_ms],
        )?;
        tx.commit()?;
        Ok(changed as u64)
    }

    pub fn worker_get(&self, id: &str) -> Result<Option<WorkerRow>, StoreError> {
        let id = normalize_worker_id(id)?;
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, pid, status, started_at_ms, last_heartbeat_ms
                FROM workers
                WHERE id=?1
                "#,
                params![id.as_str()],
                read_worker_row,
            )
            .optional()?)
    }
}
