#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
        CREATE INDEX IF NOT EXISTS idx_jobs_ready ON jobs(state, next_run_at_ms, created_at_ms, id);
        CREATE INDEX IF NOT EXISTS idx_jobs_worker ON jobs(worker_id) WHERE worker_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_workers_heartbeat ON workers(last_heartbeat_ms);
        "#;
