#![forbid(unsafe_code)]

#[derive(Clone, Debug)]
pub struct JobRow {
    pub id: String,
    pub command: String,
    pub state: String,
    pub attempts: i64,
    pub max_retries: i64,
    pub worker_id: Option<String>,
    pub next_run_at_ms: i64,
    pub claimed_at_ms: Option<i64>,
    pub error_message: Option<String>,
    pub metadata_json: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub completed_at_ms: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct JobInsertRequest {
    pub id: String,
    pub command: String,
    pub max_retries: i64,
    pub metadata_json: Option<String>,
}

#[derive(Clone, Debug)]
pub struct JobsListRequest {
    pub state: Option<String>,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct JobsListResult {
    pub jobs: Vec<JobRow>,
    pub has_more: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobsStatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub dlq: u64,
}

impl JobsStatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.dlq
    }
}
