#![forbid(unsafe_code)]

#[derive(Clone, Debug)]
pub struct WorkerRow {
    pub id: String,
    pub pid: i64,
    pub status: String,
    pub started_at_ms: i64,
    pub last_heartbeat_ms: i64,
}

#[derive(Clone, Debug)]
pub struct WorkerRegisterRequest {
    pub id: String,
    pub pid: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkersStatusCounts {
    pub active: u64,
    pub stopped: u64,
}

impl WorkersStatusCounts {
    pub fn total(&self) -> u64 {
        self.active + self.stopped
    }
}
