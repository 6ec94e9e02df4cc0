#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    NotFound {
        entity: &'static str,
        id: String,
    },
    AlreadyExists {
        entity: &'static str,
        id: String,
    },
    NotInDlq {
        job_id: String,
        state: String,
    },
    NotProcessing {
        job_id: String,
        state: String,
    },
    ClaimMismatch {
        job_id: String,
        expected_worker_id: Option<String>,
        actual_worker_id: String,
    },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sql(err) if is_busy(err) => "STORE_UNAVAILABLE",
            Self::Io(_) | Self::Sql(_) => "INTERNAL",
            Self::InvalidInput(_) => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyExists { .. } => "DUPLICATE_ID",
            Self::NotInDlq { .. } | Self::NotProcessing { .. } | Self::ClaimMismatch { .. } => {
                "INVALID_STATE"
            }
        }
    }

    /// Contention errors a polling worker should absorb and retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sql(err) if is_busy(err))
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(info, _)
            if matches!(
                info.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::AlreadyExists { entity, id } => write!(f, "{entity} already exists: {id}"),
            Self::NotInDlq { job_id, state } => {
                write!(f, "job {job_id} is in state \"{state}\", not dlq")
            }
            Self::NotProcessing { job_id, state } => {
                write!(f, "job {job_id} is in state \"{state}\", not processing")
            }
            Self::ClaimMismatch {
                job_id,
                expected_worker_id,
                actual_worker_id,
            } => match expected_worker_id {
                Some(expected) => write!(
                    f,
                    "job {job_id} is claimed by {expected}, not {actual_worker_id}"
                ),
                None => write!(f, "job {job_id} holds no claim for {actual_worker_id}"),
            },
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}
