#![forbid(unsafe_code)]

use qc_storage::StoreError;

#[derive(Debug)]
pub enum QueueError {
    Store(StoreError),
    Validation(String),
    Io(std::io::Error),
}

impl QueueError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Store(err) => err.code(),
            Self::Validation(_) => "VALIDATION",
            Self::Io(_) => "INTERNAL",
        }
    }

    /// Process exit code for user-facing commands: 0 success, 1 generic,
    /// 2 usage/validation, 3 not-found, 4 duplicate, 5 invalid state.
    pub fn exit_code(&self) -> i32 {
        match self.code() {
            "VALIDATION" => 2,
            "NOT_FOUND" => 3,
            "DUPLICATE_ID" => 4,
            "INVALID_STATE" => 5,
            _ => 1,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_transient())
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Validation(message) => write!(f, "{message}"),
            Self::Io(err) => write!(f, "io: {err}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<StoreError> for QueueError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<std::io::Error> for QueueError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
