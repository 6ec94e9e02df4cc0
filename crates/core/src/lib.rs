#![forbid(unsafe_code)]

pub mod ids {
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct JobId(String);

    impl JobId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn into_string(self) -> String {
            self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, JobIdError> {
            let value = value.into();
            let trimmed = value.trim();
            validate_job_id(trimmed)?;
            Ok(Self(trimmed.to_string()))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum JobIdError {
        Empty,
        TooLong,
        ContainsControl,
    }

    impl JobIdError {
        pub fn message(&self) -> &'static str {
            match self {
                Self::Empty => "job id must not be empty",
                Self::TooLong => "job id is too long",
                Self::ContainsControl => "job id contains control characters",
            }
        }
    }

    fn validate_job_id(value: &str) -> Result<(), JobIdError> {
        if value.is_empty() {
            return Err(JobIdError::Empty);
        }
        if value.len() > 256 {
            return Err(JobIdError::TooLong);
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(JobIdError::ContainsControl);
        }
        Ok(())
    }
}

pub mod model {
    /// Resting states plus the transient `failed`, which only exists inside
    /// the fail-and-schedule transition. It stays in the public vocabulary
    /// (list filters accept it) without ever being persisted at rest.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum JobState {
        Pending,
        Processing,
        Completed,
        Failed,
        Dlq,
    }

    impl JobState {
        pub const ALL: [JobState; 5] = [
            JobState::Pending,
            JobState::Processing,
            JobState::Completed,
            JobState::Failed,
            JobState::Dlq,
        ];

        pub fn as_str(self) -> &'static str {
            match self {
                JobState::Pending => "pending",
                JobState::Processing => "processing",
                JobState::Completed => "completed",
                JobState::Failed => "failed",
                JobState::Dlq => "dlq",
            }
        }

        pub fn parse(raw: &str) -> Option<JobState> {
            match raw.trim().to_ascii_lowercase().as_str() {
                "pending" => Some(JobState::Pending),
                "processing" => Some(JobState::Processing),
                "completed" => Some(JobState::Completed),
                "failed" => Some(JobState::Failed),
                "dlq" => Some(JobState::Dlq),
                _ => None,
            }
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum WorkerStatus {
        Active,
        Stopped,
    }

    impl WorkerStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                WorkerStatus::Active => "active",
                WorkerStatus::Stopped => "stopped",
            }
        }

        pub fn parse(raw: &str) -> Option<WorkerStatus> {
            match raw.trim().to_ascii_lowercase().as_str() {
                "active" => Some(WorkerStatus::Active),
                "stopped" => Some(WorkerStatus::Stopped),
                _ => None,
            }
        }
    }
}

pub mod backoff {
    /// Delay before a failed job becomes claimable again.
    ///
    /// `attempt` is the just-completed attempt number (attempts are counted
    /// at claim time, so the first failure arrives with `attempt = 1`).
    /// The delay grows as `base^attempt`, capped at `max_delay_secs`.
    pub fn delay_secs(base: f64, attempt: u32, max_delay_secs: u64) -> u64 {
        let base = if base < 1.0 { 1.0 } else { base };
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = base.powi(exponent);
        if !raw.is_finite() || raw >= max_delay_secs as f64 {
            return max_delay_secs;
        }
        (raw as u64).clamp(1, max_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::backoff::delay_secs;
    use super::ids::{JobId, JobIdError};
    use super::model::{JobState, WorkerStatus};

    #[test]
    fn job_id_accepts_plain_tokens_and_trims() {
        let id = JobId::try_new("  deploy-42 ").expect("job id");
        assert_eq!(id.as_str(), "deploy-42");
    }

    #[test]
    fn job_id_rejects_empty_and_control_chars() {
        assert_eq!(JobId::try_new("   "), Err(JobIdError::Empty));
        assert_eq!(JobId::try_new("a\nb"), Err(JobIdError::ContainsControl));
        assert_eq!(JobId::try_new("x".repeat(300)), Err(JobIdError::TooLong));
    }

    #[test]
    fn job_state_round_trips_through_strings() {
        for state in JobState::ALL {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert_eq!(JobState::parse("PENDING"), Some(JobState::Pending));
        assert_eq!(JobState::parse("nope"), None);
    }

    #[test]
    fn worker_status_round_trips() {
        assert_eq!(WorkerStatus::parse("active"), Some(WorkerStatus::Active));
        assert_eq!(WorkerStatus::parse("stopped"), Some(WorkerStatus::Stopped));
        assert_eq!(WorkerStatus::parse(""), None);
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(delay_secs(2.0, 1, 3600), 2);
        assert_eq!(delay_secs(2.0, 2, 3600), 4);
        assert_eq!(delay_secs(2.0, 3, 3600), 8);
        assert_eq!(delay_secs(2.0, 12, 3600), 3600);
        assert_eq!(delay_secs(2.0, 100, 3600), 3600);
    }

    #[test]
    fn backoff_clamps_degenerate_bases() {
        assert_eq!(delay_secs(0.5, 3, 3600), 1);
        assert_eq!(delay_secs(1.0, 9, 3600), 1);
    }
}
