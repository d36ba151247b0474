use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Job already running, batch size is fixed")]
    AlreadyRunning,

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("No job has been requested")]
    NoJob,

    #[error("A job is running and has not resolved; cancel it first")]
    JobReplaceConflict,

    #[error("Another caller is already waiting for a result")]
    WaiterBusy,

    #[error("Job was cancelled before a result was found")]
    JobCancelled,

    #[error("Search space exhausted without a match")]
    NotFound,
}

impl RecoveryError {
    /// Per-call transport failures. Never fatal to the manager.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RecoveryError::Connectivity(_) | RecoveryError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(RecoveryError::Connectivity("reset".to_string()).is_transient());
        assert!(RecoveryError::Timeout("assign".to_string()).is_transient());
        assert!(!RecoveryError::NoJob.is_transient());
        assert!(!RecoveryError::NotFound.is_transient());
        assert!(!RecoveryError::InvalidInput("x".to_string()).is_transient());
    }

    #[test]
    fn display_includes_detail() {
        let err = RecoveryError::InvalidInput("length must be positive".to_string());
        assert_eq!(err.to_string(), "Invalid input: length must be positive");
    }
}
