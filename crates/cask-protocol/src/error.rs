use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("target executable does not exist: {}", .0.display())]
    TargetMissing(PathBuf),
    #[error("shortcut slot {0} is already running")]
    AlreadyRunning(usize),
    #[error("external process exited with code {code}")]
    ProcessFailure { code: i32 },
    #[error("runner binary could not be located: {0}")]
    RunnerBinaryMissing(String),
    #[error("no runner versions installed under {}", .0.display())]
    NoRunnersAvailable(PathBuf),
    #[error("launch session not found: {0}")]
    SessionNotFound(String),
    #[error("prefix store error: {0}")]
    Store(String),
    #[error("runner process error: {0}")]
    Process(String),
    #[error("launch internal error: {0}")]
    Internal(String),
}

impl LaunchError {
    /// Fatal errors make every future session impossible; the application
    /// aborts at startup instead of limping on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RunnerBinaryMissing(_) | Self::NoRunnersAvailable(_)
        )
    }
}

pub type LaunchResult<T> = Result<T, LaunchError>;
