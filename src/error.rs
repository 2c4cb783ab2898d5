use thiserror::Error;

/// Errors that occur while running a liberation export.
///
/// Transient infrastructure failures (directory creation, archive open) are
/// retried by the pipeline before surfacing as `RetriesExhausted`. Per-message
/// data anomalies never appear here at all: they are recovered locally by the
/// extract stage and recorded in the job's failure list instead.
#[derive(Debug, Error)]
pub enum LiberationError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(String),
    #[error("an export is already running for account {0}")]
    AlreadyRunning(i64),
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        source: std::io::Error,
    },
    #[error("task panicked or was aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, LiberationError>;
