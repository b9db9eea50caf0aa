use crate::types::JobStatus;

/// Errors surfaced by the persistence layer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal job transition {from:?} -> {to:?} for job {job_id}")]
    IllegalTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {0} has no pending question")]
    NoPendingQuestion(String),

    #[error("summary boundary {requested} exceeds newest visible message {newest}")]
    SummaryBoundary { requested: i64, newest: i64 },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
