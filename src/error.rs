use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("index directory error: {0}")]
    TantivyOpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("queue rejected the task ({0:?})")]
    Rejected(crate::queue::QueueState),

    /// A failure reported through a task outcome.
    #[error("{message}")]
    Task {
        status: u16,
        kind: String,
        message: String,
    },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Machine-readable error kind, reported alongside the message in task
    /// outcomes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) | Error::DataDir(_) => "io",
            Error::Tantivy(_) | Error::TantivyOpenDirectory(_) => "index",
            Error::Json(_) => "json",
            Error::Redb(_)
            | Error::RedbStorage(_)
            | Error::RedbTransaction(_)
            | Error::RedbTable(_)
            | Error::RedbCommit(_)
            | Error::RedbDatabase(_) => "database",
            Error::Config(_) => "config",
            Error::NotFound { .. } => "not_found",
            Error::InvalidValue(_) => "invalid_value",
            Error::InvalidState(_) => "invalid_state",
            Error::ShuttingDown => "shutting_down",
            Error::Rejected(_) => "rejected",
            Error::Task { .. } => "task",
        }
    }

    /// HTTP-like status code for the boundary layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::InvalidValue(_) | Error::Json(_) => 400,
            Error::InvalidState(_) => 409,
            Error::ShuttingDown => 503,
            Error::Rejected(crate::queue::QueueState::Throttled) => 429,
            Error::Rejected(_) => 503,
            Error::Task { status, .. } => *status,
            _ => 500,
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_kind() {
        let missing = Error::not_found("collection", "ghost");
        assert_eq!(missing.status_code(), 404);
        assert_eq!(missing.kind(), "not_found");
        assert_eq!(missing.to_string(), "collection not found: ghost");

        assert_eq!(Error::InvalidValue("x".into()).status_code(), 400);
        assert_eq!(Error::ShuttingDown.status_code(), 503);
        assert_eq!(Error::Config("x".into()).status_code(), 500);
        assert_eq!(
            Error::Rejected(crate::queue::QueueState::Throttled).status_code(),
            429
        );
    }
}
