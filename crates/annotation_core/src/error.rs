use rusqlite::ErrorCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("unknown annotation: {0}")]
    UnknownAnnotation(String),

    #[error("invalid span {start}..{end} for text of length {len}")]
    InvalidSpan { start: usize, end: usize, len: usize },

    #[error("label must not be empty")]
    InvalidLabel,

    #[error("confidence {0} outside [0.0, 1.0]")]
    InvalidConfidence(f64),

    #[error("invalid document: {0}")]
    InvalidDocument(&'static str),

    #[error("document {0} is archived")]
    ArchivedDocument(String),

    /// Another writer holds the lock. Safe to retry.
    #[error("store conflict: {0}")]
    StoreConflict(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("timestamp error: {0}")]
    Timestamp(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::StoreConflict(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                EngineError::StoreConflict(err.to_string())
            }
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied,
            ) => EngineError::StoreUnavailable(err.to_string()),
            _ => EngineError::Sqlite(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_locked_are_conflicts() {
        let busy: EngineError = sqlite_failure(rusqlite::ffi::SQLITE_BUSY).into();
        let locked: EngineError = sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).into();
        assert!(busy.is_conflict());
        assert!(locked.is_conflict());
    }

    #[test]
    fn open_failure_is_unavailable() {
        let err: EngineError = sqlite_failure(rusqlite::ffi::SQLITE_CANTOPEN).into();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
    }

    #[test]
    fn other_failures_stay_sqlite() {
        let err: EngineError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, EngineError::Sqlite(_)));
    }
}
