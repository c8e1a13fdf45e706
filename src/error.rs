//! Error types shared by the ingestion pipeline, the staged migrator and the leaderboard.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::DayKey;

/// A raw input line that could not be turned into trades.
///
/// Counted and skipped by the day processor, never fatal for a run.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid timestamp `{0}`")]
    InvalidTime(String),

    #[error("invalid side `{0}`")]
    InvalidSide(String),

    #[error("expected 2 side_info entries, found {0}")]
    UnexpectedSideCount(usize),
}

/// Why a reconstructed trade is not a clean buyer/seller pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompleteReason {
    /// Only one side of the trade was present.
    MissingCounterparty,
    /// More than two participants share the trade id.
    TooManyParticipants,
    /// Two participants, both on the same side.
    DuplicateSide,
}

impl std::fmt::Display for IncompleteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncompleteReason::MissingCounterparty => write!(f, "missing counterparty"),
            IncompleteReason::TooManyParticipants => write!(f, "too many participants"),
            IncompleteReason::DuplicateSide => write!(f, "both participants on one side"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("incomplete trade {tid:?} ({participants} participants): {reason}")]
pub struct IncompleteTradeError {
    pub tid: Option<i64>,
    pub participants: usize,
    pub reason: IncompleteReason,
}

/// Failures writing or reading day CSV artifacts.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error("malformed CSV row {line} in {path}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl EmitError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EmitError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        EmitError::Csv {
            path: path.into(),
            source,
        }
    }
}

/// A trade field the destination columns cannot hold as written.
///
/// Checked before an id is allocated; the trade is counted and skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("{column} is {len} characters, the column holds {max}")]
    TooLong {
        column: &'static str,
        len: usize,
        max: usize,
    },

    #[error("{column} is the literal NULL sentinel")]
    NullSentinel { column: &'static str },
}

/// Failures reading or advancing the trade id tracking file.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("I/O error on tracking file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tracking file {path} does not hold a trade id: {content:?}")]
    Invalid { path: PathBuf, content: String },

    #[error("start id {0} is out of range, trade ids start at 1")]
    StartOutOfRange(i64),

    #[error("trade id range exhausted at {0}")]
    Exhausted(i64),
}

/// Errors from a destination store (Postgres or the in-memory preview store).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),

    #[error("bulk copy error: {0}")]
    Copy(#[from] sqlx::Error),

    #[error(transparent)]
    Artifact(#[from] EmitError),

    #[error("{0}")]
    Rejected(String),
}

impl StoreError {
    /// Transient connection-level failures worth another attempt.
    ///
    /// Artifact (local file) errors and constraint/data errors are never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Copy(err) => is_connection_failure(err),
            StoreError::Db(err) => matches!(err, sea_orm::DbErr::ConnectionAcquire(_) | sea_orm::DbErr::Conn(_)),
            StoreError::Artifact(_) | StoreError::Rejected(_) => false,
        }
    }
}

fn is_connection_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        // SQLSTATE class 08: connection exception
        sqlx::Error::Database(db) => db.code().is_some_and(|code| code.starts_with("08")),
        _ => false,
    }
}

/// Fatal outcomes of a staged import run. Every variant leaves production untouched
/// (or, for `Migrate`, rolled back) and carries what the operator needs to resume.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("no day partitions found under {0:?}")]
    NothingToImport(Vec<PathBuf>),

    #[error("cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{trades_csv} has no matching participants file")]
    MissingParticipants { trades_csv: PathBuf },

    #[error(
        "staging already holds {trades} trades and {participants} participants; \
         rerun with --migrate-only, --reset-staging, or --start-date=YYYYMMDD to append"
    )]
    StagingNotEmpty { trades: u64, participants: u64 },

    #[error("failed to load day {day} into staging: {source}; resume with --start-date={day}")]
    StageLoad {
        day: DayKey,
        #[source]
        source: StoreError,
    },

    #[error(
        "id conflict: staging min id {staging_min} <= production max id {production_max}; \
         regenerate the CSVs with --start-id={next_safe_id}"
    )]
    IdConflict {
        staging_min: i64,
        production_max: i64,
        next_safe_id: i64,
    },

    #[error("staging verification failed: {0}")]
    StagingAnomalies(String),

    #[error("staging is empty, nothing to migrate")]
    EmptyStaging,

    #[error("migration transaction rolled back, staging left intact: {0}")]
    Migrate(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Missing or malformed configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::fmt;

    use super::*;

    #[derive(Debug)]
    struct ServerError(&'static str);

    impl fmt::Display for ServerError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "server error {}", self.0)
        }
    }

    impl std::error::Error for ServerError {}

    impl sqlx::error::DatabaseError for ServerError {
        fn message(&self) -> &str {
            "server error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn copy_err(err: sqlx::Error) -> StoreError {
        StoreError::Copy(err)
    }

    #[test]
    fn only_connection_failures_are_retried() {
        assert!(copy_err(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(copy_err(sqlx::Error::Io(std::io::ErrorKind::ConnectionReset.into())).is_retryable());
        // connection_failure
        assert!(copy_err(sqlx::Error::Database(Box::new(ServerError("08006")))).is_retryable());

        assert!(!copy_err(sqlx::Error::Protocol("unexpected message".to_string())).is_retryable());
        // string_data_right_truncation
        assert!(!copy_err(sqlx::Error::Database(Box::new(ServerError("22001")))).is_retryable());
        assert!(!StoreError::Rejected("duplicate key".to_string()).is_retryable());
    }
}
