//! Error types shared across the engine.
//!
//! Scheduling and record-store failures are surfaced to the caller of
//! `record_review`. Queue and sync failures never reach that path.

use thiserror::Error;

/// Rejected input to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingError {
    #[error("invalid quality rating {quality}: expected a value in 0..=5")]
    InvalidInput { quality: i32 },

    #[error("item id must not be empty")]
    EmptyItemId,
}

/// Failures of the durable stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage could not be reached or the write did not complete. Retryable.
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },

    /// A persisted record could not be decoded into a valid value.
    #[error("corrupt record '{item_id}': {details}")]
    Corrupt { item_id: String, details: String },
}

impl StorageError {
    pub fn unavailable(reason: impl ToString) -> Self {
        Self::Unavailable {
            reason: reason.to_string(),
        }
    }

    pub fn corrupt(item_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Corrupt {
            item_id: item_id.into(),
            details: details.into(),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::unavailable(err)
    }
}

/// Failures of the offline mutation queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("corrupt queue entry '{entry_id}': {details}")]
    CorruptEntry { entry_id: String, details: String },

    #[error("payload could not be serialized: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

/// Failures of a snapshot import. Import never mutates state when it fails
/// before the swap; a failure during the swap rolls the transaction back.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed snapshot: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid record '{item_id}': {reason}")]
    InvalidRecord { item_id: String, reason: String },

    #[error("duplicate record for item '{0}'")]
    DuplicateItem(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.into())
    }
}

/// Failures loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level error used by the command-line front end.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of the review-recording path.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ReviewError> for Error {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::Scheduling(e) => Error::Scheduling(e),
            ReviewError::Storage(e) => Error::Storage(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
