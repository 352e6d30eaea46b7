use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The chat has no study whose due-time has passed.
    #[error("no study due")]
    NoStudyDue,

    #[error("corrupt value in bucket '{bucket}' ({len} bytes)")]
    CorruptValue { bucket: &'static str, len: usize },

    #[error("missing record in bucket '{0}'")]
    Missing(&'static str),

    #[error("notifier requires a tokio runtime")]
    NoRuntime,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for the expected "nothing to study" condition, false for storage faults.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NoStudyDue)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
