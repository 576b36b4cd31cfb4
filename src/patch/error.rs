use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Missing version parameter")]
    Missing,

    #[error("Malformed version string: {0:?}")]
    MalformedVersion(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Version already published: {0}")]
    DuplicateVersion(String),
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Catalog query failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Invalid publish credential")]
    Unauthorized,

    #[error("Invalid patch submission: {0}")]
    Validation(String),

    #[error("Failed to store patch: {0}")]
    Storage(#[from] StorageError),
}
