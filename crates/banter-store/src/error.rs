use thiserror::Error;

/// Errors surfaced by the document-store collaborator.
///
/// "Not found" is distinct from a backend failure: callers routinely treat
/// the former as a validation problem and the latter as a collaborator
/// outage.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A lookup expected a record that does not exist.
    #[error("Record not found")]
    NotFound,

    /// The backing store failed (connectivity, query, constraint).
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Classified failures from the blob-store collaborator.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob store authentication failed: {0}")]
    Auth(String),

    #[error("Blob store misconfigured: {0}")]
    Config(String),

    #[error("Blob store unreachable: {0}")]
    Unreachable(String),
}

/// Classified failures from the token verifier.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Expired token")]
    Expired,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
