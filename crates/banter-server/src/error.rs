use thiserror::Error;

use banter_shared::protocol::TargetError;
use banter_store::{BlobError, StoreError, TokenError};

/// Handshake-time rejection. A connection failing admission never reaches
/// any other component.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    #[error("No token provided")]
    MissingToken,

    #[error("Malformed token")]
    MalformedToken,

    #[error("Expired token")]
    ExpiredToken,

    #[error("Unknown account")]
    UnknownAccount,

    #[error("Account inactive")]
    InactiveAccount,
}

impl From<TokenError> for AuthRejection {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Malformed => Self::MalformedToken,
            TokenError::Expired => Self::ExpiredToken,
        }
    }
}

/// Engine-level error taxonomy. Every variant maps to a scoped `error`
/// event for the originating connection; none of them closes it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Auth(#[from] AuthRejection),

    /// Malformed, missing, oversized or unsupported input. The operation
    /// aborted before any mutation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The actor is not the message sender / not a room member.
    #[error("Not allowed: {0}")]
    Authorization(String),

    /// Document-store failure.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Blob-store failure, already classified by the collaborator.
    #[error("Upload failed: {0}")]
    Blob(#[from] BlobError),
}

impl From<TargetError> for EngineError {
    fn from(error: TargetError) -> Self {
        Self::Validation(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_classification() {
        assert_eq!(
            AuthRejection::from(TokenError::Malformed),
            AuthRejection::MalformedToken
        );
        assert_eq!(
            AuthRejection::from(TokenError::Expired),
            AuthRejection::ExpiredToken
        );
    }

    #[test]
    fn test_target_error_is_validation() {
        let error = EngineError::from(TargetError::Ambiguous);
        assert!(matches!(error, EngineError::Validation(_)));
    }
}
