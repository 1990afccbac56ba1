//! The error taxonomy. Every fallible command-surface and transport
//! operation returns one of these variants; none of them are ever delivered
//! through the signal channel.

/// Errors returned by adapter operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PlatformError {
    #[error("link not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("netlink transport failure: {0}")]
    TransportFailure(String),

    #[error("link already exists: {0}")]
    ExistsAlready(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PlatformError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    pub fn transport_failure(what: impl Into<String>) -> Self {
        Self::TransportFailure(what.into())
    }

    pub fn internal(what: impl Into<String>) -> Self {
        Self::Internal(what.into())
    }
}
