//! Error taxonomy shared by every gateway crate.

use thiserror::Error;

/// Errors surfaced by sessions, connections and the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No live session exists for the account.
    #[error("session not found: {0}")]
    NotFound(String),

    /// A send was attempted while the session is not authenticated.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// Missing or malformed request fields.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The chat network rejected or failed the call.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// The remote credential store could not be reached.
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest(reason.into())
    }

    pub fn upstream(reason: impl std::fmt::Display) -> Self {
        Self::UpstreamFailure(reason.to_string())
    }

    pub fn store(reason: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(reason.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
