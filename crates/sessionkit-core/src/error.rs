//! Error taxonomy for session operations.

use thiserror::Error;

use crate::api::ApiError;

/// Failure of the durable token store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Token store encryption failed: {0}")]
    Crypto(String),

    /// Exactly one of the two token keys is present.
    #[error("Token store holds an incomplete token pair")]
    IncompletePair,
}

/// Errors surfaced by [`crate::SessionManager`] operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Missing {0}")]
    MissingInput(&'static str),

    /// The issuing service rejected the credentials or could not be reached.
    #[error("Credential error: {0}")]
    Credential(#[source] ApiError),

    /// Tokens were issued but the profile call failed. Tokens stay persisted.
    #[error("Profile fetch failed: {0}")]
    ProfileFetch(#[source] ApiError),

    #[error("Token refresh failed: {0}")]
    Refresh(#[source] ApiError),

    #[error("No stored session tokens")]
    NoStoredTokens,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// True when the service answered and refused the presented credential,
    /// as opposed to a transport failure.
    pub fn is_rejection(&self) -> bool {
        match self {
            SessionError::Credential(e) | SessionError::ProfileFetch(e) | SessionError::Refresh(e) => {
                e.is_rejection()
            }
            _ => false,
        }
    }
}
