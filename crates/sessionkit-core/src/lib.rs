//! Core library for sessionkit.
//!
//! Establishes a user session against a remote token-issuing service,
//! persists the issued tokens, exposes the current identity to the rest of
//! an application and tears the session down on demand.
//!
//! The entry point is [`SessionManager`], which composes a
//! [`CredentialClient`] (network side) with a [`TokenStore`] (durable side).

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;

pub use api::{ApiError, CredentialClient, HttpCredentialClient};
pub use auth::{
    FileTokenStore, KeyringTokenStore, MemoryTokenStore, RestorePolicy, Session, SessionManager,
    SessionState, SubscriptionId, TokenPair, TokenStore,
};
pub use config::{Config, TokenStoreKind};
pub use error::{SessionError, StoreError};
pub use models::UserProfile;
