//! Authentication module for managing the user session and its tokens.
//!
//! This module provides:
//! - `SessionManager`: the identity state machine (login, logout, refresh)
//! - `Session` / `TokenPair`: the in-memory authenticated state
//! - `TokenStore`: durable key/value storage for the token pair, with
//!   in-memory, JSON file and OS keychain implementations
//!
//! Tokens are persisted as two keys, `access_token` and `refresh_token`,
//! which are always written and cleared together.

pub mod file_store;
pub mod keyring_store;
pub mod manager;
pub mod session;
pub mod store;
pub mod subscribers;

pub use file_store::FileTokenStore;
pub use keyring_store::KeyringTokenStore;
pub use manager::SessionManager;
pub use session::{RestorePolicy, Session, SessionState, TokenPair};
pub use store::{open_token_store, MemoryTokenStore, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use subscribers::SubscriptionId;
