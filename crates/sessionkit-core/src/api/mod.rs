//! Credential service module.
//!
//! This module provides the `CredentialClient` seam the session manager
//! talks to, and `HttpCredentialClient`, its implementation against a
//! JWT issuing service (`/token/`, `/token/refresh/` and a profile
//! endpoint authenticated with the bearer access token).

pub mod client;
pub mod error;
pub mod traits;

pub use client::HttpCredentialClient;
pub use error::ApiError;
pub use traits::CredentialClient;
