//! The network seam of the session manager.

use async_trait::async_trait;

use crate::auth::TokenPair;
use crate::models::UserProfile;

use super::ApiError;

/// Issues, refreshes and validates tokens against the credential service.
///
/// Transport details (verbs, paths, headers, timeouts) belong to the
/// implementation. `HttpCredentialClient` covers JWT services speaking the
/// `/token/` + `/token/refresh/` convention.
#[async_trait]
pub trait CredentialClient: Send + Sync {
    /// Exchange an identifier and secret for a fresh token pair.
    async fn issue_token(&self, identifier: &str, secret: &str) -> Result<TokenPair, ApiError>;

    /// Fetch the profile of the user owning `access_token`.
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError>;

    /// Mint a new access token. When the service does not rotate refresh
    /// tokens the returned pair carries `refresh_token` unchanged.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;
}
