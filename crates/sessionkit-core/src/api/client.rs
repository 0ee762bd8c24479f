//! HTTP implementation of the credential client.
//!
//! Talks to a JWT issuing service: `POST /token/` exchanges a username and
//! password for an access/refresh pair, `POST /token/refresh/` mints a new
//! access token and the profile endpoint returns the authenticated user.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::TokenPair;
use crate::config::Config;
use crate::models::UserProfile;

use super::{ApiError, CredentialClient};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Path of the token issuing endpoint, relative to the base URL.
const TOKEN_PATH: &str = "token/";

/// Path of the token refresh endpoint, relative to the base URL.
const REFRESH_PATH: &str = "token/refresh/";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: String,
    refresh: String,
}

/// Refresh responses only carry a new refresh token when rotation is on.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    refresh: Option<String>,
}

/// Credential client for a JWT issuing service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpCredentialClient {
    client: Client,
    base_url: String,
    profile_path: String,
}

impl HttpCredentialClient {
    /// Create a client for the service rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            profile_path: crate::config::DEFAULT_PROFILE_PATH.to_string(),
        })
    }

    /// Create a client from the endpoints named in the configuration
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Ok(Self::new(config.api_base_url())?.with_profile_path(config.profile_path()))
    }

    /// Override the path of the profile endpoint
    pub fn with_profile_path(mut self, path: impl Into<String>) -> Self {
        self.profile_path = path.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send the request built by `build`, backing off on rate limiting,
    /// and decode the JSON body.
    async fn send<T, F>(&self, url: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build().send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response.json().await.map_err(|e| {
                        ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e))
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }
}

#[async_trait]
impl CredentialClient for HttpCredentialClient {
    async fn issue_token(&self, identifier: &str, secret: &str) -> Result<TokenPair, ApiError> {
        let url = self.endpoint(TOKEN_PATH);
        let body = TokenRequest {
            username: identifier,
            password: secret,
        };

        let tokens: TokenResponse = self
            .send(&url, || self.client.post(&url).json(&body))
            .await?;

        debug!("Token pair issued");
        Ok(TokenPair::new(tokens.access, tokens.refresh))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let url = self.endpoint(&self.profile_path);
        self.send(&url, || self.client.get(&url).bearer_auth(access_token))
            .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let url = self.endpoint(REFRESH_PATH);
        let body = RefreshRequest {
            refresh: refresh_token,
        };

        let refreshed: RefreshResponse = self
            .send(&url, || self.client.post(&url).json(&body))
            .await?;

        let rotated = refreshed.refresh.is_some();
        debug!(rotated, "Access token refreshed");
        Ok(TokenPair::new(
            refreshed.access,
            refreshed.refresh.unwrap_or_else(|| refresh_token.to_string()),
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> HttpCredentialClient {
        HttpCredentialClient::new(format!("{}/api/", server.uri())).unwrap()
    }

    #[test]
    fn test_endpoint_joins_slashes() {
        let client = HttpCredentialClient::new("http://localhost:8000/api/").unwrap();
        assert_eq!(client.endpoint("/token/"), "http://localhost:8000/api/token/");
        assert_eq!(client.endpoint("perfil/"), "http://localhost:8000/api/perfil/");
    }

    #[tokio::test]
    async fn test_issue_token_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/token/"))
            .and(body_json(serde_json::json!({
                "username": "a@b.com",
                "password": "pw1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access": "AT1",
                "refresh": "RT1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server).issue_token("a@b.com", "pw1").await.unwrap();
        assert_eq!(tokens, TokenPair::new("AT1", "RT1"));
    }

    #[tokio::test]
    async fn test_issue_token_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/token/"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "detail": "No active account found with the given credentials"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .issue_token("a@b.com", "wrong")
            .await
            .unwrap_err();
        assert!(err.is_rejection());
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_fetch_profile_sends_bearer_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/perfil/"))
            .and(header("Authorization", "Bearer AT1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 7,
                "username": "ana",
                "email": "a@b.com",
                "first_name": "Ana",
                "last_name": "Lopez"
            })))
            .mount(&server)
            .await;

        let profile = client_for(&server).fetch_profile("AT1").await.unwrap();
        assert_eq!(profile.email(), Some("a@b.com"));
        assert_eq!(profile.display_name(), "Ana Lopez");
    }

    #[tokio::test]
    async fn test_fetch_profile_custom_path() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/users/me/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "name": "Ana" })),
            )
            .mount(&server)
            .await;

        let profile = client_for(&server)
            .with_profile_path("users/me/")
            .fetch_profile("AT1")
            .await
            .unwrap();
        assert_eq!(profile.display_name(), "Ana");
    }

    #[tokio::test]
    async fn test_fetch_profile_rejects_non_object_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/perfil/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["Ana"])))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_profile("AT1").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_without_rotation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/token/refresh/"))
            .and(body_json(serde_json::json!({ "refresh": "RT1" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "access": "AT2" })),
            )
            .mount(&server)
            .await;

        let tokens = client_for(&server).refresh_token("RT1").await.unwrap();
        assert_eq!(tokens, TokenPair::new("AT2", "RT1"));
    }

    #[tokio::test]
    async fn test_refresh_with_rotation() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/token/refresh/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access": "AT2",
                "refresh": "RT2"
            })))
            .mount(&server)
            .await;

        let tokens = client_for(&server).refresh_token("RT1").await.unwrap();
        assert_eq!(tokens, TokenPair::new("AT2", "RT2"));
    }

    #[tokio::test]
    async fn test_server_error_is_not_a_rejection() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/token/refresh/"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client_for(&server).refresh_token("RT1").await.unwrap_err();
        assert!(matches!(err, ApiError::ServerError(ref body) if body == "maintenance"));
        assert!(!err.is_rejection());
    }
}
