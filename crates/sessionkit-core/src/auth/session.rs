use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserProfile;

/// Access and refresh token as issued by the credential service.
/// Both values are opaque and never parsed.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

// Tokens must never reach the logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Where the identity state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Unauthenticated,
    /// A login or profile reload is in flight
    Authenticating,
    Authenticated,
}

/// What `initialize` does with tokens found in the store at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePolicy {
    /// Stored tokens are not trusted; the user logs in again.
    #[default]
    RequireLogin,
    /// Stored tokens are revalidated by fetching the profile.
    Revalidate,
}

/// The authenticated state: persisted tokens plus the profile they unlock.
#[derive(Debug, Clone)]
pub struct Session {
    tokens: TokenPair,
    user: UserProfile,
    pub authenticated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(tokens: TokenPair, user: UserProfile) -> Self {
        Self {
            tokens,
            user,
            authenticated_at: Utc::now(),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.tokens.access
    }

    pub fn refresh_token(&self) -> &str {
        &self.tokens.refresh
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub(crate) fn replace_tokens(&mut self, tokens: TokenPair) {
        self.tokens = tokens;
    }

    /// Minutes since the session was established (for display)
    pub fn minutes_since_login(&self) -> i64 {
        (Utc::now() - self.authenticated_at).num_minutes().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_pair_debug_is_redacted() {
        let debug = format!("{:?}", TokenPair::new("AT1", "RT1"));
        assert!(!debug.contains("AT1"));
        assert!(!debug.contains("RT1"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_session_replace_tokens_keeps_user() {
        let user: UserProfile = serde_json::from_str(r#"{"name":"Ana"}"#).unwrap();
        let mut session = Session::new(TokenPair::new("AT1", "RT1"), user.clone());
        session.replace_tokens(TokenPair::new("AT2", "RT1"));
        assert_eq!(session.access_token(), "AT2");
        assert_eq!(session.refresh_token(), "RT1");
        assert_eq!(session.user(), &user);
        assert_eq!(session.minutes_since_login(), 0);
    }

    #[test]
    fn test_default_state_is_unauthenticated() {
        assert_eq!(SessionState::default(), SessionState::Unauthenticated);
        assert_eq!(RestorePolicy::default(), RestorePolicy::RequireLogin);
    }
}
