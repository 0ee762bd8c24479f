//! Session manager: the authenticated-identity state machine.
//!
//! `SessionManager` owns the in-memory session, mediates every read and
//! write of the token store and notifies subscribers when the identity
//! changes. Mutating operations (`initialize`, `login`, `logout`,
//! `refresh_access_token`, `reload_profile`) run one at a time behind an
//! async mutex; `current_user` and `state` never wait on them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::CredentialClient;
use crate::error::{SessionError, StoreError};
use crate::models::UserProfile;

use super::subscribers::{SubscriptionId, Subscribers};
use super::{RestorePolicy, Session, SessionState, TokenPair, TokenStore};

#[derive(Default)]
struct Inner {
    state: SessionState,
    session: Option<Session>,
}

pub struct SessionManager {
    client: Arc<dyn CredentialClient>,
    store: Arc<dyn TokenStore>,
    policy: RestorePolicy,
    inner: RwLock<Inner>,
    // Session critical section: held for the whole of every mutating operation.
    critical: Mutex<()>,
    initialized: AtomicBool,
    subscribers: Subscribers,
}

impl SessionManager {
    /// Create a manager in the `Unauthenticated` state. Nothing is read
    /// from the store until `initialize`.
    pub fn new(client: Arc<dyn CredentialClient>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            client,
            store,
            policy: RestorePolicy::default(),
            inner: RwLock::new(Inner::default()),
            critical: Mutex::new(()),
            initialized: AtomicBool::new(false),
            subscribers: Subscribers::default(),
        }
    }

    pub fn with_restore_policy(mut self, policy: RestorePolicy) -> Self {
        self.policy = policy;
        self
    }

    // ===== Observers =====

    /// Register a callback receiving the current user on every identity
    /// transition. Callbacks run synchronously, in registration order.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Option<&UserProfile>) + Send + Sync + 'static,
    {
        self.subscribers.add(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    // ===== Reads =====

    pub fn state(&self) -> SessionState {
        self.read_inner().state
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.read_inner().session.as_ref().map(|s| s.user().clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Bearer token for API calls made on behalf of the current user
    pub fn access_token(&self) -> Option<String> {
        self.read_inner()
            .session
            .as_ref()
            .map(|s| s.access_token().to_string())
    }

    /// Copy of the in-memory session, if authenticated
    pub fn session(&self) -> Option<Session> {
        self.read_inner().session.clone()
    }

    // ===== Lifecycle =====

    /// Read the token store at process start.
    ///
    /// Runs once; later calls return the current state. A store holding
    /// only one of the two tokens, or one that cannot be parsed, is
    /// cleared. What happens to a complete pair depends on the restore
    /// policy.
    pub async fn initialize(&self) -> Result<SessionState, SessionError> {
        let _critical = self.critical.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            debug!("Session manager already initialized");
            return Ok(self.state());
        }

        let stored = match self.store.load_pair() {
            Ok(stored) => stored,
            Err(StoreError::IncompletePair) => {
                warn!("Token store holds a single token, clearing both");
                self.store.clear_pair()?;
                None
            }
            Err(e @ StoreError::Corrupt(_)) => {
                warn!(error = %e, "Token store is unreadable, clearing it");
                self.store.clear_pair()?;
                None
            }
            Err(e) => return Err(e.into()),
        };

        let state = match (stored, self.policy) {
            (None, _) => {
                debug!("No stored tokens");
                SessionState::Unauthenticated
            }
            (Some(_), RestorePolicy::RequireLogin) => {
                info!("Stored tokens found, login required to restore the session");
                SessionState::Unauthenticated
            }
            (Some(_), RestorePolicy::Revalidate) => match self.revalidate().await {
                Ok(_) => {
                    info!("Session restored from stored tokens");
                    SessionState::Authenticated
                }
                Err(e @ SessionError::Store(_)) => return Err(e),
                Err(e) if e.is_rejection() => {
                    warn!(error = %e, "Stored tokens rejected, clearing them");
                    self.store.clear_pair()?;
                    SessionState::Unauthenticated
                }
                Err(e) => {
                    warn!(error = %e, "Could not revalidate stored tokens, keeping them");
                    SessionState::Unauthenticated
                }
            },
        };

        self.initialized.store(true, Ordering::SeqCst);
        Ok(state)
    }

    /// Drop subscribers and the in-memory session. The store is left as is
    /// and nobody is notified.
    ///
    /// Waits for an operation already in flight, so a login that started
    /// before `dispose` cannot bring the session back afterwards.
    pub async fn dispose(&self) {
        let _critical = self.critical.lock().await;
        self.subscribers.clear();
        *self.write_inner() = Inner::default();
        debug!("Session manager disposed");
    }

    // ===== Transitions =====

    /// Exchange credentials for tokens, persist them, then load the profile.
    ///
    /// Any failure leaves the manager `Unauthenticated`. A profile failure
    /// after issuing keeps the tokens in the store so `reload_profile` can
    /// retry without logging in again.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<UserProfile, SessionError> {
        if identifier.is_empty() {
            return Err(SessionError::MissingInput("identifier"));
        }
        if secret.is_empty() {
            return Err(SessionError::MissingInput("secret"));
        }

        let _critical = self.critical.lock().await;
        let attempt = Authenticating::enter(self);

        let tokens = self
            .client
            .issue_token(identifier, secret)
            .await
            .map_err(|e| {
                warn!(error = %e, "Token issue failed");
                SessionError::Credential(e)
            })?;

        self.store.save_pair(&tokens)?;
        debug!("Token pair persisted");

        let user = self
            .client
            .fetch_profile(&tokens.access)
            .await
            .map_err(|e| {
                warn!(error = %e, "Profile fetch failed, tokens kept for retry");
                SessionError::ProfileFetch(e)
            })?;

        info!("Login successful");
        Ok(attempt.complete(Session::new(tokens, user)))
    }

    /// Clear both tokens and the in-memory session.
    ///
    /// Store failures are logged and not retried. Logging out while
    /// already unauthenticated notifies nobody.
    pub async fn logout(&self) {
        let _critical = self.critical.lock().await;

        if let Err(e) = self.store.clear_pair() {
            warn!(error = %e, "Failed to clear stored tokens");
        }

        if self.reset() {
            info!("Logged out");
        } else {
            debug!("Logout without an active session");
        }
    }

    /// Mint a new access token from the stored refresh token.
    ///
    /// The identity does not change, so nobody is notified on success. A
    /// rejected refresh token ends the session.
    pub async fn refresh_access_token(&self) -> Result<(), SessionError> {
        let _critical = self.critical.lock().await;
        let stored = self.store.load_pair()?.ok_or(SessionError::NoStoredTokens)?;

        match self.exchange_refresh(&stored).await {
            Ok(tokens) => {
                if let Some(session) = self.write_inner().session.as_mut() {
                    session.replace_tokens(tokens);
                }
                Ok(())
            }
            Err(e) => {
                if e.is_rejection() {
                    self.reset();
                }
                Err(e)
            }
        }
    }

    /// Fetch the profile with the stored tokens, without issuing new ones.
    /// An expired access token is refreshed once before giving up.
    pub async fn reload_profile(&self) -> Result<UserProfile, SessionError> {
        let _critical = self.critical.lock().await;
        self.revalidate().await
    }

    // ===== Internals (callers hold the critical section) =====

    async fn revalidate(&self) -> Result<UserProfile, SessionError> {
        let stored = self.store.load_pair()?.ok_or(SessionError::NoStoredTokens)?;
        let attempt = Authenticating::enter(self);

        let (tokens, user) = match self.client.fetch_profile(&stored.access).await {
            Ok(user) => (stored, user),
            Err(e) if e.is_unauthorized() => {
                debug!("Access token rejected, refreshing before retrying profile");
                let tokens = self.exchange_refresh(&stored).await?;
                let user = self
                    .client
                    .fetch_profile(&tokens.access)
                    .await
                    .map_err(SessionError::ProfileFetch)?;
                (tokens, user)
            }
            Err(e) => return Err(SessionError::ProfileFetch(e)),
        };

        Ok(attempt.complete(Session::new(tokens, user)))
    }

    /// Trade `stored.refresh` for a new pair and persist it. A rejected
    /// refresh token clears the store.
    async fn exchange_refresh(&self, stored: &TokenPair) -> Result<TokenPair, SessionError> {
        match self.client.refresh_token(&stored.refresh).await {
            Ok(tokens) => {
                self.store.save_pair(&tokens)?;
                debug!("Refreshed token pair persisted");
                Ok(tokens)
            }
            Err(e) if e.is_rejection() => {
                warn!(error = %e, "Refresh token rejected, clearing stored tokens");
                if let Err(store_err) = self.store.clear_pair() {
                    warn!(error = %store_err, "Failed to clear rejected tokens");
                }
                Err(SessionError::Refresh(e))
            }
            Err(e) => Err(SessionError::Refresh(e)),
        }
    }

    /// Install `session` as `Authenticated` and notify.
    fn establish(&self, session: Session) {
        let user = session.user().clone();
        {
            let mut inner = self.write_inner();
            inner.state = SessionState::Authenticated;
            inner.session = Some(session);
        }
        self.subscribers.notify(Some(&user));
    }

    /// Drop to `Unauthenticated`. Notifies and returns true only if a
    /// session was present.
    fn reset(&self) -> bool {
        let previous = {
            let mut inner = self.write_inner();
            inner.state = SessionState::Unauthenticated;
            inner.session.take()
        };

        if previous.is_some() {
            self.subscribers.notify(None);
        }
        previous.is_some()
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks the manager `Authenticating` for the duration of a login or
/// profile reload. Unless completed, dropping it (early return, error or
/// a cancelled future) resets the manager to `Unauthenticated`.
struct Authenticating<'a> {
    manager: &'a SessionManager,
    completed: bool,
}

impl<'a> Authenticating<'a> {
    fn enter(manager: &'a SessionManager) -> Self {
        manager.write_inner().state = SessionState::Authenticating;
        Self {
            manager,
            completed: false,
        }
    }

    fn complete(mut self, session: Session) -> UserProfile {
        self.completed = true;
        let user = session.user().clone();
        self.manager.establish(session);
        user
    }
}

impl Drop for Authenticating<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.manager.reset();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
