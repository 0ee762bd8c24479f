//! Command handlers. Each one initializes the manager, then runs a single
//! session operation and prints the outcome.

use std::io::{self, Write};

use anyhow::{Context, Result};
use sessionkit_core::{ApiError, Config, SessionError, SessionManager, SessionState, TokenStore};
use tracing::{error, warn};

/// Username used when none is passed on the command line
const ENV_USERNAME: &str = "SESSIONKIT_USERNAME";

/// Password used instead of prompting
const ENV_PASSWORD: &str = "SESSIONKIT_PASSWORD";

pub async fn login(manager: &SessionManager, config: &mut Config, username: Option<String>) -> Result<()> {
    manager.initialize().await?;

    let username = match username
        .or_else(|| std::env::var(ENV_USERNAME).ok())
        .or_else(|| config.last_username.clone())
    {
        Some(username) => username,
        None => prompt_line("Username: ")?,
    };

    let password = match std::env::var(ENV_PASSWORD) {
        Ok(password) if !password.is_empty() => password,
        _ => rpassword::prompt_password("Password: ")?,
    };

    match manager.login(&username, &password).await {
        Ok(user) => {
            config.last_username = Some(username);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            println!("Logged in as {}", user.display_name());
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Login failed");
            Err(anyhow::anyhow!(describe_login_error(&e)))
        }
    }
}

pub async fn logout(manager: &SessionManager) -> Result<()> {
    manager.logout().await;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(manager: &SessionManager, store: &dyn TokenStore) -> Result<()> {
    println!("{}", identity_line(manager, store).await?);
    Ok(())
}

/// One-line answer to `whoami`. Tokens that survive a failed revalidation
/// were not rejected, so the service could not be reached to verify them.
async fn identity_line(manager: &SessionManager, store: &dyn TokenStore) -> Result<String> {
    if manager.initialize().await? == SessionState::Authenticated {
        let user = manager
            .current_user()
            .context("Session is authenticated but holds no profile")?;
        return Ok(match user.email() {
            Some(email) => format!("{} <{}>", user.display_name(), email),
            None => user.display_name(),
        });
    }

    let stored = store.load_pair().context("Failed to read token store")?.is_some();
    Ok(if stored {
        "Tokens are stored but the session could not be verified (service unreachable?)".to_string()
    } else {
        "Not logged in".to_string()
    })
}

pub async fn refresh(manager: &SessionManager) -> Result<()> {
    manager.initialize().await?;
    match manager.refresh_access_token().await {
        Ok(()) => {
            println!("Access token refreshed");
            Ok(())
        }
        Err(SessionError::NoStoredTokens) => {
            println!("Not logged in");
            Ok(())
        }
        Err(e) if e.is_rejection() => Err(anyhow::anyhow!(
            "Session expired, log in again ({})",
            e
        )),
        Err(e) => Err(e.into()),
    }
}

pub async fn status(manager: &SessionManager, store: &dyn TokenStore) -> Result<()> {
    let state = manager.initialize().await?;
    let stored = store.load_pair().context("Failed to read token store")?.is_some();

    println!("State:         {}", state_label(state));
    println!("Tokens stored: {}", if stored { "yes" } else { "no" });
    if let Some(session) = manager.session() {
        println!("User:          {}", session.user().display_name());
        println!("Logged in:     {}m ago", session.minutes_since_login());
    }
    Ok(())
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Unauthenticated => "logged out",
        SessionState::Authenticating => "logging in",
        SessionState::Authenticated => "logged in",
    }
}

/// User-facing message for a failed login.
fn describe_login_error(err: &SessionError) -> String {
    match err {
        SessionError::MissingInput(_) => "Username and password required".to_string(),
        SessionError::Credential(ApiError::NetworkError(e)) if e.is_timeout() => {
            "Connection timed out. Please try again.".to_string()
        }
        SessionError::Credential(ApiError::NetworkError(_)) => {
            "Unable to connect to server. Check your internet connection.".to_string()
        }
        SessionError::Credential(e) if e.is_rejection() => "Invalid username or password".to_string(),
        SessionError::ProfileFetch(e) => format!(
            "Logged in, but the profile could not be loaded ({}). Run `sessionkit whoami` to retry.",
            e
        ),
        other => format!("Login failed: {}", other),
    }
}

fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{}", prompt);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

// ============================================================================
// Tests
// ============================================================================
