//! sessionkit - log in to a token-issuing service from the terminal.
//!
//! Thin front end over `sessionkit-core`: every command builds a
//! `SessionManager` from the configuration, initializes it and runs one
//! session operation.

mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sessionkit_core::{
    auth::open_token_store, Config, HttpCredentialClient, RestorePolicy, SessionManager,
    TokenStore, TokenStoreKind,
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Overrides the configured service base URL
const ENV_API_URL: &str = "SESSIONKIT_API_URL";

/// Passphrase encrypting the token file at rest
const ENV_STORE_PASSPHRASE: &str = "SESSIONKIT_STORE_PASSPHRASE";

#[derive(Parser)]
#[command(name = "sessionkit", version, about = "Log in to a token-issuing service and keep the session")]
struct Cli {
    /// Token store backend (overrides the config file)
    #[arg(long, value_enum, global = true)]
    store: Option<StoreArg>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    File,
    Keyring,
}

impl From<StoreArg> for TokenStoreKind {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::File => TokenStoreKind::File,
            StoreArg::Keyring => TokenStoreKind::Keyring,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Exchange username and password for a session
    Login {
        #[arg(long, short)]
        username: Option<String>,
    },
    /// Clear the stored session
    Logout,
    /// Restore the stored session and print who it belongs to
    Whoami,
    /// Mint a new access token from the stored refresh token
    Refresh,
    /// Show the session state and whether tokens are stored
    Status,
}

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the log file when dropped.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn load_config(store: Option<StoreArg>) -> Config {
    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    if let Ok(url) = std::env::var(ENV_API_URL) {
        config.api_base_url = Some(url);
    }
    if let Some(store) = store {
        config.token_store = store.into();
    }
    config
}

fn build_manager(
    config: &Config,
    policy: RestorePolicy,
) -> Result<(SessionManager, Arc<dyn TokenStore>)> {
    let cache_dir = config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"));
    let passphrase = std::env::var(ENV_STORE_PASSPHRASE).ok();

    let store = open_token_store(config.token_store, &cache_dir, passphrase.as_deref())
        .context("Failed to open token store")?;
    let client = HttpCredentialClient::from_config(config).context("Failed to create HTTP client")?;

    let manager = SessionManager::new(Arc::new(client), Arc::clone(&store)).with_restore_policy(policy);
    Ok((manager, store))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;
    info!("sessionkit starting");

    let mut config = load_config(cli.store);

    // whoami is the explicit "restore my session" command
    let policy = match cli.command {
        Command::Whoami => RestorePolicy::Revalidate,
        _ => config.restore_policy,
    };
    let (manager, store) = build_manager(&config, policy)?;

    manager.subscribe(|user| match user {
        Some(user) => info!(user = %user.display_name(), "Identity changed"),
        None => info!("Identity cleared"),
    });

    let result = match cli.command {
        Command::Login { username } => commands::login(&manager, &mut config, username).await,
        Command::Logout => commands::logout(&manager).await,
        Command::Whoami => commands::whoami(&manager, store.as_ref()).await,
        Command::Refresh => commands::refresh(&manager).await,
        Command::Status => commands::status(&manager, store.as_ref()).await,
    };

    manager.dispose().await;
    info!("sessionkit shutting down");
    result
}
