//! # agora-server
//!
//! HTTP service for the Agora shared chat room.
//!
//! This binary provides:
//! - **Identity**: guests by display name, registered accounts, and one
//!   password-protected administrator, all carried by signed session tokens
//! - **Message log** with replies, attachments, edits and reactions, read by
//!   clients through full snapshots or newest-first pages
//! - **Engagement**: reputation points and achievements per qualifying post
//! - **Moderation**: block list, message deletion and an append-only audit
//!   trail, with best-effort Telegram notifications to the operator
//!
//! Run `agora-server hash-password <password>` to produce the value for
//! `ADMIN_PASSWORD_HASH`.

mod api;
mod config;
mod engagement;
mod error;
mod gate;
mod identity;
mod messages;
mod moderation;
mod notify;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agora_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::notify::Notifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agora_server=debug,agora_store=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    if let Some(command) = args.next() {
        return match command.as_str() {
            "hash-password" => {
                let password = args
                    .next()
                    .context("usage: agora-server hash-password <password>")?;
                let hash = identity::hash_password(&password)
                    .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
                println!("{hash}");
                Ok(())
            }
            other => anyhow::bail!("unknown command: {other}"),
        };
    }

    info!("Starting Agora server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env().context("invalid configuration")?;
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path).with_context(|| {
        format!("failed to open database at {}", config.database_path.display())
    })?;

    let notifier = Notifier::from_config(&config);
    let http_addr = config.http_addr;
    let app_state = AppState::new(db, config, notifier).context("failed to prepare admin record")?;

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
