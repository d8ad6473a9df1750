//! ivrcall -- real-call IVR test orchestration.
//!
//! Places outbound test calls through a telephony provider, reconciles the
//! provider's asynchronous callbacks against the originating test run, and
//! fans completed results out to email, SMS and chat.

pub mod api;
pub mod auth;
pub mod cases;
pub mod config;
pub mod notify;
pub mod reconcile;
pub mod runs;
pub mod storage;
pub mod telephony;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::auth::{IdentityVerifier, StaticTokenVerifier};
use crate::config::AppConfig;
use crate::notify::Dispatcher;
use crate::telephony::{TelephonyGateway, TwilioGateway};

/// Build the telephony gateway when credentials are present.
pub fn gateway_from_config(config: &AppConfig) -> Result<Option<Arc<dyn TelephonyGateway>>> {
    let Some(creds) = config.telephony.credentials() else {
        tracing::warn!("telephony credentials missing, real calls are disabled");
        return Ok(None);
    };
    let gateway = TwilioGateway::new(creds, &config.telephony, &config.server.public_base_url)
        .context("failed to build telephony client")?;
    Ok(Some(Arc::new(gateway)))
}

/// Start the ivrcall daemon: storage, provider clients and the API server.
pub async fn serve(config: AppConfig) -> Result<()> {
    // 1. Initialize Storage
    let db_path = &config.database.path;
    tracing::info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(db_path)?;

    // 2. Provider and notification clients
    let gateway = gateway_from_config(&config)?;
    let dispatcher =
        Dispatcher::from_config(&config.notify).context("failed to build notification transports")?;
    let verifier: Option<Arc<dyn IdentityVerifier>> = if config.auth.tokens.is_empty() {
        None
    } else {
        Some(Arc::new(StaticTokenVerifier::new(config.auth.tokens.clone())))
    };

    // 3. Start API Server
    let state = api::state::AppState::new(pool, gateway, Arc::new(dispatcher), verifier, &config);
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.server.bind))?;
    tracing::info!(%addr, public = %config.server.public_base_url, "ivrcall listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
