//! BatNav Match Server
//!
//! Ranked naval-battle server. Sessions are issued by the web gateway;
//! in development, `BATNAV_DEV_ACCOUNTS` seeds accounts and prints their tokens.

use std::sync::Arc;
use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use batnav::{
    DEFAULT_RATING, VERSION,
    core::rating::Rating,
    game::engine::MatchEngine,
    network::{
        AuthConfig, GameServer, Gateway, GatewayConfig, PairingConfig, PairingQueue, ServerConfig,
        SessionRegistry,
    },
    store::MemoryAccountStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let auth_config = AuthConfig::from_env();
    let pairing_config = PairingConfig::from_env();
    let gateway_config = GatewayConfig::from_env();
    let server_config = ServerConfig::from_env();

    info!("BatNav Server v{}", VERSION);
    info!(
        "Turn clock: {}s ({:?} on expiry)",
        gateway_config.turn.timeout.as_secs(),
        gateway_config.turn.policy
    );
    info!(
        "Pairing: sweep every {}ms, radius {} +{}/sweep",
        pairing_config.sweep_interval.as_millis(),
        pairing_config.initial_radius,
        pairing_config.radius_step
    );

    let sessions = Arc::new(SessionRegistry::new(auth_config));
    let store = Arc::new(MemoryAccountStore::new());

    if let Ok(accounts) = std::env::var("BATNAV_DEV_ACCOUNTS") {
        seed_dev_accounts(&accounts, &sessions, &store).await;
    }

    let pairing = Arc::new(PairingQueue::new(pairing_config));
    let engine = Arc::new(MatchEngine::new(sessions.clone(), store.clone()));
    let gateway = Gateway::new(gateway_config, sessions, store, pairing, engine);

    let server = Arc::new(GameServer::new(server_config, gateway));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            signal_server.shutdown();
        }
    });

    server.run().await.context("server failed")?;
    info!("Server stopped");
    Ok(())
}

/// Parse `name[:rating],...` and register each account with a fresh session.
async fn seed_dev_accounts(accounts: &str, sessions: &SessionRegistry, store: &MemoryAccountStore) {
    for entry in accounts.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, rating) = match entry.split_once(':') {
            Some((name, raw)) => match raw.trim().parse::<Rating>() {
                Ok(rating) => (name.trim(), rating),
                Err(_) => {
                    warn!("Skipping dev account {:?}: bad rating", entry);
                    continue;
                }
            },
            None => (entry, DEFAULT_RATING),
        };

        let account = store.create_account(name, rating).await;
        let token = sessions.create(account.id).await;
        info!("Dev account {} ({}) token {}", account.username, account.rating, token);
    }
}
