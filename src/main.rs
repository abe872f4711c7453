//! bankwire-client entry point.
//!
//! Creates (or loads) a signing identity, prints the public key, connects,
//! authenticates, sends one TRANSFER and one STATEMENT, then keeps the
//! channel alive with PING until interrupted. Every inbound event is logged.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use bankwire_client::config::ClientConfig;
use bankwire_client::crypto::KeyManager;
use bankwire_client::domain::{ClientEvent, ConnectionState, EventKind};
use bankwire_client::protocol::{StatementParams, TransferParams};
use bankwire_client::BankwireClient;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ClientConfig::from_env().context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Identity
    let keys = match &config.private_key {
        Some(encoded) => KeyManager::from_private_key_base64(encoded),
        None => KeyManager::generate(),
    }
    .context("preparing signing identity")?;
    let keys = Arc::new(keys);
    println!("pub: {}", keys.public_key_base64());
    if config.expose_private_key {
        println!("key: {}", keys.private_key_base64());
    }

    let client = BankwireClient::connect_to(&config, Arc::clone(&keys))?;
    tracing::info!(server = %config.server_url, "starting bankwire-client");

    client.on(EventKind::Ack, |event| {
        tracing::info!(payload = %event.payload, "ack");
    });
    client.on(EventKind::Err, |event| {
        tracing::warn!(payload = %event.payload, "err");
    });
    client.on(EventKind::Notification, |event| {
        tracing::info!(payload = %event.payload, "transfer notification");
    });
    tokio::spawn(log_events(client.subscribe()));

    client.open()?;
    client
        .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT)
        .await
        .context("connecting to server")?;

    // AUTH is resent by the client on every reconnect when enabled.
    let authenticated = if config.authenticate_on_connect {
        client
            .wait_for_state(ConnectionState::Authenticated, config.request_timeout)
            .await
    } else {
        client.authenticate().await.map(|_| ())
    };
    match authenticated {
        Ok(()) => tracing::info!("authenticated"),
        Err(e) => tracing::warn!(error = %e, code = e.error_code(), "authentication not confirmed"),
    }

    client.transfer(TransferParams {
        account_number: "9120000001".to_string(),
        beneficiary: "9120000002".to_string(),
        currency: "USD".to_string(),
        amount: Decimal::ONE,
        narrative: "Test API Transfer".to_string(),
    })?;
    client.statement(StatementParams {
        account_number: "9120000001".to_string(),
        limit: 10,
    })?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutting down");
    client.close().await;

    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<ClientEvent>) {
    loop {
        match rx.recv().await {
            Ok(ClientEvent::Inbound { .. }) => {}
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => tracing::debug!(event = %json, "client event"),
                Err(e) => tracing::warn!(error = %e, "unserializable client event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "event logger lagged behind event bus");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
