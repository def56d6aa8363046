//! Callroom relay server -- roster and call signaling for browser clients.
//!
//! An axum server that serves the static client bundle and a WebSocket
//! endpoint at `/ws`. Connected clients join a shared roster by name and
//! exchange call offers, answers, and candidates through the relay. Media
//! never touches the server.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin callroom-relay
//!
//! # Run on custom address with a different client bundle
//! cargo run --bin callroom-relay -- --bind 127.0.0.1:8080 --public-dir ./dist
//!
//! # Or via environment variable
//! CALLROOM_ADDR=127.0.0.1:8080 cargo run --bin callroom-relay
//! ```

use std::sync::Arc;

use callroom_relay::config::{RelayCliArgs, RelayConfig};
use callroom_relay::relay::{self, RelayState};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        public_dir = %config.public_dir.display(),
        "starting callroom relay server"
    );

    let state = Arc::new(RelayState::with_config(config.max_message_size));

    match relay::start_server_with_state(&config.bind_addr, state, &config.public_dir).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
