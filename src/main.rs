//! Socket Hub - Binary Entry Point
//!
//! Usage: `socket-hub [config.json]`. Environment variables prefixed with
//! `SOCKET_HUB_` override the file; `RUST_LOG` controls log output.

use socket_hub::api::chat::ChatHandler;
use socket_hub::api::http::serve_admin;
use socket_hub::{Hub, HubConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => HubConfig::from_file(&path)?,
        None => HubConfig::default(),
    }
    .apply_env()?;

    let hub = Hub::new(config)?;
    hub.route("/ws", ChatHandler::new());

    let server = hub.start().await?;
    tracing::info!(
        "{} v{} accepting WebSocket upgrades on ws://{}/ws",
        socket_hub::NAME,
        socket_hub::VERSION,
        server.local_addr
    );

    if let Some(admin_addr) = hub.config().admin_addr.clone() {
        serve_admin(&admin_addr, hub.clone()).await?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    server.shutdown();

    // Let connections finish their closing handshake
    let deadline = tokio::time::Instant::now() + hub.config().close_timeout();
    while hub.registry().count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    Ok(())
}
