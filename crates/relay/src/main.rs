//! Binary entry point. All behavior lives in the library crate
//! (`src/lib.rs`); this just wires config, state, and the TCP listener
//! together.

use tracing_subscriber::EnvFilter;

use termcast_relay::config::RelayConfig;
use termcast_relay::state::AppState;
use termcast_relay::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RelayConfig::from_env();
    let app = build_router(AppState::new());

    let addr = std::net::SocketAddr::new(config.host, config.port);
    tracing::info!(%addr, "termcast-relay listening");

    // spec §7: "Fatal: only unrecoverable transport bind failure (relay
    // cannot listen) terminates the process."
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
