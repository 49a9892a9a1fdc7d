//! Single-session producer CLI: attaches one named pane to one relay
//! session for the life of the process (spec §4.2).

use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use termcast_protocol::ConnectionRole;
use termcast_producer::capture::tmux::TmuxFactory;
use termcast_producer::capture::PaneCaptureFactory;
use termcast_producer::config::SingleSessionArgs;
use termcast_producer::core::ProducerCore;
use termcast_producer::transport::{self, ConnectParams};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = SingleSessionArgs::parse();

    let factory = TmuxFactory;
    if !factory.list_known().await?.iter().any(|name| name == &args.session) {
        factory.create(&args.session).await?;
    }
    let capture = factory.open(&args.session).await?;

    let mut core = ProducerCore::new(capture, Duration::from_millis(args.poll_ms));
    if args.unencrypted {
        core = core.unencrypted();
    }
    let public_key = core.public_key_base64();

    let (relay_in_tx, relay_in_rx) = mpsc::unbounded_channel();
    let (relay_out_tx, relay_out_rx) = mpsc::unbounded_channel();

    let params = ConnectParams {
        server: args.server.clone(),
        role: ConnectionRole::Producer,
        session_id: Some(args.session.clone()),
        public_key: if args.unencrypted { None } else { Some(public_key) },
        nickname: None,
        user_secret: args.user_secret.clone(),
    };

    tracing::info!(session = %args.session, server = %args.server, "starting producer");

    let core_task = tokio::spawn(core.run(relay_in_rx, relay_out_tx));
    transport::run(params, relay_out_rx, relay_in_tx, || {}).await;
    core_task.abort();
    Ok(())
}
