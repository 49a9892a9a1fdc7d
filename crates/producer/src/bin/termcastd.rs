//! Multi-session termcast daemon: attaches/detaches sessions at runtime
//! via RPC rather than at the command line (spec §4.2).

use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use termcast_protocol::ConnectionRole;
use termcast_producer::capture::tmux::TmuxFactory;
use termcast_producer::config::DaemonArgs;
use termcast_producer::daemon::Daemon;
use termcast_producer::transport::{self, ConnectParams};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = DaemonArgs::parse();

    let (relay_in_tx, mut relay_in_rx) = mpsc::unbounded_channel();
    let (relay_out_tx, relay_out_rx) = mpsc::unbounded_channel();
    let (reconnect_tx, mut reconnect_rx) = mpsc::unbounded_channel::<()>();

    let mut daemon = Daemon::new(TmuxFactory, Duration::from_millis(args.poll_ms), relay_out_tx);

    let params = ConnectParams {
        server: args.server.clone(),
        role: ConnectionRole::Daemon,
        session_id: None,
        public_key: None,
        nickname: None,
        user_secret: args.user_secret.clone(),
    };

    tracing::info!(server = %args.server, "starting daemon");

    let dispatch_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = relay_in_rx.recv() => match msg {
                    Some(msg) => daemon.handle_relay_message(msg).await,
                    None => break,
                },
                Some(()) = reconnect_rx.recv() => {
                    daemon.reattach_all_after_reconnect().await;
                }
            }
        }
    });

    transport::run(params, relay_out_rx, relay_in_tx, move || {
        let _ = reconnect_tx.send(());
    })
    .await;
    dispatch_task.abort();
    Ok(())
}
