//! CLI argument parsing for both producer binaries (spec §1 excludes "the
//! CLI argument parsing" from the value-bearing core but the ambient
//! stack still needs one; §4.2 ambient additions name `clap` derive with
//! env fallback, mirroring the relay's `HOST`/`PORT` env-driven config).

use clap::Parser;

/// Single-session producer: attaches exactly one named pane for the life
/// of the process.
#[derive(Debug, Parser)]
#[command(name = "termcast", about = "Share one terminal pane through a termcast relay")]
pub struct SingleSessionArgs {
    /// Relay base URL, e.g. ws://localhost:3010
    #[arg(long, env = "TERMCAST_SERVER", default_value = "ws://localhost:3010")]
    pub server: String,

    /// User secret used to group sessions for `/api/user/sessions` enumeration.
    #[arg(long, env = "TERMCAST_USER_SECRET")]
    pub user_secret: Option<String>,

    /// Session id to publish under.
    #[arg(long)]
    pub session: String,

    /// Capture poll interval in milliseconds.
    #[arg(long, default_value_t = termcast_protocol::DEFAULT_CAPTURE_POLL_MS)]
    pub poll_ms: u64,

    /// Disable end-to-end encryption (plaintext `output`/`input`).
    #[arg(long)]
    pub unencrypted: bool,
}

/// Multi-session daemon: owns zero or more sessions, created and attached
/// at runtime via RPC rather than at the command line.
#[derive(Debug, Parser)]
#[command(name = "termcastd", about = "Multi-session termcast daemon")]
pub struct DaemonArgs {
    #[arg(long, env = "TERMCAST_SERVER", default_value = "ws://localhost:3010")]
    pub server: String,

    #[arg(long, env = "TERMCAST_USER_SECRET")]
    pub user_secret: Option<String>,

    #[arg(long, default_value_t = termcast_protocol::DEFAULT_CAPTURE_POLL_MS)]
    pub poll_ms: u64,
}
