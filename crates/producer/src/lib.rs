//! termcast-producer: the session controller shared by the single-session
//! CLI and the multi-session daemon (spec §4.2), plus the transport and
//! capture-backend plumbing around it.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod capture;
pub mod config;
pub mod core;
pub mod daemon;
pub mod error;
pub mod transport;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX_EPOCH")
        .as_millis() as u64
}
