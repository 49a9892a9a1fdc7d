//! A thin real `PaneCapture`/`PaneCaptureFactory` implementation behind a
//! subprocess invocation, kept separate from `ProducerCore` so the
//! capture backend can be swapped without touching session logic (spec
//! §1 excludes "the actual terminal-pane capture backend" from scope —
//! this module is the minimal concrete stand-in, not the contract).
//!
//! Special keystrokes (`Enter`, `Tab`, `Up`, `C-c`, ...) pass straight
//! through as tmux's own `send-keys` key names, which is why spec §4.2's
//! examples read like tmux key syntax in the first place.

use tokio::process::Command;

use termcast_protocol::{InputKind, InputPayload};

use crate::capture::{PaneCapture, PaneCaptureFactory};
use crate::error::ControllerError;

async fn run(args: &[&str]) -> Result<std::process::Output, ControllerError> {
    Command::new("tmux")
        .args(args)
        .output()
        .await
        .map_err(|err| ControllerError::Capture(err.to_string()))
}

fn require_success(output: std::process::Output) -> Result<std::process::Output, ControllerError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(ControllerError::Capture(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

pub struct TmuxCapture {
    target: String,
}

impl TmuxCapture {
    pub fn new(target: impl Into<String>) -> Self {
        TmuxCapture { target: target.into() }
    }
}

impl PaneCapture for TmuxCapture {
    async fn capture(&mut self) -> Result<Vec<u8>, ControllerError> {
        let output = require_success(run(&["capture-pane", "-t", &self.target, "-p", "-e"]).await?)?;
        Ok(output.stdout)
    }

    async fn inject(&mut self, payload: &InputPayload) -> Result<(), ControllerError> {
        let result = match payload.kind {
            InputKind::Text => run(&["send-keys", "-t", &self.target, "-l", "--", &payload.keys]).await,
            InputKind::Special => run(&["send-keys", "-t", &self.target, &payload.keys]).await,
        }?;
        require_success(result).map(|_| ())
    }
}

pub struct TmuxFactory;

impl PaneCaptureFactory for TmuxFactory {
    type Capture = TmuxCapture;

    async fn list_known(&self) -> Result<Vec<String>, ControllerError> {
        let output = run(&["list-sessions", "-F", "#{session_name}"]).await?;
        if !output.status.success() {
            // tmux exits non-zero with "no server running" when nothing exists yet.
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    async fn create(&self, name: &str) -> Result<(), ControllerError> {
        if self.list_known().await?.iter().any(|existing| existing == name) {
            return Err(ControllerError::SessionExists(name.to_string()));
        }
        require_success(run(&["new-session", "-d", "-s", name]).await?).map(|_| ())
    }

    async fn open(&self, name: &str) -> Result<Self::Capture, ControllerError> {
        if !self.list_known().await?.iter().any(|existing| existing == name) {
            return Err(ControllerError::UnknownSession(name.to_string()));
        }
        Ok(TmuxCapture::new(name))
    }
}
