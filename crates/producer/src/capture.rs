//! The pane-capture backend is explicitly out of scope for this system
//! (spec §1): the controller only depends on this trait. A real backend
//! shells out to a terminal multiplexer; tests supply a fake that returns
//! canned snapshots and records injected keystrokes.

use std::future::Future;

use termcast_protocol::InputPayload;

use crate::error::ControllerError;

/// One capture/inject surface, scoped to a single pane for the lifetime of
/// one attached session. `capture` MUST be idempotent: two calls against an
/// unchanged pane return identical bytes (spec §8 property: "two identical
/// consecutive pane captures MUST NOT produce two frames").
///
/// Methods are spelled as `-> impl Future<...> + Send` rather than plain
/// `async fn` so that `ProducerCore<C>::run()` (spawned generically over
/// `F::Capture` in `daemon.rs`) is itself provably `Send` — a bare `async
/// fn` in a trait leaves the returned future's `Send`-ness unspecified for
/// generic callers, which `tokio::spawn` requires.
pub trait PaneCapture: Send + 'static {
    /// Full snapshot of the pane's current contents.
    fn capture(&mut self) -> impl Future<Output = Result<Vec<u8>, ControllerError>> + Send;

    /// Inject a decrypted keystroke. `Text` keys are literal; `Special`
    /// keys are the backend's own symbolic names (`Enter`, `Tab`, `C-c`,
    /// ...) and are passed through unescaped.
    fn inject(
        &mut self,
        payload: &InputPayload,
    ) -> impl Future<Output = Result<(), ControllerError>> + Send;
}

/// Creates and enumerates panes in the backend, independent of any single
/// attached session. Only the daemon RPC surface needs this; a
/// single-session producer talks to one `PaneCapture` directly.
pub trait PaneCaptureFactory: Send + Sync + 'static {
    type Capture: PaneCapture;

    /// Names of panes the backend already knows about, attached or not.
    fn list_known(&self) -> impl Future<Output = Result<Vec<String>, ControllerError>> + Send;

    /// Creates a new pane named `name`. Errors if one already exists.
    fn create(&self, name: &str) -> impl Future<Output = Result<(), ControllerError>> + Send;

    /// Binds a `PaneCapture` to an existing pane.
    fn open(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Self::Capture, ControllerError>> + Send;
}

pub mod tmux;
