//! Shared application state handed to every axum handler (spec §9: the
//! session directory is "an explicit broker object owned by the relay's
//! top-level service").

use std::sync::Arc;

use crate::directory::SessionDirectory;

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<SessionDirectory>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            directory: Arc::new(SessionDirectory::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
