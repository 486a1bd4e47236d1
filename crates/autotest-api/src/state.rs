//! Application state.

use autotest_scheduler::{CommitScheduler, RendezvousServer};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: CommitScheduler,
    pub rendezvous: Arc<RendezvousServer>,
    /// Comments must mention `@<bot_name>` to be acted on.
    pub bot_name: String,
    /// When set, webhook payloads must carry a valid `X-Hub-Signature-256`.
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        scheduler: CommitScheduler,
        rendezvous: Arc<RendezvousServer>,
        bot_name: impl Into<String>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            scheduler,
            rendezvous,
            bot_name: bot_name.into(),
            webhook_secret,
        }
    }
}
