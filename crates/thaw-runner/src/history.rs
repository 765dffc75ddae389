use std::sync::Arc;

use anyhow::Result;
use thaw_core::{Clock, HistoryLevel};
use thaw_storage::Storage;
use tracing::{info, warn};

/// Append-only audit trail. Every entry is mirrored as a tracing event.
#[derive(Clone)]
pub struct HistoryLog {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    actor: String,
}

impl HistoryLog {
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, actor: impl Into<String>) -> Self {
        Self { store, clock, actor: actor.into() }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn info(&self, message: &str) -> Result<()> {
        info!(actor = %self.actor, "{}", message);
        self.store.append_history(self.clock.now_unix(), &self.actor, HistoryLevel::Info, message)?;
        Ok(())
    }

    pub fn error(&self, message: &str) -> Result<()> {
        warn!(actor = %self.actor, "{}", message);
        self.store.append_history(self.clock.now_unix(), &self.actor, HistoryLevel::Error, message)?;
        Ok(())
    }
}
