use klutch_core::Trigger;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub mod config_map;
pub mod web_hook;

/// Capacity of the shared trigger channel. Sources never block on a full channel:
/// pending tokens already guarantee a sequence will start, further ones coalesce.
pub const TRIGGER_CHANNEL_CAPACITY: usize = 16;

/// Enqueue a trigger without blocking the source.
pub(crate) fn enqueue_trigger(triggers: &mpsc::Sender<Trigger>, source: &str) {
    match triggers.try_send(Trigger::new(source)) {
        Ok(()) => info!(source, "Triggering"),
        Err(mpsc::error::TrySendError::Full(_)) => {
            info!(source, "Trigger channel full, coalescing")
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            warn!(source, "Trigger channel closed, dropping trigger")
        }
    }
}
