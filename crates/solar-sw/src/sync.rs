//! Background sync and periodic refresh hooks.
//!
//! Neither hook does real work yet; they exist so the platform has something
//! to call and so failures stay contained to the task that raised them.

use tracing::info;

use crate::Result;

/// Tag of the one-off background sync the page registers.
pub const SYNC_DATA_TAG: &str = "sync-data";

/// Tag of the periodic content refresh.
pub const UPDATE_CONTENT_TAG: &str = "update-content";

/// What happened to a sync event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The hook for this tag ran to completion.
    Completed,
    /// The hook ran and failed; the error was logged.
    Failed(String),
    /// Unknown tag.
    Ignored,
}

/// Push locally queued data upstream.
pub async fn sync_data() -> Result<()> {
    info!("Syncing data...");
    Ok(())
}

/// Refresh site content in the background.
pub async fn update_content() -> Result<()> {
    info!("Updating content...");
    Ok(())
}
