use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::HostContext;
use crate::bridge::{Args, Bridge, BridgeError, Thrown};

/// Source of the "open project" folder picker.
#[async_trait]
pub trait DialogProvider: Send + Sync {
    /// The chosen directory, or `None` when the user cancelled.
    async fn pick_project_dir(&self) -> Option<PathBuf>;
}

/// Provider for hosts without a native dialog; always cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessDialog;

#[async_trait]
impl DialogProvider for HeadlessDialog {
    async fn pick_project_dir(&self) -> Option<PathBuf> {
        None
    }
}

pub(super) fn register(bridge: &Bridge, ctx: &HostContext) -> Result<(), BridgeError> {
    let dialogs = Arc::clone(&ctx.dialogs);
    bridge.handle("project:open-dialog", move |_args: Args| {
        let dialogs = Arc::clone(&dialogs);
        async move {
            let picked = dialogs
                .pick_project_dir()
                .await
                .map(|dir| dir.to_string_lossy().to_string());
            info!(event = "project_dialog_closed", picked = picked.is_some());
            Ok::<_, Thrown>(picked)
        }
    })
}
