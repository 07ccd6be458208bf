use std::sync::{Arc, Weak};

use serde_json::Value;
use termdeck_core::bridge_ipc::events;
use tracing::debug;

use crate::bridge::{Args, Bridge, BridgeError, Thrown};

/// `theme:changed(theme)` re-broadcasts the theme to every window, the
/// sender included.
pub(super) fn register(bridge: &Arc<Bridge>) -> Result<(), BridgeError> {
    let weak: Weak<Bridge> = Arc::downgrade(bridge);
    bridge.handle(events::THEME_CHANGED, move |args: Args| {
        let bridge = weak.clone();
        async move {
            let theme: Value = args.get(0)?;
            let delivered = match bridge.upgrade() {
                Some(bridge) => bridge.send(events::THEME_CHANGED, vec![theme]),
                None => 0,
            };
            debug!(event = "theme_broadcast", windows = delivered);
            Ok::<_, Thrown>(())
        }
    })
}
