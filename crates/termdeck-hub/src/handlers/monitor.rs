use termdeck_core::MonitorConfigPatch;

use super::HostContext;
use crate::bridge::{Args, Bridge, BridgeError, Thrown};

pub(super) fn register(bridge: &Bridge, ctx: &HostContext) -> Result<(), BridgeError> {
    let monitor = ctx.monitor.clone();
    bridge.handle("monitor:stats", move |_args: Args| {
        let monitor = monitor.clone();
        async move { Ok::<_, Thrown>(monitor.global_stats()) }
    })?;

    let monitor = ctx.monitor.clone();
    bridge.handle("monitor:export", move |_args: Args| {
        let monitor = monitor.clone();
        async move { Ok::<_, Thrown>(monitor.export_data()) }
    })?;

    let monitor = ctx.monitor.clone();
    bridge.handle("monitor:update-config", move |args: Args| {
        let monitor = monitor.clone();
        async move {
            let patch: Option<MonitorConfigPatch> = args.get(0)?;
            Ok::<_, Thrown>(monitor.update_config(&patch.unwrap_or_default()))
        }
    })?;

    let monitor = ctx.monitor.clone();
    bridge.handle("monitor:terminal-metrics", move |args: Args| {
        let monitor = monitor.clone();
        async move {
            let id: String = args.get(0)?;
            Ok::<_, Thrown>(monitor.get_terminal_metrics(&id))
        }
    })?;

    let monitor = ctx.monitor.clone();
    bridge.handle("monitor:terminal-alerts", move |args: Args| {
        let monitor = monitor.clone();
        async move {
            let id: String = args.get(0)?;
            Ok::<_, Thrown>(monitor.get_terminal_alerts(&id))
        }
    })?;

    Ok(())
}
