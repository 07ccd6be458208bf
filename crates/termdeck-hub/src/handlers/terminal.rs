use std::sync::Arc;

use termdeck_core::{KillSignal, SpawnOptions};

use super::HostContext;
use crate::bridge::{Args, Bridge, BridgeError, Thrown};

pub(super) fn register(bridge: &Bridge, ctx: &HostContext) -> Result<(), BridgeError> {
    let terminals = Arc::clone(&ctx.terminals);
    bridge.handle("terminal:create", move |args: Args| {
        let terminals = Arc::clone(&terminals);
        async move {
            let options: Option<SpawnOptions> = args.get(0)?;
            let info = terminals.create(options.unwrap_or_default()).await?;
            Ok::<_, Thrown>(info)
        }
    })?;

    let terminals = Arc::clone(&ctx.terminals);
    bridge.handle("terminal:input", move |args: Args| {
        let terminals = Arc::clone(&terminals);
        async move {
            let id: String = args.get(0)?;
            let data: String = args.get(1)?;
            terminals.input(&id, &data)?;
            Ok::<_, Thrown>(())
        }
    })?;

    let terminals = Arc::clone(&ctx.terminals);
    bridge.handle("terminal:resize", move |args: Args| {
        let terminals = Arc::clone(&terminals);
        async move {
            let id: String = args.get(0)?;
            let cols: u16 = args.get(1)?;
            let rows: u16 = args.get(2)?;
            terminals.resize(&id, cols, rows)?;
            Ok::<_, Thrown>(())
        }
    })?;

    let terminals = Arc::clone(&ctx.terminals);
    bridge.handle("terminal:kill", move |args: Args| {
        let terminals = Arc::clone(&terminals);
        async move {
            let id: String = args.get(0)?;
            let signal: Option<String> = args.get(1)?;
            let signal = match signal {
                Some(raw) => raw.parse::<KillSignal>().map_err(Thrown::msg)?,
                None => KillSignal::default(),
            };
            terminals.kill(&id, signal)?;
            Ok::<_, Thrown>(())
        }
    })?;

    let terminals = Arc::clone(&ctx.terminals);
    bridge.handle("terminal:recent-output", move |args: Args| {
        let terminals = Arc::clone(&terminals);
        async move {
            let id: String = args.get(0)?;
            Ok::<_, Thrown>(terminals.recent_output(&id)?)
        }
    })?;

    let terminals = Arc::clone(&ctx.terminals);
    bridge.handle("terminal:list", move |_args: Args| {
        let terminals = Arc::clone(&terminals);
        async move { Ok::<_, Thrown>(terminals.list()) }
    })?;

    Ok(())
}
