use std::path::PathBuf;
use std::sync::Arc;

use super::HostContext;
use crate::bridge::{Args, Bridge, BridgeError, Thrown};
use crate::system_terminal::{LogLevel, SystemTerminalConfigPatch};

pub(super) fn register(bridge: &Bridge, ctx: &HostContext) -> Result<(), BridgeError> {
    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:initialize", move |_args: Args| {
        let manager = Arc::clone(&manager);
        async move { Ok::<_, Thrown>(manager.initialize()) }
    })?;

    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:log", move |args: Args| {
        let manager = Arc::clone(&manager);
        async move {
            let id: String = args.get(0)?;
            let level: LogLevel = args.get(1)?;
            let message: String = args.get(2)?;
            Ok::<_, Thrown>(manager.log(&id, level, &message))
        }
    })?;

    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:git-operation", move |args: Args| {
        let manager = Arc::clone(&manager);
        async move {
            let id: String = args.get(0)?;
            let cwd: PathBuf = args.get(1)?;
            let git_args: Vec<String> = args.get(2)?;
            Ok::<_, Thrown>(manager.git_operation(&id, &cwd, &git_args).await?)
        }
    })?;

    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:get", move |args: Args| {
        let manager = Arc::clone(&manager);
        async move {
            let id: String = args.get(0)?;
            Ok::<_, Thrown>(manager.get(&id))
        }
    })?;

    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:list", move |_args: Args| {
        let manager = Arc::clone(&manager);
        async move { Ok::<_, Thrown>(manager.list()) }
    })?;

    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:set-active", move |args: Args| {
        let manager = Arc::clone(&manager);
        async move {
            let id: String = args.get(0)?;
            manager.set_active(&id)?;
            Ok::<_, Thrown>(())
        }
    })?;

    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:clear", move |args: Args| {
        let manager = Arc::clone(&manager);
        async move {
            let id: String = args.get(0)?;
            manager.clear(&id)?;
            Ok::<_, Thrown>(())
        }
    })?;

    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:get-lines", move |args: Args| {
        let manager = Arc::clone(&manager);
        async move {
            let id: String = args.get(0)?;
            let offset: Option<usize> = args.get(1)?;
            let limit: Option<usize> = args.get(2)?;
            Ok::<_, Thrown>(manager.get_lines(&id, offset.unwrap_or(0), limit)?)
        }
    })?;

    let manager = Arc::clone(&ctx.system_terminals);
    bridge.handle("system-terminal:update-config", move |args: Args| {
        let manager = Arc::clone(&manager);
        async move {
            let patch: Option<SystemTerminalConfigPatch> = args.get(0)?;
            Ok::<_, Thrown>(manager.update_config(&patch.unwrap_or_default()))
        }
    })?;

    Ok(())
}
