use std::path::PathBuf;

use crate::bridge::{Args, Bridge, BridgeError, Thrown};
use crate::git;

pub(super) fn register(bridge: &Bridge) -> Result<(), BridgeError> {
    bridge.handle("git:status", |args: Args| async move {
        let cwd: PathBuf = args.get(0)?;
        Ok::<_, Thrown>(git::status(&cwd).await?)
    })?;
    bridge.handle("git:diff", |args: Args| async move {
        let cwd: PathBuf = args.get(0)?;
        let path: Option<String> = args.get(1)?;
        Ok::<_, Thrown>(git::diff(&cwd, path.as_deref()).await?)
    })?;
    Ok(())
}
