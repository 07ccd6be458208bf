//! Bridge operations the UI can invoke, grouped by surface.

mod fs;
mod git;
mod monitor;
mod project;
mod system_terminal;
mod terminal;
mod theme;

use std::sync::Arc;

use termdeck_monitor::PerformanceMonitor;

use crate::bridge::{Bridge, BridgeError};
use crate::system_terminal::SystemTerminalManager;
use crate::terminals::TerminalRegistry;

pub use fs::{DirEntryInfo, FileStat};
pub use project::{DialogProvider, HeadlessDialog};

/// Host services shared by every handler.
#[derive(Clone)]
pub struct HostContext {
    pub terminals: Arc<TerminalRegistry>,
    pub monitor: PerformanceMonitor,
    pub system_terminals: Arc<SystemTerminalManager>,
    pub dialogs: Arc<dyn DialogProvider>,
}

pub fn register_all(bridge: &Arc<Bridge>, ctx: &HostContext) -> Result<(), BridgeError> {
    terminal::register(bridge, ctx)?;
    theme::register(bridge)?;
    fs::register(bridge)?;
    git::register(bridge)?;
    project::register(bridge, ctx)?;
    system_terminal::register(bridge, ctx)?;
    monitor::register(bridge, ctx)?;
    Ok(())
}
