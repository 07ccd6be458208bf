//! Terminal backends: a uniform contract over native pseudo-terminals and a
//! piped subprocess fallback.

mod error;
mod events;
mod native;
pub mod platform;
mod process;
mod select;
mod subprocess;

use async_trait::async_trait;
use termdeck_core::{BackendCapabilities, BackendKind, SpawnOptions};

pub use error::{ConfigParseError, SpawnError};
pub use events::Subscription;
pub use native::NativePtyBackend;
pub use process::{BackendProcess, DEFAULT_QUEUE_CAPACITY, RECENT_OUTPUT_BYTES};
pub use select::BackendSelector;
pub use subprocess::SubprocessBackend;

#[async_trait]
pub trait TerminalBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::for_kind(self.kind())
    }

    /// Self-test: spawns a trivial command and kills it again. Never fails;
    /// any error reads as unavailable.
    async fn is_available(&self) -> bool;

    /// Returns once the OS has created the process. The returned process
    /// always has a pid.
    async fn spawn(&self, options: &SpawnOptions) -> Result<BackendProcess, SpawnError>;
}
