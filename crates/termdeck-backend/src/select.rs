use std::sync::Arc;

use termdeck_core::{BackendKind, SpawnOptions};
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::SpawnError;
use crate::native::NativePtyBackend;
use crate::process::BackendProcess;
use crate::subprocess::SubprocessBackend;
use crate::TerminalBackend;

/// Picks the backend for each new terminal: the preferred one when its
/// self-test passes, otherwise the fallback.
pub struct BackendSelector {
    preferred: Arc<dyn TerminalBackend>,
    fallback: Arc<dyn TerminalBackend>,
    preferred_available: OnceCell<bool>,
}

impl BackendSelector {
    pub fn new(preferred: Arc<dyn TerminalBackend>, fallback: Arc<dyn TerminalBackend>) -> Self {
        Self {
            preferred,
            fallback,
            preferred_available: OnceCell::new(),
        }
    }

    /// Native PTY preferred, subprocess fallback.
    pub fn platform_default(queue_capacity: usize) -> Self {
        Self::new(
            Arc::new(NativePtyBackend::new().with_queue_capacity(queue_capacity)),
            Arc::new(SubprocessBackend::new().with_queue_capacity(queue_capacity)),
        )
    }

    /// The preferred backend's probe runs once; its result is reused.
    pub async fn select(&self) -> Arc<dyn TerminalBackend> {
        let available = *self
            .preferred_available
            .get_or_init(|| async {
                let available = self.preferred.is_available().await;
                info!(
                    event = "backend_probe",
                    backend = %self.preferred.kind(),
                    available
                );
                available
            })
            .await;
        if available {
            Arc::clone(&self.preferred)
        } else {
            Arc::clone(&self.fallback)
        }
    }

    pub async fn spawn_with_fallback(
        &self,
        options: &SpawnOptions,
    ) -> Result<BackendProcess, SpawnError> {
        let chosen = self.select().await;
        match chosen.spawn(options).await {
            Ok(process) => Ok(process),
            Err(err) if chosen.kind() != self.fallback.kind() => {
                warn!(
                    event = "pty_spawn_failed",
                    backend = %chosen.kind(),
                    error = %err,
                    "falling back to {}",
                    self.fallback.kind()
                );
                self.fallback.spawn(options).await
            }
            Err(err) => Err(err),
        }
    }
}
