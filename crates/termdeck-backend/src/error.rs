use termdeck_core::BackendKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("failed to open pty: {0}")]
    OpenPty(String),
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },
    #[error("process io setup failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("spawned process reported no pid")]
    MissingPid,
    #[error("{0} backend is unavailable on this platform")]
    Unavailable(BackendKind),
}

/// Malformed `major.minor.build` release string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed os release '{release}': {reason}")]
pub struct ConfigParseError {
    pub release: String,
    pub reason: String,
}

impl ConfigParseError {
    pub(crate) fn new(release: &str, reason: impl Into<String>) -> Self {
        Self {
            release: release.to_string(),
            reason: reason.into(),
        }
    }
}
