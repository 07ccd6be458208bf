use termdeck_core::TerminalId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("terminal {0} is already registered")]
    AlreadyRegistered(TerminalId),
}

/// Failure to sample one terminal in one cycle. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetricCollectionError {
    #[error("resource probe failed for pid {pid}: {reason}")]
    Probe { pid: u32, reason: String },
    #[error("telemetry of terminal {0} panicked")]
    Panicked(TerminalId),
}
