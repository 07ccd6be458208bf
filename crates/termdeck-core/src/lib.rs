pub mod bridge_ipc;
pub mod telemetry;
pub mod terminal;

pub use telemetry::{
    Alert, AlertSeverity, AlertThresholds, AlertType, BufferHealth, BufferStatus, BufferTelemetry,
    GlobalStats, MetricSample, MonitorConfig, MonitorConfigPatch, MonitoredTerminal,
    SystemMetrics, ThresholdsPatch, DEFAULT_MONITORING_INTERVAL_MS, MIB,
};
pub use terminal::{
    BackendCapabilities, BackendKind, ExitInfo, KillSignal, Reliability, SpawnOptions,
    TerminalId,
};
