use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::terminal::TerminalId;

pub const MIB: u64 = 1024 * 1024;
pub const DEFAULT_MONITORING_INTERVAL_MS: u64 = 5_000;

const BUFFER_WARNING_UTILIZATION: f64 = 60.0;
const BUFFER_CRITICAL_UTILIZATION: f64 = 90.0;
const BUFFER_WARNING_LATENCY_MS: f64 = 50.0;
const BUFFER_CRITICAL_DROPPED: f64 = 5.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BufferStatus {
    Healthy,
    Warning,
    Critical,
}

impl BufferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferStatus::Healthy => "healthy",
            BufferStatus::Warning => "warning",
            BufferStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BufferHealth {
    pub status: BufferStatus,
    pub utilization_percent: f64,
    pub average_latency_ms: f64,
    pub dropped_chunks_percent: f64,
}

impl Default for BufferHealth {
    fn default() -> Self {
        Self {
            status: BufferStatus::Healthy,
            utilization_percent: 0.0,
            average_latency_ms: 0.0,
            dropped_chunks_percent: 0.0,
        }
    }
}

impl BufferHealth {
    /// Builds a reading and derives its status from the raw counters.
    pub fn from_counters(
        utilization_percent: f64,
        average_latency_ms: f64,
        dropped_chunks_percent: f64,
    ) -> Self {
        let status = if utilization_percent >= BUFFER_CRITICAL_UTILIZATION
            || dropped_chunks_percent >= BUFFER_CRITICAL_DROPPED
        {
            BufferStatus::Critical
        } else if utilization_percent >= BUFFER_WARNING_UTILIZATION
            || average_latency_ms >= BUFFER_WARNING_LATENCY_MS
        {
            BufferStatus::Warning
        } else {
            BufferStatus::Healthy
        };
        Self {
            status,
            utilization_percent,
            average_latency_ms,
            dropped_chunks_percent,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// Resident memory of the terminal process, in bytes.
    pub memory_usage: u64,
    pub cpu_usage: f32,
    pub pid: Option<u32>,
    pub is_running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSample {
    pub terminal_id: TerminalId,
    pub timestamp: DateTime<Utc>,
    pub strategy: String,
    pub buffer_health: BufferHealth,
    pub system_metrics: SystemMetrics,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Memory,
    Latency,
    Buffer,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertType::Memory => "memory",
            AlertType::Latency => "latency",
            AlertType::Buffer => "buffer",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub terminal_id: TerminalId,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub total_terminals: usize,
    pub active_terminals: usize,
    pub total_memory_usage: u64,
    pub average_latency: f64,
    pub healthy_terminals: usize,
    pub warning_terminals: usize,
    pub critical_terminals: usize,
    pub alert_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertThresholds {
    pub memory_warning_bytes: u64,
    pub memory_critical_bytes: u64,
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub buffer_utilization_critical_percent: f64,
    pub dropped_chunks_critical_percent: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            memory_warning_bytes: 50 * MIB,
            memory_critical_bytes: 100 * MIB,
            latency_warning_ms: 50.0,
            latency_critical_ms: 100.0,
            buffer_utilization_critical_percent: 80.0,
            dropped_chunks_critical_percent: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    pub monitoring_interval_ms: u64,
    pub max_metrics_history: usize,
    pub max_alerts_history: usize,
    pub thresholds: AlertThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_ms: DEFAULT_MONITORING_INTERVAL_MS,
            max_metrics_history: 100,
            max_alerts_history: 50,
            thresholds: AlertThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsPatch {
    #[serde(default)]
    pub memory_warning_bytes: Option<u64>,
    #[serde(default)]
    pub memory_critical_bytes: Option<u64>,
    #[serde(default)]
    pub latency_warning_ms: Option<f64>,
    #[serde(default)]
    pub latency_critical_ms: Option<f64>,
    #[serde(default)]
    pub buffer_utilization_critical_percent: Option<f64>,
    #[serde(default)]
    pub dropped_chunks_critical_percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfigPatch {
    #[serde(default)]
    pub monitoring_interval_ms: Option<u64>,
    #[serde(default)]
    pub max_metrics_history: Option<usize>,
    #[serde(default)]
    pub max_alerts_history: Option<usize>,
    #[serde(default)]
    pub thresholds: Option<ThresholdsPatch>,
}

impl MonitorConfig {
    /// Returns a new config with every field present in `patch` replaced.
    pub fn merged(&self, patch: &MonitorConfigPatch) -> MonitorConfig {
        let thresholds = match &patch.thresholds {
            Some(t) => AlertThresholds {
                memory_warning_bytes: t
                    .memory_warning_bytes
                    .unwrap_or(self.thresholds.memory_warning_bytes),
                memory_critical_bytes: t
                    .memory_critical_bytes
                    .unwrap_or(self.thresholds.memory_critical_bytes),
                latency_warning_ms: t
                    .latency_warning_ms
                    .unwrap_or(self.thresholds.latency_warning_ms),
                latency_critical_ms: t
                    .latency_critical_ms
                    .unwrap_or(self.thresholds.latency_critical_ms),
                buffer_utilization_critical_percent: t
                    .buffer_utilization_critical_percent
                    .unwrap_or(self.thresholds.buffer_utilization_critical_percent),
                dropped_chunks_critical_percent: t
                    .dropped_chunks_critical_percent
                    .unwrap_or(self.thresholds.dropped_chunks_critical_percent),
            },
            None => self.thresholds,
        };
        MonitorConfig {
            monitoring_interval_ms: patch
                .monitoring_interval_ms
                .unwrap_or(self.monitoring_interval_ms)
                .max(1),
            max_metrics_history: patch
                .max_metrics_history
                .unwrap_or(self.max_metrics_history),
            max_alerts_history: patch.max_alerts_history.unwrap_or(self.max_alerts_history),
            thresholds,
        }
    }
}

/// Optional telemetry extension for terminals that track their output buffer.
pub trait BufferTelemetry: Send + Sync {
    fn buffer_health(&self) -> BufferHealth;
}

/// A live terminal as seen by the performance monitor.
pub trait MonitoredTerminal: Send + Sync {
    fn pid(&self) -> Option<u32>;

    fn is_running(&self) -> bool;

    fn buffer_telemetry(&self) -> Option<&dyn BufferTelemetry> {
        None
    }
}
