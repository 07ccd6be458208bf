use chrono::{DateTime, Utc};
use termdeck_core::{
    Alert, AlertSeverity, AlertThresholds, AlertType, BufferStatus, GlobalStats, MetricSample,
    MIB,
};

/// Every rule that fires for `sample`, in table order. Rules are independent.
pub fn evaluate_alerts(
    sample: &MetricSample,
    thresholds: &AlertThresholds,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut fired = Vec::new();
    let mut push = |alert_type, severity, message: String| {
        fired.push(Alert {
            terminal_id: sample.terminal_id.clone(),
            alert_type,
            severity,
            message,
            timestamp: now,
        });
    };

    let memory = sample.system_metrics.memory_usage;
    if memory >= thresholds.memory_critical_bytes {
        push(
            AlertType::Memory,
            AlertSeverity::High,
            format!("Critical memory usage: {}", format_mib(memory)),
        );
    } else if memory >= thresholds.memory_warning_bytes {
        push(
            AlertType::Memory,
            AlertSeverity::Medium,
            format!("High memory usage: {}", format_mib(memory)),
        );
    }

    let health = &sample.buffer_health;
    let latency = health.average_latency_ms;
    if latency >= thresholds.latency_critical_ms {
        push(
            AlertType::Latency,
            AlertSeverity::High,
            format!("Critical buffer latency: {latency:.1}ms"),
        );
    } else if latency >= thresholds.latency_warning_ms {
        push(
            AlertType::Latency,
            AlertSeverity::Medium,
            format!("High buffer latency: {latency:.1}ms"),
        );
    }

    if health.utilization_percent >= thresholds.buffer_utilization_critical_percent {
        push(
            AlertType::Buffer,
            AlertSeverity::High,
            format!(
                "Buffer utilization critical: {:.1}%",
                health.utilization_percent
            ),
        );
    }
    if health.dropped_chunks_percent >= thresholds.dropped_chunks_critical_percent {
        push(
            AlertType::Buffer,
            AlertSeverity::High,
            format!("Dropped chunks: {:.1}%", health.dropped_chunks_percent),
        );
    }

    fired
}

fn format_mib(bytes: u64) -> String {
    format!("{:.1}MB", bytes as f64 / MIB as f64)
}

/// Projects the latest sample of each terminal into aggregate stats.
pub fn global_stats<'a>(
    total_terminals: usize,
    latest: impl IntoIterator<Item = &'a MetricSample>,
    alert_count: usize,
) -> GlobalStats {
    let mut stats = GlobalStats {
        total_terminals,
        alert_count,
        ..GlobalStats::default()
    };
    let mut latency_sum = 0.0;
    let mut sampled = 0usize;
    for sample in latest {
        sampled += 1;
        if sample.system_metrics.is_running {
            stats.active_terminals += 1;
        }
        stats.total_memory_usage += sample.system_metrics.memory_usage;
        latency_sum += sample.buffer_health.average_latency_ms;
        match sample.buffer_health.status {
            BufferStatus::Healthy => stats.healthy_terminals += 1,
            BufferStatus::Warning => stats.warning_terminals += 1,
            BufferStatus::Critical => stats.critical_terminals += 1,
        }
    }
    if sampled > 0 {
        stats.average_latency = latency_sum / sampled as f64;
    }
    stats
}
