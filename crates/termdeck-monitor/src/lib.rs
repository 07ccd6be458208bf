//! Per-terminal performance monitoring: periodic sampling, bounded metric and
//! alert history, threshold alerts and aggregate stats.

mod alerts;
mod error;
mod monitor;
mod probe;

pub use alerts::{evaluate_alerts, global_stats};
pub use error::{MetricCollectionError, MonitorError};
pub use monitor::{MonitorEvent, MonitorExport, MonitorSubscription, PerformanceMonitor};
pub use probe::{ResourceProbe, ResourceUsage, SysinfoProbe};
