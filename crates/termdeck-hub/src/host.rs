use std::io;
use std::sync::Arc;

use serde_json::Value;
use termdeck_backend::BackendSelector;
use termdeck_core::MonitorConfig;
use termdeck_monitor::{MonitorEvent, PerformanceMonitor};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bridge::{Bridge, BridgeError};
use crate::handlers::{self, DialogProvider, HostContext};
use crate::system_terminal::{SystemTerminalConfig, SystemTerminalManager};
use crate::terminals::TerminalRegistry;
use crate::transport::{self, TransportConfig};

#[derive(Clone, Debug)]
pub struct HostConfig {
    pub channel: String,
    pub monitor: MonitorConfig,
    pub system_terminal: SystemTerminalConfig,
    /// Output queue capacity of each spawned terminal.
    pub backend_queue_capacity: usize,
    pub transport: TransportConfig,
}

/// All host services for one bridge channel.
pub struct Host {
    config: HostConfig,
    bridge: Arc<Bridge>,
    context: HostContext,
    forwarder: JoinHandle<()>,
}

impl Host {
    /// Builds every service and registers every bridge operation. Must be
    /// called inside a tokio runtime.
    pub fn new(config: HostConfig, dialogs: Arc<dyn DialogProvider>) -> Result<Self, BridgeError> {
        Self::with_selector(
            config.clone(),
            BackendSelector::platform_default(config.backend_queue_capacity),
            dialogs,
        )
    }

    pub fn with_selector(
        config: HostConfig,
        selector: BackendSelector,
        dialogs: Arc<dyn DialogProvider>,
    ) -> Result<Self, BridgeError> {
        let bridge = Arc::new(Bridge::new(config.channel.clone()));
        let monitor = PerformanceMonitor::new(config.monitor);
        let terminals = TerminalRegistry::new(selector, monitor.clone(), Arc::clone(&bridge));
        let system_terminals = Arc::new(SystemTerminalManager::new(
            Arc::clone(&bridge),
            config.system_terminal.clone(),
        ));
        let context = HostContext {
            terminals,
            monitor: monitor.clone(),
            system_terminals,
            dialogs,
        };
        handlers::register_all(&bridge, &context)?;
        let forwarder = spawn_monitor_forwarder(&monitor, Arc::clone(&bridge));
        Ok(Self {
            config,
            bridge,
            context,
            forwarder,
        })
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    pub fn context(&self) -> &HostContext {
        &self.context
    }

    /// Serves the bridge socket until `shutdown` flips, then kills every
    /// terminal and tears the monitor down.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let served = transport::serve(
            Arc::clone(&self.bridge),
            self.config.transport.clone(),
            shutdown,
        )
        .await;
        self.shutdown();
        served
    }

    pub fn shutdown(&self) {
        self.context.terminals.kill_all();
        self.context.monitor.destroy();
        self.forwarder.abort();
        info!(event = "host_shutdown", channel = %self.config.channel);
    }
}

/// Re-broadcasts monitor events to every window.
fn spawn_monitor_forwarder(monitor: &PerformanceMonitor, bridge: Arc<Bridge>) -> JoinHandle<()> {
    let mut subscription = monitor.subscribe();
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let payload = match monitor_event_payload(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(event = "monitor_event_encode_failed", name = event.name(), error = %err);
                    continue;
                }
            };
            bridge.send(event.name(), payload);
        }
    })
}

fn monitor_event_payload(event: &MonitorEvent) -> Result<Vec<Value>, serde_json::Error> {
    Ok(match event {
        MonitorEvent::PerformanceUpdate(stats) => vec![serde_json::to_value(stats)?],
        MonitorEvent::Alert(alert) => vec![serde_json::to_value(alert)?],
        MonitorEvent::MonitoringStarted | MonitorEvent::MonitoringStopped => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use termdeck_core::{Alert, AlertSeverity, AlertType, GlobalStats};

    #[test]
    fn monitor_events_map_to_bridge_payloads() {
        let stats = GlobalStats {
            total_terminals: 2,
            ..GlobalStats::default()
        };
        let payload = monitor_event_payload(&MonitorEvent::PerformanceUpdate(stats)).expect("encode");
        assert_eq!(payload[0]["totalTerminals"], json!(2));

        let alert = Alert {
            terminal_id: "term-a".to_string(),
            alert_type: AlertType::Memory,
            severity: AlertSeverity::High,
            message: "Critical memory usage: 120.0MB".to_string(),
            timestamp: Utc::now(),
        };
        let payload = monitor_event_payload(&MonitorEvent::Alert(alert)).expect("encode");
        assert_eq!(payload[0]["type"], json!("memory"));
        assert_eq!(payload[0]["severity"], json!("high"));

        assert!(monitor_event_payload(&MonitorEvent::MonitoringStopped)
            .expect("encode")
            .is_empty());
    }
}
