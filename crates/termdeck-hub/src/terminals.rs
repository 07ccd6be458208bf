use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use termdeck_backend::{BackendProcess, BackendSelector, SpawnError};
use termdeck_core::bridge_ipc::events;
use termdeck_core::terminal::new_terminal_id;
use termdeck_core::{
    BackendCapabilities, BackendKind, KillSignal, MonitoredTerminal, SpawnOptions, TerminalId,
};
use termdeck_monitor::PerformanceMonitor;
use thiserror::Error;
use tracing::{info, warn};

use crate::bridge::Bridge;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("Unknown terminal {0}")]
    UnknownTerminal(TerminalId),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("terminal io failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    pub id: TerminalId,
    pub pid: u32,
    pub backend: BackendKind,
    pub capabilities: BackendCapabilities,
    pub running: bool,
    pub created_at: DateTime<Utc>,
}

struct TerminalSession {
    process: Arc<BackendProcess>,
    created_at: DateTime<Utc>,
}

impl TerminalSession {
    fn info(&self, id: &str) -> TerminalInfo {
        TerminalInfo {
            id: id.to_string(),
            pid: self.process.pid(),
            backend: self.process.kind(),
            capabilities: self.process.capabilities(),
            running: self.process.is_running(),
            created_at: self.created_at,
        }
    }
}

/// Live terminals of the host, keyed by id. Process output is forwarded to
/// every window and each terminal is tracked by the monitor until it exits.
pub struct TerminalRegistry {
    selector: BackendSelector,
    monitor: PerformanceMonitor,
    bridge: Arc<Bridge>,
    sessions: StdMutex<HashMap<TerminalId, TerminalSession>>,
}

impl TerminalRegistry {
    pub fn new(
        selector: BackendSelector,
        monitor: PerformanceMonitor,
        bridge: Arc<Bridge>,
    ) -> Arc<Self> {
        Arc::new(Self {
            selector,
            monitor,
            bridge,
            sessions: StdMutex::new(HashMap::new()),
        })
    }

    pub async fn create(self: &Arc<Self>, options: SpawnOptions) -> Result<TerminalInfo, TerminalError> {
        let process = Arc::new(self.selector.spawn_with_fallback(&options).await?);
        let id = new_terminal_id();

        let bridge = Arc::clone(&self.bridge);
        let data_id = id.clone();
        process.on_data(move |text| {
            bridge.send(events::TERMINAL_DATA, vec![json!(data_id), json!(text)]);
        });
        let bridge = Arc::clone(&self.bridge);
        let error_id = id.clone();
        process.on_error(move |message| {
            bridge.send(events::TERMINAL_ERROR, vec![json!(error_id), json!(message)]);
        });
        let registry: Weak<Self> = Arc::downgrade(self);
        let exit_id = id.clone();
        process.on_exit(move |exit| {
            if let Some(registry) = registry.upgrade() {
                registry.forget(&exit_id);
                registry
                    .bridge
                    .send(events::TERMINAL_EXIT, vec![json!(exit_id), json!(exit)]);
            }
        });

        let monitored: Arc<dyn MonitoredTerminal> = process.clone();
        if let Err(err) = self
            .monitor
            .register_terminal(id.clone(), monitored, process.kind().as_str())
        {
            warn!(event = "terminal_monitor_register_failed", terminal_id = %id, error = %err);
        }

        let session = TerminalSession {
            process: Arc::clone(&process),
            created_at: Utc::now(),
        };
        let info = session.info(&id);
        self.lock_sessions().insert(id.clone(), session);
        process.resume();

        info!(
            event = "terminal_created",
            terminal_id = %id,
            pid = info.pid,
            backend = %info.backend
        );
        Ok(info)
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<TerminalId, TerminalSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn process(&self, id: &str) -> Result<Arc<BackendProcess>, TerminalError> {
        self.lock_sessions()
            .get(id)
            .map(|session| Arc::clone(&session.process))
            .ok_or_else(|| TerminalError::UnknownTerminal(id.to_string()))
    }

    fn forget(&self, id: &str) {
        let removed = self.lock_sessions().remove(id).is_some();
        self.monitor.unregister_terminal(id);
        if removed {
            info!(event = "terminal_removed", terminal_id = %id);
        }
    }

    pub fn input(&self, id: &str, data: &str) -> Result<(), TerminalError> {
        self.process(id)?.write(data)?;
        Ok(())
    }

    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> Result<(), TerminalError> {
        self.process(id)?.resize(cols, rows);
        Ok(())
    }

    pub fn kill(&self, id: &str, signal: KillSignal) -> Result<(), TerminalError> {
        self.process(id)?.kill(signal)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TerminalInfo> {
        self.lock_sessions().get(id).map(|session| session.info(id))
    }

    pub fn recent_output(&self, id: &str) -> Result<String, TerminalError> {
        Ok(self.process(id)?.recent_output())
    }

    pub fn list(&self) -> Vec<TerminalInfo> {
        let mut infos: Vec<TerminalInfo> = self
            .lock_sessions()
            .iter()
            .map(|(id, session)| session.info(id))
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    /// Terminates every live terminal; used on host shutdown.
    pub fn kill_all(&self) {
        let processes: Vec<(TerminalId, Arc<BackendProcess>)> = self
            .lock_sessions()
            .iter()
            .map(|(id, session)| (id.clone(), Arc::clone(&session.process)))
            .collect();
        for (id, process) in processes {
            if let Err(err) = process.kill(KillSignal::Terminate) {
                warn!(event = "terminal_kill_failed", terminal_id = %id, error = %err);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use termdeck_backend::SubprocessBackend;
    use termdeck_core::bridge_ipc::{BridgeFrame, BridgeMsg};
    use termdeck_core::MonitorConfig;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn registry() -> (Arc<TerminalRegistry>, PerformanceMonitor, mpsc::Receiver<BridgeFrame>) {
        let bridge = Arc::new(Bridge::default());
        let (tx, rx) = mpsc::channel(256);
        bridge.attach_window(tx);
        let selector = BackendSelector::new(
            Arc::new(SubprocessBackend::new()),
            Arc::new(SubprocessBackend::new()),
        );
        let monitor = PerformanceMonitor::new(MonitorConfig::default());
        let registry = TerminalRegistry::new(selector, monitor.clone(), bridge);
        (registry, monitor, rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<BridgeFrame>, wanted: &str) -> Vec<serde_json::Value> {
        timeout(Duration::from_secs(5), async {
            loop {
                let frame = rx.recv().await.expect("window open");
                if let BridgeMsg::Event { name, payload } = frame.msg {
                    if name == wanted {
                        return payload;
                    }
                }
            }
        })
        .await
        .expect("event in time")
    }

    #[tokio::test]
    async fn output_and_exit_are_broadcast_then_terminal_is_dropped() {
        let (registry, monitor, mut rx) = registry();
        let options = SpawnOptions::default()
            .with_shell("sh")
            .with_args(["-c", "echo hi"]);
        let info = registry.create(options).await.expect("create");
        assert_eq!(info.backend, BackendKind::Subprocess);
        assert!(!info.capabilities.supports_resize);

        let data = next_event(&mut rx, events::TERMINAL_DATA).await;
        assert_eq!(data[0], json!(info.id));
        assert_eq!(data[1], json!("hi\n"));

        let exit = next_event(&mut rx, events::TERMINAL_EXIT).await;
        assert_eq!(exit[1]["code"], json!(0));
        assert!(registry.get(&info.id).is_none());
        assert!(monitor.get_terminal_metrics(&info.id).is_empty());
        assert!(!monitor.is_monitoring());
    }

    #[tokio::test]
    async fn interactive_input_round_trips() {
        let (registry, monitor, mut rx) = registry();
        let info = registry
            .create(SpawnOptions::default().with_shell("cat"))
            .await
            .expect("create");
        assert!(monitor.is_monitoring());
        assert_eq!(registry.list().len(), 1);

        registry.input(&info.id, "hello\n").expect("input");
        let data = next_event(&mut rx, events::TERMINAL_DATA).await;
        assert_eq!(data[1], json!("hello\n"));

        registry.resize(&info.id, 120, 40).expect("resize is a no-op");
        registry.kill(&info.id, KillSignal::Terminate).expect("kill");
        next_event(&mut rx, events::TERMINAL_EXIT).await;
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn unknown_terminal_is_reported() {
        let (registry, _monitor, _rx) = registry();
        assert!(matches!(
            registry.input("term-missing", "x"),
            Err(TerminalError::UnknownTerminal(_))
        ));
    }
}
