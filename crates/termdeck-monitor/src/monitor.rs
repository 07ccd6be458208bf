use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use termdeck_core::bridge_ipc::events;
use termdeck_core::{
    Alert, GlobalStats, MetricSample, MonitorConfig, MonitorConfigPatch, MonitoredTerminal,
    SystemMetrics, TerminalId,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alerts::{evaluate_alerts, global_stats};
use crate::error::{MetricCollectionError, MonitorError};
use crate::probe::{ResourceProbe, ResourceUsage, SysinfoProbe};

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    PerformanceUpdate(GlobalStats),
    Alert(Alert),
    MonitoringStarted,
    MonitoringStopped,
}

impl MonitorEvent {
    /// Bridge event name this event is broadcast under.
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::PerformanceUpdate(_) => events::PERFORMANCE_UPDATE,
            MonitorEvent::Alert(_) => events::ALERT,
            MonitorEvent::MonitoringStarted => events::MONITORING_STARTED,
            MonitorEvent::MonitoringStopped => events::MONITORING_STOPPED,
        }
    }
}

pub struct MonitorSubscription {
    id: u64,
    events: mpsc::UnboundedReceiver<MonitorEvent>,
}

impl MonitorSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MonitorEvent> {
        self.events.try_recv().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorExport {
    pub terminals: Vec<TerminalId>,
    pub metrics: BTreeMap<TerminalId, Vec<MetricSample>>,
    pub alerts: BTreeMap<TerminalId, Vec<Alert>>,
    pub global_stats: GlobalStats,
}

struct TrackedTerminal {
    terminal: Arc<dyn MonitoredTerminal>,
    strategy: String,
    metrics: VecDeque<MetricSample>,
    alerts: VecDeque<Alert>,
}

struct MonitorState {
    config: MonitorConfig,
    terminals: BTreeMap<TerminalId, TrackedTerminal>,
    /// Present while running; dropping or signalling it stops the timer.
    timer: Option<watch::Sender<bool>>,
}

impl MonitorState {
    fn stats(&self) -> GlobalStats {
        let alert_count = self.terminals.values().map(|t| t.alerts.len()).sum();
        global_stats(
            self.terminals.len(),
            self.terminals.values().filter_map(|t| t.metrics.back()),
            alert_count,
        )
    }
}

struct MonitorInner {
    state: StdMutex<MonitorState>,
    probe: StdMutex<Box<dyn ResourceProbe>>,
    listeners: StdMutex<HashMap<u64, mpsc::UnboundedSender<MonitorEvent>>>,
    next_listener: AtomicU64,
}

/// Per-terminal performance monitor.
///
/// Cloning yields another handle to the same monitor. The sampling timer runs
/// on the tokio runtime that was current when monitoring started; without a
/// runtime the monitor stays idle and `collect_metrics` can still be called
/// directly.
#[derive(Clone)]
pub struct PerformanceMonitor {
    inner: Arc<MonitorInner>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_probe(config, Box::new(SysinfoProbe::new()))
    }

    pub fn with_probe(config: MonitorConfig, probe: Box<dyn ResourceProbe>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                state: StdMutex::new(MonitorState {
                    config,
                    terminals: BTreeMap::new(),
                    timer: None,
                }),
                probe: StdMutex::new(probe),
                listeners: StdMutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> MonitorSubscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.insert(id, tx);
        }
        MonitorSubscription { id, events: rx }
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        match self.inner.listeners.lock() {
            Ok(mut listeners) => listeners.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    fn emit(&self, event: MonitorEvent) {
        let Ok(mut listeners) = self.inner.listeners.lock() else {
            return;
        };
        listeners.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn config(&self) -> MonitorConfig {
        self.state().config
    }

    pub fn is_monitoring(&self) -> bool {
        self.state().timer.is_some()
    }

    /// Returns `false` when already running or when no runtime is available.
    pub fn start_monitoring(&self) -> bool {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(event = "monitor_start_skipped", reason = "no tokio runtime");
                return false;
            }
        };
        let period = {
            let mut state = self.state();
            if state.timer.is_some() {
                return false;
            }
            let period = Duration::from_millis(state.config.monitoring_interval_ms.max(1));
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            state.timer = Some(shutdown_tx);
            runtime.spawn(run_timer(Arc::downgrade(&self.inner), period, shutdown_rx));
            period
        };
        info!(
            event = "monitoring_started",
            interval_ms = period.as_millis() as u64
        );
        self.emit(MonitorEvent::MonitoringStarted);
        true
    }

    /// Returns `false` when already idle.
    pub fn stop_monitoring(&self) -> bool {
        let timer = self.state().timer.take();
        let Some(timer) = timer else {
            return false;
        };
        let _ = timer.send(true);
        info!(event = "monitoring_stopped");
        self.emit(MonitorEvent::MonitoringStopped);
        true
    }

    pub fn register_terminal(
        &self,
        id: impl Into<TerminalId>,
        terminal: Arc<dyn MonitoredTerminal>,
        strategy: impl Into<String>,
    ) -> Result<(), MonitorError> {
        let id = id.into();
        let strategy = strategy.into();
        let first = {
            let mut state = self.state();
            if state.terminals.contains_key(&id) {
                return Err(MonitorError::AlreadyRegistered(id));
            }
            state.terminals.insert(
                id.clone(),
                TrackedTerminal {
                    terminal,
                    strategy: strategy.clone(),
                    metrics: VecDeque::new(),
                    alerts: VecDeque::new(),
                },
            );
            state.terminals.len() == 1 && state.timer.is_none()
        };
        info!(event = "terminal_registered", terminal_id = %id, strategy = %strategy);
        if first {
            self.start_monitoring();
        }
        Ok(())
    }

    pub fn unregister_terminal(&self, id: &str) -> bool {
        let (removed, now_empty) = {
            let mut state = self.state();
            let removed = state.terminals.remove(id).is_some();
            (removed, state.terminals.is_empty())
        };
        if removed {
            info!(event = "terminal_unregistered", terminal_id = %id);
        }
        if removed && now_empty {
            self.stop_monitoring();
        }
        removed
    }

    /// Samples every registered terminal once, records history, fires alerts
    /// and publishes the refreshed global stats.
    pub fn collect_metrics(&self) -> GlobalStats {
        let targets: Vec<(TerminalId, Arc<dyn MonitoredTerminal>, String)> = {
            let state = self.state();
            state
                .terminals
                .iter()
                .map(|(id, t)| (id.clone(), Arc::clone(&t.terminal), t.strategy.clone()))
                .collect()
        };

        let mut samples = Vec::with_capacity(targets.len());
        for (id, terminal, strategy) in targets {
            match self.sample_terminal(&id, terminal.as_ref(), strategy) {
                Ok(sample) => samples.push(sample),
                Err(err) => {
                    warn!(event = "metric_collection_failed", terminal_id = %id, error = %err)
                }
            }
        }

        let mut fired = Vec::new();
        let stats = {
            let mut state = self.state();
            let config = state.config;
            for sample in samples {
                let Some(tracked) = state.terminals.get_mut(&sample.terminal_id) else {
                    continue;
                };
                let alerts = evaluate_alerts(&sample, &config.thresholds, sample.timestamp);
                push_bounded(&mut tracked.metrics, sample, config.max_metrics_history);
                for alert in alerts {
                    push_bounded(&mut tracked.alerts, alert.clone(), config.max_alerts_history);
                    fired.push(alert);
                }
            }
            state.stats()
        };

        for alert in fired {
            warn!(
                event = "terminal_alert",
                terminal_id = %alert.terminal_id,
                kind = %alert.alert_type,
                severity = ?alert.severity,
                message = %alert.message
            );
            self.emit(MonitorEvent::Alert(alert));
        }
        debug!(
            event = "metrics_collected",
            terminals = stats.total_terminals,
            active = stats.active_terminals
        );
        self.emit(MonitorEvent::PerformanceUpdate(stats));
        stats
    }

    fn sample_terminal(
        &self,
        id: &str,
        terminal: &dyn MonitoredTerminal,
        strategy: String,
    ) -> Result<MetricSample, MetricCollectionError> {
        let (buffer_health, pid, is_running) = catch_unwind(AssertUnwindSafe(|| {
            let health = terminal
                .buffer_telemetry()
                .map(|telemetry| telemetry.buffer_health())
                .unwrap_or_default();
            (health, terminal.pid(), terminal.is_running())
        }))
        .map_err(|_| MetricCollectionError::Panicked(id.to_string()))?;

        let usage = match pid {
            Some(pid) => {
                let mut probe = self
                    .inner
                    .probe
                    .lock()
                    .map_err(|_| MetricCollectionError::Probe {
                        pid,
                        reason: "probe lock poisoned".to_string(),
                    })?;
                probe.sample(pid)?
            }
            None => ResourceUsage::default(),
        };

        Ok(MetricSample {
            terminal_id: id.to_string(),
            timestamp: Utc::now(),
            strategy,
            buffer_health,
            system_metrics: SystemMetrics {
                memory_usage: usage.memory_bytes,
                cpu_usage: usage.cpu_percent,
                pid,
                is_running,
            },
        })
    }

    /// Applies `patch`; a changed interval restarts a running timer.
    pub fn update_config(&self, patch: &MonitorConfigPatch) -> MonitorConfig {
        let (previous, next, running) = {
            let mut state = self.state();
            let previous = state.config;
            let next = previous.merged(patch);
            state.config = next;
            for tracked in state.terminals.values_mut() {
                truncate_front(&mut tracked.metrics, next.max_metrics_history);
                truncate_front(&mut tracked.alerts, next.max_alerts_history);
            }
            (previous, next, state.timer.is_some())
        };
        info!(
            event = "monitor_config_updated",
            interval_ms = next.monitoring_interval_ms,
            max_metrics = next.max_metrics_history,
            max_alerts = next.max_alerts_history
        );
        if running && previous.monitoring_interval_ms != next.monitoring_interval_ms {
            self.stop_monitoring();
            self.start_monitoring();
        }
        next
    }

    pub fn get_terminal_metrics(&self, id: &str) -> Vec<MetricSample> {
        self.state()
            .terminals
            .get(id)
            .map(|t| t.metrics.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_terminal_alerts(&self, id: &str) -> Vec<Alert> {
        self.state()
            .terminals
            .get(id)
            .map(|t| t.alerts.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn global_stats(&self) -> GlobalStats {
        self.state().stats()
    }

    pub fn export_data(&self) -> MonitorExport {
        let state = self.state();
        MonitorExport {
            terminals: state.terminals.keys().cloned().collect(),
            metrics: state
                .terminals
                .iter()
                .map(|(id, t)| (id.clone(), t.metrics.iter().cloned().collect()))
                .collect(),
            alerts: state
                .terminals
                .iter()
                .map(|(id, t)| (id.clone(), t.alerts.iter().cloned().collect()))
                .collect(),
            global_stats: state.stats(),
        }
    }

    /// Stops monitoring, then drops every listener and all tracked state.
    pub fn destroy(&self) {
        self.stop_monitoring();
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.clear();
        }
        self.state().terminals.clear();
        info!(event = "monitor_destroyed");
    }
}

fn push_bounded<T>(history: &mut VecDeque<T>, item: T, capacity: usize) {
    history.push_back(item);
    truncate_front(history, capacity);
}

fn truncate_front<T>(history: &mut VecDeque<T>, capacity: usize) {
    while history.len() > capacity {
        history.pop_front();
    }
}

async fn run_timer(
    inner: Weak<MonitorInner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                // Process sampling blocks on the OS; keep it off the runtime.
                let monitor = PerformanceMonitor { inner };
                let collected =
                    tokio::task::spawn_blocking(move || monitor.collect_metrics()).await;
                if let Err(err) = collected {
                    warn!(event = "metric_collection_task_failed", error = %err);
                }
            }
        }
    }
    debug!(event = "monitor_timer_exit");
}
