use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use termdeck_core::{
    BackendCapabilities, BackendKind, BufferHealth, BufferTelemetry, ExitInfo, KillSignal,
    MonitoredTerminal,
};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::{ListenerSet, Subscription};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const RECENT_OUTPUT_BYTES: usize = 64 * 1024;
const LATENCY_WINDOW: usize = 64;

/// OS-facing half of a process: the part each backend provides.
pub(crate) trait ProcessControl: Send + Sync {
    fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Returns `false` when the backend cannot resize.
    fn resize(&self, cols: u16, rows: u16) -> io::Result<bool>;

    fn kill(&self, signal: KillSignal) -> io::Result<()>;
}

pub(crate) enum ProcessEvent {
    Data(Vec<u8>, Instant),
    Error(String),
    Exit(ExitInfo),
}

/// Producer side of the output queue, handed to reader and waiter tasks.
#[derive(Clone)]
pub(crate) struct OutputSender {
    tx: mpsc::Sender<ProcessEvent>,
    shared: Arc<ProcessShared>,
}

impl OutputSender {
    /// For reader threads. Returns `false` once the process has been dropped.
    pub(crate) fn blocking_data(&self, bytes: Vec<u8>) -> bool {
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        let sent = self
            .tx
            .blocking_send(ProcessEvent::Data(bytes, Instant::now()))
            .is_ok();
        if !sent {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
        }
        sent
    }

    pub(crate) async fn data(&self, bytes: Vec<u8>) -> bool {
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        let sent = self
            .tx
            .send(ProcessEvent::Data(bytes, Instant::now()))
            .await
            .is_ok();
        if !sent {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
        }
        sent
    }

    pub(crate) fn blocking_event(&self, event: ProcessEvent) {
        self.note_exit(&event);
        let _ = self.tx.blocking_send(event);
    }

    pub(crate) async fn event(&self, event: ProcessEvent) {
        self.note_exit(&event);
        let _ = self.tx.send(event).await;
    }

    fn note_exit(&self, event: &ProcessEvent) {
        if matches!(event, ProcessEvent::Exit(_)) {
            self.shared.running.store(false, Ordering::Release);
        }
    }
}

#[derive(Default)]
struct DeliveryStats {
    latencies_ms: VecDeque<f64>,
    delivered: u64,
    dropped: u64,
}

impl DeliveryStats {
    fn record_latency(&mut self, latency: Duration) {
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency.as_secs_f64() * 1000.0);
    }

    fn average_latency_ms(&self) -> f64 {
        if self.latencies_ms.is_empty() {
            return 0.0;
        }
        self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64
    }

    fn dropped_percent(&self) -> f64 {
        let total = self.delivered + self.dropped;
        if total == 0 {
            return 0.0;
        }
        self.dropped as f64 * 100.0 / total as f64
    }
}

pub(crate) struct ProcessShared {
    data: Arc<ListenerSet<String>>,
    exit: Arc<ListenerSet<ExitInfo>>,
    error: Arc<ListenerSet<String>>,
    running: AtomicBool,
    exited: AtomicBool,
    queued: AtomicUsize,
    capacity: usize,
    stats: StdMutex<DeliveryStats>,
    recent: StdMutex<VecDeque<u8>>,
}

impl ProcessShared {
    fn new(capacity: usize) -> Self {
        Self {
            data: ListenerSet::new("data"),
            exit: ListenerSet::new("exit"),
            error: ListenerSet::new("error"),
            running: AtomicBool::new(true),
            exited: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            capacity,
            stats: StdMutex::new(DeliveryStats::default()),
            recent: StdMutex::new(VecDeque::with_capacity(RECENT_OUTPUT_BYTES)),
        }
    }

    fn remember(&self, bytes: &[u8]) {
        let Ok(mut recent) = self.recent.lock() else {
            return;
        };
        let tail = if bytes.len() > RECENT_OUTPUT_BYTES {
            &bytes[bytes.len() - RECENT_OUTPUT_BYTES..]
        } else {
            bytes
        };
        let overflow = (recent.len() + tail.len()).saturating_sub(RECENT_OUTPUT_BYTES);
        recent.drain(..overflow);
        recent.extend(tail.iter().copied());
    }

    fn record_dropped(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.dropped += 1;
        }
    }

    fn record_delivery(&self, latency: Duration, lost: bool) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.record_latency(latency);
            if lost {
                stats.dropped += 1;
            } else {
                stats.delivered += 1;
            }
        }
    }

    fn health(&self) -> BufferHealth {
        let queued = self.queued.load(Ordering::Acquire);
        let utilization = if self.capacity == 0 {
            0.0
        } else {
            (queued as f64 * 100.0 / self.capacity as f64).min(100.0)
        };
        let (latency, dropped) = match self.stats.lock() {
            Ok(stats) => (stats.average_latency_ms(), stats.dropped_percent()),
            Err(_) => (0.0, 0.0),
        };
        BufferHealth::from_counters(utilization, latency, dropped)
    }
}

/// One live spawned session.
///
/// Output is queued from the moment the process starts but listeners are
/// only called after [`BackendProcess::resume`], so nothing is lost between
/// spawning and subscribing.
pub struct BackendProcess {
    kind: BackendKind,
    pid: u32,
    control: Box<dyn ProcessControl>,
    shared: Arc<ProcessShared>,
    pending: StdMutex<Option<mpsc::Receiver<ProcessEvent>>>,
    runtime: Handle,
}

impl BackendProcess {
    pub(crate) fn new(
        kind: BackendKind,
        pid: u32,
        control: Box<dyn ProcessControl>,
        queue_capacity: usize,
        runtime: Handle,
    ) -> (Self, OutputSender) {
        let capacity = queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let shared = Arc::new(ProcessShared::new(capacity));
        let sender = OutputSender {
            tx,
            shared: Arc::clone(&shared),
        };
        let process = Self {
            kind,
            pid,
            control,
            shared,
            pending: StdMutex::new(Some(rx)),
            runtime,
        };
        (process, sender)
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::for_kind(self.kind)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn has_exited(&self) -> bool {
        self.shared.exited.load(Ordering::Acquire)
    }

    pub fn write(&self, data: &str) -> io::Result<()> {
        if !self.is_running() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("process {} has exited", self.pid),
            ));
        }
        self.control.write(data.as_bytes())
    }

    /// Resizes the terminal. Backends that cannot resize ignore the call.
    pub fn resize(&self, cols: u16, rows: u16) {
        let (cols, rows) = (cols.max(1), rows.max(1));
        match self.control.resize(cols, rows) {
            Ok(true) => debug!(event = "process_resized", pid = self.pid, cols, rows),
            Ok(false) => debug!(
                event = "process_resize_unsupported",
                pid = self.pid,
                backend = %self.kind
            ),
            Err(err) => warn!(event = "process_resize_failed", pid = self.pid, error = %err),
        }
    }

    pub fn kill(&self, signal: KillSignal) -> io::Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        info!(event = "process_kill", pid = self.pid, signal = ?signal);
        self.control.kill(signal)
    }

    pub fn on_data<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.shared.data.add(Arc::new(listener))
    }

    pub fn on_exit<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ExitInfo) + Send + Sync + 'static,
    {
        self.shared.exit.add(Arc::new(listener))
    }

    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.shared.error.add(Arc::new(listener))
    }

    /// Starts delivering queued events to listeners. Later calls are no-ops.
    pub fn resume(&self) {
        let rx = match self.pending.lock() {
            Ok(mut pending) => pending.take(),
            Err(_) => None,
        };
        if let Some(rx) = rx {
            let shared = Arc::clone(&self.shared);
            let pid = self.pid;
            self.runtime.spawn(dispatch_events(rx, shared, pid));
        }
    }

    /// The last 64 KiB of output delivered to listeners.
    pub fn recent_output(&self) -> String {
        match self.shared.recent.lock() {
            Ok(recent) => {
                let bytes: Vec<u8> = recent.iter().copied().collect();
                String::from_utf8_lossy(&bytes).into_owned()
            }
            Err(_) => String::new(),
        }
    }
}

impl std::fmt::Debug for BackendProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProcess")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish()
    }
}

impl BufferTelemetry for BackendProcess {
    fn buffer_health(&self) -> BufferHealth {
        self.shared.health()
    }
}

impl MonitoredTerminal for BackendProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_running(&self) -> bool {
        BackendProcess::is_running(self)
    }

    fn buffer_telemetry(&self) -> Option<&dyn BufferTelemetry> {
        Some(self)
    }
}

async fn dispatch_events(
    mut rx: mpsc::Receiver<ProcessEvent>,
    shared: Arc<ProcessShared>,
    pid: u32,
) {
    let mut carry = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            ProcessEvent::Data(bytes, read_at) => {
                shared.queued.fetch_sub(1, Ordering::AcqRel);
                if shared.exited.load(Ordering::Acquire) {
                    shared.record_dropped();
                    continue;
                }
                shared.remember(&bytes);
                let text = decode_chunk(&mut carry, &bytes);
                if text.is_empty() {
                    continue;
                }
                let panicked = shared.data.emit(&text);
                shared.record_delivery(read_at.elapsed(), panicked > 0);
            }
            ProcessEvent::Error(message) => {
                if !shared.exited.load(Ordering::Acquire) {
                    warn!(event = "process_error", pid, error = %message);
                    shared.error.emit(&message);
                }
            }
            ProcessEvent::Exit(exit) => {
                if shared.exited.swap(true, Ordering::AcqRel) {
                    continue;
                }
                if !carry.is_empty() {
                    let rest = String::from_utf8_lossy(&carry).into_owned();
                    carry.clear();
                    shared.data.emit(&rest);
                }
                info!(event = "process_exited", pid, code = ?exit.code);
                shared.exit.emit(&exit);
                shared.data.clear();
                shared.exit.clear();
                shared.error.clear();
            }
        }
    }
}

/// Decodes `bytes` as UTF-8, holding back a trailing incomplete sequence
/// until the next chunk arrives.
fn decode_chunk(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let keep = incomplete_suffix_len(carry);
    let tail = carry.split_off(carry.len() - keep);
    let text = String::from_utf8_lossy(carry).into_owned();
    *carry = tail;
    text
}

fn incomplete_suffix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let expected = match byte {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if expected > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use termdeck_core::BufferStatus;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    #[derive(Default)]
    pub(crate) struct NullControl {
        pub(crate) kills: AtomicU32,
    }

    impl ProcessControl for NullControl {
        fn write(&self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn resize(&self, _cols: u16, _rows: u16) -> io::Result<bool> {
            Ok(false)
        }

        fn kill(&self, _signal: KillSignal) -> io::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) fn fake_process(kind: BackendKind, pid: u32) -> (BackendProcess, OutputSender) {
        BackendProcess::new(
            kind,
            pid,
            Box::new(NullControl::default()),
            8,
            Handle::current(),
        )
    }

    #[tokio::test]
    async fn data_after_exit_is_dropped() {
        let (process, sender) = fake_process(BackendKind::Subprocess, 42);
        let seen = Arc::new(StdMutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);
        let _data = process.on_data(move |text| sink.lock().unwrap().push(text.clone()));
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_tx = StdMutex::new(Some(exit_tx));
        let _exit = process.on_exit(move |exit| {
            if let Some(tx) = exit_tx.lock().unwrap().take() {
                let _ = tx.send(*exit);
            }
        });

        assert!(sender.data(b"before".to_vec()).await);
        sender.event(ProcessEvent::Exit(ExitInfo { code: Some(0) })).await;
        assert!(sender.data(b"after".to_vec()).await);
        drop(sender);
        process.resume();

        let exit = timeout(Duration::from_secs(2), exit_rx)
            .await
            .expect("exit in time")
            .expect("exit delivered");
        assert_eq!(exit.code, Some(0));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["before".to_string()]);
        assert!(!process.is_running());
        assert!(process.has_exited());
        assert!(process.buffer_health().dropped_chunks_percent > 0.0);
    }

    #[tokio::test]
    async fn panicking_data_listener_counts_as_dropped() {
        let (process, sender) = fake_process(BackendKind::NativePty, 7);
        let seen = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&seen);
        let _bad = process.on_data(|_| panic!("renderer bug"));
        let _good = process.on_data(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        process.resume();

        for _ in 0..3 {
            assert!(sender.data(b"x".to_vec()).await);
        }
        timeout(Duration::from_secs(2), async {
            while seen.load(Ordering::SeqCst) < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("chunks delivered");

        let health = process.buffer_health();
        assert_eq!(health.dropped_chunks_percent, 100.0);
        assert_eq!(health.status, BufferStatus::Critical);
    }

    #[tokio::test]
    async fn queued_output_raises_utilization_until_resumed() {
        let (process, sender) = fake_process(BackendKind::Subprocess, 9);
        for _ in 0..6 {
            assert!(sender.data(b"chunk".to_vec()).await);
        }
        let health = process.buffer_health();
        assert_eq!(health.utilization_percent, 75.0);
        assert_eq!(health.status, BufferStatus::Warning);

        process.resume();
        timeout(Duration::from_secs(2), async {
            while process.buffer_health().utilization_percent > 0.0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("queue drained");
        assert_eq!(process.recent_output(), "chunk".repeat(6));
    }

    #[tokio::test]
    async fn kill_after_exit_is_a_noop() {
        let (process, sender) = fake_process(BackendKind::Subprocess, 11);
        sender.event(ProcessEvent::Exit(ExitInfo { code: None })).await;
        assert!(process.kill(KillSignal::Terminate).is_ok());
        assert!(process.write("ls\n").is_err());
    }

    #[test]
    fn split_utf8_sequence_is_carried() {
        let mut carry = Vec::new();
        let bytes = "é!".as_bytes();
        assert_eq!(decode_chunk(&mut carry, &bytes[..1]), "");
        assert_eq!(carry.len(), 1);
        assert_eq!(decode_chunk(&mut carry, &bytes[1..]), "é!");
        assert!(carry.is_empty());
    }

    #[test]
    fn recent_output_keeps_tail() {
        let shared = ProcessShared::new(4);
        shared.remember(&vec![b'a'; RECENT_OUTPUT_BYTES]);
        shared.remember(b"tail");
        let recent = shared.recent.lock().unwrap();
        assert_eq!(recent.len(), RECENT_OUTPUT_BYTES);
        assert_eq!(recent.back(), Some(&b'l'));
    }
}
