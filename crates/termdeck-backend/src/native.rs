use std::env;
use std::io::{self, Read, Write};
use std::sync::mpsc as std_mpsc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{
    native_pty_system, Child, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use termdeck_core::{BackendKind, ExitInfo, KillSignal, SpawnOptions};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::SpawnError;
use crate::platform;
use crate::process::{BackendProcess, OutputSender, ProcessControl, ProcessEvent};
use crate::{TerminalBackend, DEFAULT_QUEUE_CAPACITY};

const READ_BUFFER_BYTES: usize = 8192;
/// How long the exit event waits for the reader to drain after the child
/// is reaped.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(200);
const ETX: u8 = 0x03;

/// Pseudo-terminal backend built on `portable-pty`.
#[derive(Debug, Clone)]
pub struct NativePtyBackend {
    queue_capacity: usize,
}

impl Default for NativePtyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativePtyBackend {
    pub fn new() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[async_trait]
impl TerminalBackend for NativePtyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NativePty
    }

    async fn is_available(&self) -> bool {
        if !platform::native_pty_supported() {
            debug!(event = "native_pty_unsupported");
            return false;
        }
        match self.spawn(&platform::probe_options()).await {
            Ok(process) => {
                if let Err(err) = process.kill(KillSignal::Terminate) {
                    debug!(event = "native_pty_probe_kill_failed", error = %err);
                }
                true
            }
            Err(err) => {
                warn!(event = "native_pty_probe_failed", error = %err);
                false
            }
        }
    }

    async fn spawn(&self, options: &SpawnOptions) -> Result<BackendProcess, SpawnError> {
        let (cols, rows) = options.size();
        let pair = native_pty_system()
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| SpawnError::OpenPty(err.to_string()))?;

        let shell = platform::resolve_shell(options);
        let mut builder = CommandBuilder::new(&shell);
        builder.args(platform::resolve_args(options));
        builder.cwd(platform::resolve_cwd(options));
        let mut term_set = env::var_os("TERM").is_some();
        if let Some(vars) = &options.env {
            for (key, value) in vars {
                term_set |= key == "TERM";
                builder.env(key, value);
            }
        }
        if !term_set {
            builder.env("TERM", "xterm-256color");
        }

        let child = pair
            .slave
            .spawn_command(builder)
            .map_err(|err| SpawnError::Spawn {
                command: shell.clone(),
                reason: err.to_string(),
            })?;
        drop(pair.slave);

        let Some(pid) = child.process_id() else {
            reap(child);
            return Err(SpawnError::MissingPid);
        };

        let io = pair.master.try_clone_reader().and_then(|reader| {
            let writer = pair.master.take_writer()?;
            Ok((reader, writer))
        });
        let (mut reader, writer) = match io {
            Ok(io) => io,
            Err(err) => {
                reap(child);
                return Err(SpawnError::OpenPty(err.to_string()));
            }
        };
        let mut setup_killer = child.clone_killer();

        let control = PtyControl {
            master: StdMutex::new(pair.master),
            writer: StdMutex::new(writer),
            killer: StdMutex::new(child.clone_killer()),
        };
        let (process, sender) = BackendProcess::new(
            BackendKind::NativePty,
            pid,
            Box::new(control),
            self.queue_capacity,
            Handle::current(),
        );

        let (drained_tx, drained_rx) = std_mpsc::channel::<()>();
        let reader_sender = sender.clone();
        let reader_thread = std::thread::Builder::new()
            .name(format!("pty-reader-{pid}"))
            .spawn(move || {
                let mut buffer = [0u8; READ_BUFFER_BYTES];
                loop {
                    let read = match reader.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(count) => count,
                        Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    };
                    if !reader_sender.blocking_data(buffer[..read].to_vec()) {
                        break;
                    }
                }
                let _ = drained_tx.send(());
            });
        if let Err(err) = reader_thread {
            reap(child);
            return Err(SpawnError::Io(err));
        }

        let waiter_thread = std::thread::Builder::new()
            .name(format!("pty-waiter-{pid}"))
            .spawn(move || wait_for_exit(child, pid, sender, drained_rx));
        if let Err(err) = waiter_thread {
            // The child went down with the closure; only its killer is left.
            let _ = setup_killer.kill();
            return Err(SpawnError::Io(err));
        }

        info!(event = "pty_spawned", pid, shell = %shell, cols, rows);
        Ok(process)
    }
}

/// Kills a child whose setup failed and waits for it.
fn reap(mut child: Box<dyn Child + Send + Sync>) -> Option<ExitStatus> {
    if let Err(err) = child.kill() {
        debug!(event = "pty_setup_kill_failed", error = %err);
    }
    match child.wait() {
        Ok(status) => Some(status),
        Err(err) => {
            warn!(event = "pty_setup_reap_failed", error = %err);
            None
        }
    }
}

fn wait_for_exit(
    mut child: Box<dyn Child + Send + Sync>,
    pid: u32,
    sender: OutputSender,
    drained: std_mpsc::Receiver<()>,
) {
    let code = match child.wait() {
        Ok(status) => Some(status.exit_code() as i32),
        Err(err) => {
            sender.blocking_event(ProcessEvent::Error(format!("wait failed: {err}")));
            None
        }
    };
    if drained.recv_timeout(EXIT_DRAIN_GRACE).is_err() {
        debug!(event = "pty_reader_not_drained", pid);
    }
    sender.blocking_event(ProcessEvent::Exit(ExitInfo { code }));
}

struct PtyControl {
    master: StdMutex<Box<dyn MasterPty + Send>>,
    writer: StdMutex<Box<dyn Write + Send>>,
    killer: StdMutex<Box<dyn ChildKiller + Send + Sync>>,
}

impl PtyControl {
    fn write_bytes(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "pty writer poisoned"))?;
        writer.write_all(data)?;
        writer.flush()
    }
}

impl ProcessControl for PtyControl {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.write_bytes(data)
    }

    fn resize(&self, cols: u16, rows: u16) -> io::Result<bool> {
        let master = self
            .master
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "pty master poisoned"))?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
        Ok(true)
    }

    fn kill(&self, signal: KillSignal) -> io::Result<()> {
        match signal {
            KillSignal::Interrupt => self.write_bytes(&[ETX]),
            KillSignal::Terminate => {
                let mut killer = self
                    .killer
                    .lock()
                    .map_err(|_| io::Error::new(io::ErrorKind::Other, "pty killer poisoned"))?;
                killer.kill()
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pty_echo_reaches_listeners_before_exit() {
        let backend = NativePtyBackend::new();
        if !backend.is_available().await {
            return;
        }
        let options = SpawnOptions::default()
            .with_shell("sh")
            .with_args(["-c", "printf 'hello from pty'"]);
        let process = backend.spawn(&options).await.expect("spawn");
        assert!(process.pid() > 0);

        let output = Arc::new(StdMutex::new(String::new()));
        let sink = Arc::clone(&output);
        let _data = process.on_data(move |text| sink.lock().unwrap().push_str(text));
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_tx = StdMutex::new(Some(exit_tx));
        let _exit = process.on_exit(move |exit| {
            if let Some(tx) = exit_tx.lock().unwrap().take() {
                let _ = tx.send(*exit);
            }
        });
        process.resume();

        let exit = timeout(Duration::from_secs(10), exit_rx)
            .await
            .expect("exit in time")
            .expect("exit delivered");
        assert_eq!(exit.code, Some(0));
        assert!(output.lock().unwrap().contains("hello from pty"));
        assert!(!process.is_running());
    }

    #[test]
    fn reap_kills_and_waits_for_an_orphaned_child() {
        let Ok(pair) = native_pty_system().openpty(PtySize::default()) else {
            return;
        };
        let mut builder = CommandBuilder::new("sh");
        builder.args(["-c", "sleep 30"]);
        let Ok(child) = pair.slave.spawn_command(builder) else {
            return;
        };

        let (done_tx, done_rx) = std_mpsc::channel();
        std::thread::spawn(move || {
            let _ = done_tx.send(reap(child));
        });
        let status = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("reap returns once the child is gone")
            .expect("exit status");
        assert!(!status.success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pty_resize_and_terminate() {
        let backend = NativePtyBackend::new();
        if !backend.is_available().await {
            return;
        }
        let options = SpawnOptions::default()
            .with_shell("sh")
            .with_args(["-c", "sleep 30"]);
        let process = backend.spawn(&options).await.expect("spawn");
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_tx = StdMutex::new(Some(exit_tx));
        let _exit = process.on_exit(move |_| {
            if let Some(tx) = exit_tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        });
        process.resume();

        process.resize(120, 40);
        process.kill(KillSignal::Terminate).expect("kill");
        timeout(Duration::from_secs(10), exit_rx)
            .await
            .expect("exit in time")
            .expect("exit delivered");
    }
}
