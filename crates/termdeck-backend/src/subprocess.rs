use std::io;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use termdeck_core::{BackendKind, ExitInfo, KillSignal, SpawnOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::SpawnError;
use crate::platform;
use crate::process::{BackendProcess, OutputSender, ProcessControl, ProcessEvent};
use crate::{TerminalBackend, DEFAULT_QUEUE_CAPACITY};

const READ_BUFFER_BYTES: usize = 8192;

/// Plain child process with piped stdio. No terminal device, so no resize
/// and no line discipline.
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    queue_capacity: usize,
}

impl Default for SubprocessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessBackend {
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
impl TerminalBackend for SubprocessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    async fn is_available(&self) -> bool {
        match self.spawn(&platform::probe_options()).await {
            Ok(process) => {
                if let Err(err) = process.kill(KillSignal::Terminate) {
                    debug!(event = "subprocess_probe_kill_failed", error = %err);
                }
                true
            }
            Err(err) => {
                warn!(event = "subprocess_probe_failed", error = %err);
                false
            }
        }
    }

    async fn spawn(&self, options: &SpawnOptions) -> Result<BackendProcess, SpawnError> {
        let shell = platform::resolve_shell(options);
        let mut command = Command::new(&shell);
        command
            .args(platform::resolve_args(options))
            .current_dir(platform::resolve_cwd(options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(vars) = &options.env {
            command.envs(vars);
        }

        let mut child = command.spawn().map_err(|err| SpawnError::Spawn {
            command: shell.clone(),
            reason: err.to_string(),
        })?;
        let Some(pid) = child.id() else {
            let _ = child.start_kill();
            return Err(SpawnError::MissingPid);
        };

        let (input_tx, input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let control = PipeControl {
            input: input_tx,
            kill: StdMutex::new(Some(kill_tx)),
        };
        let (process, sender) = BackendProcess::new(
            BackendKind::Subprocess,
            pid,
            Box::new(control),
            self.queue_capacity,
            Handle::current(),
        );

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(forward_input(stdin, input_rx));
        }
        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(forward_output(stdout, sender.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_output(stderr, sender.clone())));

        tokio::spawn(async move {
            let code = wait_child(&mut child, kill_rx, &sender).await;
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                let _ = task.await;
            }
            sender.event(ProcessEvent::Exit(ExitInfo { code })).await;
        });

        info!(event = "subprocess_spawned", pid, shell = %shell);
        Ok(process)
    }
}

async fn wait_child(
    child: &mut Child,
    mut kill_rx: oneshot::Receiver<()>,
    sender: &OutputSender,
) -> Option<i32> {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill_rx => {
            if let Err(err) = child.kill().await {
                warn!(event = "subprocess_kill_failed", error = %err);
            }
            child.wait().await
        }
    };
    match status {
        Ok(status) => status.code(),
        Err(err) => {
            sender
                .event(ProcessEvent::Error(format!("wait failed: {err}")))
                .await;
            None
        }
    }
}

async fn forward_input(
    mut stdin: tokio::process::ChildStdin,
    mut input_rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(bytes) = input_rx.recv().await {
        if stdin.write_all(&bytes).await.is_err() {
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

async fn forward_output<R>(mut reader: R, sender: OutputSender)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_BUFFER_BYTES];
    loop {
        match reader.read(&mut buffer).await {
            Ok(0) => break,
            Ok(count) => {
                if !sender.data(buffer[..count].to_vec()).await {
                    break;
                }
            }
            Err(err) => {
                sender
                    .event(ProcessEvent::Error(format!("read failed: {err}")))
                    .await;
                break;
            }
        }
    }
}

struct PipeControl {
    input: mpsc::UnboundedSender<Vec<u8>>,
    kill: StdMutex<Option<oneshot::Sender<()>>>,
}

impl ProcessControl for PipeControl {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        self.input
            .send(data.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))
    }

    fn resize(&self, _cols: u16, _rows: u16) -> io::Result<bool> {
        Ok(false)
    }

    /// Pipes carry no terminal signals, so an interrupt also terminates.
    fn kill(&self, _signal: KillSignal) -> io::Result<()> {
        let sender = self
            .kill
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "kill handle poisoned"))?
            .take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::timeout;

    fn exit_channel(process: &BackendProcess) -> oneshot::Receiver<ExitInfo> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let _sub = process.on_exit(move |exit| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(*exit);
            }
        });
        rx
    }

    #[tokio::test]
    async fn stdout_and_stderr_arrive_as_data_before_exit() {
        let backend = SubprocessBackend::new();
        let options = SpawnOptions::default()
            .with_shell("sh")
            .with_args(["-c", "echo out; echo err 1>&2; exit 3"]);
        let process = backend.spawn(&options).await.expect("spawn");

        let output = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&output);
        let _data = process.on_data(move |text| sink.lock().unwrap().push_str(text));
        let exit_rx = exit_channel(&process);
        process.resume();

        let exit = timeout(Duration::from_secs(5), exit_rx)
            .await
            .expect("exit in time")
            .expect("exit delivered");
        assert_eq!(exit.code, Some(3));
        let output = output.lock().unwrap().clone();
        assert!(output.contains("out"));
        assert!(output.contains("err"));
    }

    #[tokio::test]
    async fn stdin_write_is_echoed_by_cat() {
        let backend = SubprocessBackend::new();
        let options = SpawnOptions::default().with_shell("cat");
        let process = backend.spawn(&options).await.expect("spawn");
        let (data_tx, mut data_rx) = mpsc::unbounded_channel::<String>();
        let _data = process.on_data(move |text| {
            let _ = data_tx.send(text.clone());
        });
        let exit_rx = exit_channel(&process);
        process.resume();

        process.write("ping\n").expect("write");
        let echoed = timeout(Duration::from_secs(5), data_rx.recv())
            .await
            .expect("echo in time")
            .expect("echo");
        assert_eq!(echoed, "ping\n");

        process.resize(100, 30);
        process.kill(KillSignal::Terminate).expect("kill");
        timeout(Duration::from_secs(5), exit_rx)
            .await
            .expect("exit in time")
            .expect("exit delivered");
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let backend = SubprocessBackend::new();
        let options = SpawnOptions::default().with_shell("/definitely/not/a/shell");
        let err = backend.spawn(&options).await.expect_err("spawn fails");
        assert!(matches!(err, SpawnError::Spawn { .. }));
    }

    #[tokio::test]
    async fn available_where_echo_exists() {
        assert!(SubprocessBackend::new().is_available().await);
    }
}
