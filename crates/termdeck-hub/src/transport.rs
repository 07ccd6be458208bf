//! Unix socket transport for the bridge: one connection per UI window,
//! newline-delimited JSON frames in both directions.

use std::io;
use std::path::PathBuf;
#[cfg(unix)]
use std::sync::Arc;
use std::time::Duration;
#[cfg(unix)]
use std::{fs, os::unix::fs::PermissionsExt};

#[cfg(unix)]
use termdeck_core::bridge_ipc::{
    encode_frame, BridgeFrame, BridgeMsg, CallEnvelope, CURRENT_PROTOCOL_VERSION,
};
use termdeck_core::bridge_ipc::DEFAULT_MAX_FRAME_BYTES;
#[cfg(unix)]
use tokio::io::AsyncWriteExt;
#[cfg(unix)]
use tokio::net::{
    unix::{OwnedReadHalf, OwnedWriteHalf},
    UnixListener, UnixStream,
};
#[cfg(unix)]
use tokio::sync::mpsc;
use tokio::sync::watch;
#[cfg(unix)]
use tracing::{debug, info, warn};

#[cfg(unix)]
use crate::bridge::{Bridge, WindowId};
#[cfg(unix)]
use crate::framing::FrameReader;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub socket_path: PathBuf,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub max_frame_bytes: usize,
}

impl TransportConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// `<tmp>/termdeck/<channel>.sock`, with characters unsafe in file names
/// replaced.
pub fn default_socket_path(channel: &str) -> PathBuf {
    let name: String = channel
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    std::env::temp_dir()
        .join("termdeck")
        .join(format!("{name}.sock"))
}

#[cfg(not(unix))]
pub async fn serve(
    _bridge: std::sync::Arc<crate::bridge::Bridge>,
    _config: TransportConfig,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    tracing::warn!(event = "bridge_transport_unsupported");
    let _ = shutdown.changed().await;
    Ok(())
}

#[cfg(unix)]
pub async fn serve(
    bridge: Arc<Bridge>,
    config: TransportConfig,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    if let Some(parent) = config.socket_path.parent() {
        fs::create_dir_all(parent)?;
        let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
    }

    if config.socket_path.exists() {
        let _ = fs::remove_file(&config.socket_path);
    }

    let listener = UnixListener::bind(&config.socket_path)?;
    let _ = fs::set_permissions(&config.socket_path, fs::Permissions::from_mode(0o600));

    info!(
        event = "bridge_transport_start",
        channel = %bridge.channel(),
        socket = %config.socket_path.display(),
        queue_capacity = config.queue_capacity
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let bridge = Arc::clone(&bridge);
                        let config = config.clone();
                        tokio::spawn(async move {
                            handle_connection(bridge, stream, config).await;
                        });
                    }
                    Err(err) => {
                        warn!(event = "bridge_transport_accept_error", error = %err);
                    }
                }
            }
        }
    }

    let _ = fs::remove_file(&config.socket_path);
    info!(event = "bridge_transport_stop", channel = %bridge.channel());
    Ok(())
}

/// Why a window's connection ended.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hangup {
    PeerClosed,
    WriterStopped,
    Evicted,
}

#[cfg(unix)]
impl Hangup {
    fn as_str(self) -> &'static str {
        match self {
            Hangup::PeerClosed => "peer_closed",
            Hangup::WriterStopped => "writer_stopped",
            Hangup::Evicted => "evicted",
        }
    }
}

/// Serves one window until the peer hangs up, its writer gives up or the
/// bridge evicts it. Either of the last two closes the socket, so the peer
/// sees the disconnect instead of waiting on replies that cannot arrive.
#[cfg(unix)]
async fn handle_connection(bridge: Arc<Bridge>, stream: UnixStream, config: TransportConfig) {
    let (reader_half, writer_half) = stream.into_split();
    let mut frames = FrameReader::new(reader_half, config.max_frame_bytes);

    let (tx, rx) = mpsc::channel::<BridgeFrame>(config.queue_capacity.max(1));
    let mut window = bridge.attach_window(tx.clone());
    let window_id = window.id();
    let mut writer_task = tokio::spawn(write_frames(
        window_id,
        writer_half,
        rx,
        config.write_timeout,
        config.max_frame_bytes,
    ));

    let hangup = tokio::select! {
        _ = serve_frames(&bridge, &mut frames, &tx, window_id) => Hangup::PeerClosed,
        _ = &mut writer_task => Hangup::WriterStopped,
        _ = window.evicted() => Hangup::Evicted,
    };

    bridge.detach_window(window_id);
    drop(tx);
    match hangup {
        Hangup::PeerClosed => {
            let _ = writer_task.await;
        }
        Hangup::Evicted => writer_task.abort(),
        Hangup::WriterStopped => {}
    }
    info!(
        event = "bridge_connection_closed",
        window_id,
        reason = hangup.as_str()
    );
}

#[cfg(unix)]
async fn serve_frames(
    bridge: &Arc<Bridge>,
    frames: &mut FrameReader<OwnedReadHalf>,
    tx: &mpsc::Sender<BridgeFrame>,
    window_id: WindowId,
) {
    loop {
        let frame = match frames.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(err) => {
                warn!(event = "bridge_read_error", window_id, error = %err);
                return;
            }
        };
        if frame.version.0 > CURRENT_PROTOCOL_VERSION {
            warn!(event = "bridge_skip_version", window_id, version = frame.version.0);
            continue;
        }
        if frame.channel != bridge.channel() {
            warn!(
                event = "bridge_channel_mismatch",
                window_id,
                msg_channel = %frame.channel,
                expected_channel = %bridge.channel()
            );
            continue;
        }
        match frame.msg {
            BridgeMsg::Invoke {
                request_id,
                name,
                payload,
            } => {
                let bridge = Arc::clone(bridge);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = bridge.dispatch(CallEnvelope::new(name, payload)).await;
                    let reply = BridgeFrame::reply(bridge.channel(), request_id, response);
                    if tx.send(reply).await.is_err() {
                        debug!(event = "bridge_reply_dropped", window_id, request_id);
                    }
                });
            }
            BridgeMsg::Reply { request_id, .. } => {
                debug!(event = "bridge_ignored_reply", window_id, request_id);
            }
            BridgeMsg::Event { name, .. } => {
                debug!(event = "bridge_ignored_event", window_id, name = %name);
            }
        }
    }
}

/// Drains the window's queue onto the socket. Stops on the first failed or
/// timed-out write.
#[cfg(unix)]
async fn write_frames(
    window_id: WindowId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<BridgeFrame>,
    write_timeout: Duration,
    max_frame_bytes: usize,
) {
    while let Some(frame) = rx.recv().await {
        let bytes = match encode_frame(&frame, max_frame_bytes) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(event = "bridge_encode_error", window_id, error = %err);
                continue;
            }
        };
        let written = tokio::time::timeout(write_timeout, async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(event = "bridge_write_error", window_id, error = %err);
                return;
            }
            Err(_) => {
                warn!(
                    event = "bridge_write_timeout",
                    window_id,
                    timeout_ms = write_timeout.as_millis() as u64
                );
                return;
            }
        }
    }
}
