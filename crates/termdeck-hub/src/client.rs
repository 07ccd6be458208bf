//! UI side of the bridge: invokes host operations over the socket and
//! receives host events.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use termdeck_core::bridge_ipc::{
    encode_frame, BridgeFrame, BridgeMsg, BridgeResult, CallEnvelope, FrameError,
    DEFAULT_MAX_FRAME_BYTES,
};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::framing::FrameReader;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("bridge connection closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("bridge io failed: {0}")]
    Io(#[from] io::Error),
}

/// A host event as received by the UI.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEvent {
    pub name: String,
    pub payload: Vec<Value>,
}

#[derive(Default)]
struct Pending {
    closed: bool,
    waiting: HashMap<u64, oneshot::Sender<BridgeResult>>,
}

pub struct BridgeClient {
    channel: String,
    next_request: AtomicU64,
    pending: Arc<StdMutex<Pending>>,
    writer: AsyncMutex<OwnedWriteHalf>,
    reader_task: JoinHandle<()>,
}

impl BridgeClient {
    /// Connects to the host socket. Events arrive on the returned receiver
    /// until the connection closes.
    pub async fn connect(
        path: &Path,
        channel: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<BridgeEvent>), ChannelError> {
        let stream = UnixStream::connect(path).await?;
        let (reader_half, writer_half) = stream.into_split();
        let pending = Arc::new(StdMutex::new(Pending::default()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_loop(
            FrameReader::new(reader_half, DEFAULT_MAX_FRAME_BYTES),
            channel.to_string(),
            Arc::clone(&pending),
            events_tx,
        ));
        let client = Self {
            channel: channel.to_string(),
            next_request: AtomicU64::new(1),
            pending,
            writer: AsyncMutex::new(writer_half),
            reader_task,
        };
        Ok((client, events_rx))
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Invokes `name` on the host and waits for its reply. Fails with
    /// [`ChannelError::Closed`] if the connection drops first.
    pub async fn invoke(
        &self,
        name: &str,
        payload: Vec<Value>,
    ) -> Result<BridgeResult, ChannelError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.lock_pending();
            if pending.closed {
                return Err(ChannelError::Closed);
            }
            pending.waiting.insert(request_id, tx);
        }

        let frame = BridgeFrame::invoke(&self.channel, request_id, CallEnvelope::new(name, payload));
        if let Err(err) = self.send_frame(&frame).await {
            self.lock_pending().waiting.remove(&request_id);
            return Err(err);
        }
        rx.await.map_err(|_| ChannelError::Closed)
    }

    /// Writes `frame` as-is, whatever its channel.
    pub async fn send_frame(&self, frame: &BridgeFrame) -> Result<(), ChannelError> {
        let bytes = encode_frame(frame, DEFAULT_MAX_FRAME_BYTES)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop(
    mut frames: FrameReader<OwnedReadHalf>,
    channel: String,
    pending: Arc<StdMutex<Pending>>,
    events: mpsc::UnboundedSender<BridgeEvent>,
) {
    loop {
        let frame = match frames.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                warn!(event = "bridge_client_read_error", error = %err);
                break;
            }
        };
        if frame.channel != channel {
            warn!(
                event = "bridge_channel_mismatch",
                msg_channel = %frame.channel,
                expected_channel = %channel
            );
            continue;
        }
        match frame.msg {
            BridgeMsg::Reply {
                request_id,
                response,
            } => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .waiting
                    .remove(&request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!(event = "bridge_client_orphan_reply", request_id),
                }
            }
            BridgeMsg::Event { name, payload } => {
                let _ = events.send(BridgeEvent { name, payload });
            }
            BridgeMsg::Invoke { name, .. } => {
                debug!(event = "bridge_client_ignored_invoke", name = %name);
            }
        }
    }

    let mut pending = pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    pending.closed = true;
    let failed = pending.waiting.len();
    pending.waiting.clear();
    debug!(event = "bridge_client_closed", failed_requests = failed);
}
