//! Host side of the host-renderer bridge: named handlers and window broadcast.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use termdeck_core::bridge_ipc::{BridgeFrame, BridgeResult, CallEnvelope, DEFAULT_CHANNEL};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub type WindowId = u64;

type Handler = Arc<dyn Fn(Args) -> BoxFuture<'static, Result<Value, Thrown>> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Unknown IPC message {0}")]
    UnknownMessage(String),
    #[error("IPC handler already registered for {0}")]
    DuplicateHandler(String),
}

/// What a failed handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Thrown {
    /// An error with a message.
    Error(String),
    /// Any other value; reported through its string form.
    Value(Value),
    Undefined,
}

impl Thrown {
    pub fn msg(message: impl Into<String>) -> Self {
        Thrown::Error(message.into())
    }

    pub fn message(&self) -> String {
        match self {
            Thrown::Error(message) => message.clone(),
            Thrown::Value(value) => value_to_string(value),
            Thrown::Undefined => "undefined".to_string(),
        }
    }
}

impl<E: std::error::Error> From<E> for Thrown {
    fn from(err: E) -> Self {
        Thrown::Error(err.to_string())
    }
}

/// String form of a JSON value as a script runtime would print it.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => value_to_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Positional call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deserializes argument `idx`. A missing argument reads as `null`, so
    /// `Option<T>` parameters may be omitted.
    pub fn get<T: DeserializeOwned>(&self, idx: usize) -> Result<T, Thrown> {
        let value = self.0.get(idx).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|err| Thrown::msg(format!("invalid argument {idx}: {err}")))
    }
}

struct Window {
    sender: mpsc::Sender<BridgeFrame>,
    evict: watch::Sender<bool>,
}

/// A window's attachment to the bridge.
pub struct WindowHandle {
    id: WindowId,
    evicted: watch::Receiver<bool>,
}

impl WindowHandle {
    pub fn id(&self) -> WindowId {
        self.id
    }

    /// Resolves once the bridge stops broadcasting to this window: its queue
    /// overflowed, its receiver closed or it was detached. The owner is
    /// expected to close the window's connection.
    pub async fn evicted(&mut self) {
        let _ = self.evicted.wait_for(|evicted| *evicted).await;
    }
}

pub struct Bridge {
    channel: String,
    handlers: StdRwLock<HashMap<String, Handler>>,
    windows: StdMutex<HashMap<WindowId, Window>>,
    next_window: AtomicU64,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL)
    }
}

impl Bridge {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            handlers: StdRwLock::new(HashMap::new()),
            windows: StdMutex::new(HashMap::new()),
            next_window: AtomicU64::new(1),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Registers `handler` under `name`. Fails without touching the registry
    /// when the name is taken.
    pub fn handle<F, Fut, T>(&self, name: &str, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Thrown>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.contains_key(name) {
            return Err(BridgeError::DuplicateHandler(name.to_string()));
        }
        let wrapped: Handler = Arc::new(move |args: Args| {
            let fut = handler(args);
            async move {
                let value = fut.await?;
                serde_json::to_value(value).map_err(Thrown::from)
            }
            .boxed()
        });
        handlers.insert(name.to_string(), wrapped);
        debug!(event = "bridge_handler_registered", name);
        Ok(())
    }

    pub fn off(&self, name: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
            .is_some()
    }

    pub async fn dispatch(&self, call: CallEnvelope) -> BridgeResult {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&call.name)
            .cloned();
        let Some(handler) = handler else {
            warn!(event = "bridge_unknown_message", name = %call.name);
            return BridgeResult::error(BridgeError::UnknownMessage(call.name).to_string());
        };

        let outcome = AssertUnwindSafe(handler(Args::new(call.payload)))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(result)) => BridgeResult::success(result),
            Ok(Err(thrown)) => {
                let message = thrown.message();
                debug!(event = "bridge_handler_failed", name = %call.name, error = %message);
                BridgeResult::error(message)
            }
            Err(_) => {
                warn!(event = "bridge_handler_panicked", name = %call.name);
                BridgeResult::error(format!("handler for {} panicked", call.name))
            }
        }
    }

    pub fn attach_window(&self, sender: mpsc::Sender<BridgeFrame>) -> WindowHandle {
        let id = self.next_window.fetch_add(1, Ordering::Relaxed);
        let (evict, evicted) = watch::channel(false);
        if let Ok(mut windows) = self.windows.lock() {
            windows.insert(id, Window { sender, evict });
        }
        info!(event = "bridge_window_attached", window_id = id);
        WindowHandle { id, evicted }
    }

    pub fn detach_window(&self, id: WindowId) -> bool {
        let removed = match self.windows.lock() {
            Ok(mut windows) => windows.remove(&id).is_some(),
            Err(_) => false,
        };
        if removed {
            info!(event = "bridge_window_detached", window_id = id);
        }
        removed
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Sends event `name` to every open window and returns how many received
    /// it. A closed window, or one whose queue is full, is evicted: it gets
    /// no further events and its handle's `evicted()` resolves.
    pub fn send(&self, name: &str, payload: Vec<Value>) -> usize {
        let Ok(mut windows) = self.windows.lock() else {
            return 0;
        };
        if windows.is_empty() {
            return 0;
        }
        let frame = BridgeFrame::event(&self.channel, name, payload);
        let mut delivered = 0;
        windows.retain(|window_id, window| {
            let kept = match window.sender.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(event = "bridge_slow_window", window_id = *window_id, name);
                    false
                }
            };
            if !kept {
                let _ = window.evict.send(true);
            }
            kept
        });
        delivered
    }
}
