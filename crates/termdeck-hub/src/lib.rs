//! Host process of termdeck: the host-renderer bridge, its socket transport,
//! terminal sessions, system log terminals and the UI-side client.

pub mod bridge;
#[cfg(unix)]
pub mod client;
#[cfg(unix)]
mod framing;
pub mod git;
pub mod handlers;
pub mod host;
pub mod system_terminal;
pub mod terminals;
pub mod transport;

pub use bridge::{Args, Bridge, BridgeError, Thrown, WindowHandle, WindowId};
#[cfg(unix)]
pub use client::{BridgeClient, BridgeEvent, ChannelError};
pub use host::{Host, HostConfig};
pub use transport::{default_socket_path, TransportConfig};
