//! MPV session module - spawns and controls an external MPV player via JSON IPC.
//!
//! Architecture:
//! - `command.rs` - Command-line builder (flags and positional arguments)
//! - `filter.rs` - `--lavfi-complex` filter graph nodes
//! - `process.rs` - MPV binary detection, spawning and supervision
//! - `ipc.rs` - Async IPC connection over a Unix socket
//! - `protocol.rs` - JSON command/response types and serialization
//! - `client.rs` - Control client bound to one socket path
//! - `session.rs` - Orchestrates all of the above for one MPV instance

mod client;
mod command;
mod filter;
mod ipc;
mod process;
mod protocol;
mod session;

#[cfg(test)]
mod testing;

pub use client::{MpvClient, MpvError, DEFAULT_SOCKET_PATH};
pub use command::{shell_quote, Command, BOOLEAN_FLAG, DEFAULT_PROGRAM};
pub use filter::{FilterNode, AUDIO_SINK, VIDEO_SINK};
pub use ipc::{IpcError, MpvIpc};
pub use process::{find_mpv, MpvProcess, ProcessError};
pub use protocol::{MpvCommand, MpvEvent, MpvResponse, PropertyValue};
pub use session::{Session, SessionError, SessionState, Source};
