//! Control client bound to one MPV IPC socket.

use std::sync::Arc;

use async_channel::Receiver;
use parking_lot::Mutex;
use thiserror::Error;

use super::ipc::{IpcError, MpvIpc};
use super::protocol::{MpvCommand, MpvEvent, MpvResponse, PropertyValue};

/// Socket used when none is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/mpv_socket";

#[derive(Error, Debug)]
pub enum MpvError {
  #[error("IPC error: {0}")]
  Ipc(#[from] IpcError),
  #[error("MPV command failed: {0}")]
  CommandFailed(String),
  #[error("Not connected")]
  NotConnected,
}

/// MPV control client.
///
/// Cloning is cheap; clones share the same connection.
#[derive(Clone)]
pub struct MpvClient {
  socket_path: String,
  ipc: Arc<Mutex<Option<Arc<MpvIpc>>>>,
}

impl MpvClient {
  /// Client for the default socket path.
  pub fn new() -> Self {
    Self::with_socket_path(DEFAULT_SOCKET_PATH)
  }

  /// Client for an explicit socket path. An empty path means the default.
  pub fn with_socket_path(socket_path: impl Into<String>) -> Self {
    Self {
      socket_path: socket_path.into(),
      ipc: Arc::new(Mutex::new(None)),
    }
  }

  pub fn socket_path(&self) -> &str {
    if self.socket_path.is_empty() {
      DEFAULT_SOCKET_PATH
    } else {
      &self.socket_path
    }
  }

  /// Connect to the socket with a single attempt.
  pub async fn open(&self) -> Result<(), MpvError> {
    self.open_with_retries(1).await
  }

  /// Connect to the socket, retrying while MPV creates it.
  pub async fn open_with_retries(&self, retries: u32) -> Result<(), MpvError> {
    if self.is_connected() {
      return Ok(());
    }

    let conn = MpvIpc::connect(self.socket_path(), retries).await?;
    *self.ipc.lock() = Some(Arc::new(conn));
    log::info!("MPV client connected to {}", self.socket_path());
    Ok(())
  }

  /// Close the connection. Succeeds if it was never opened or is already closed.
  pub async fn close(&self) -> Result<(), MpvError> {
    let conn = self.ipc.lock().clone();
    match conn {
      Some(conn) => {
        conn.close().await?;
        log::info!("MPV client disconnected from {}", self.socket_path());
        Ok(())
      }
      None => Ok(()),
    }
  }

  /// Block until the connection is closed by either side. Returns at once
  /// if the client was never opened.
  pub async fn wait_until_closed(&self) {
    let conn = self.ipc.lock().clone();
    if let Some(conn) = conn {
      conn.wait_until_closed().await;
    }
  }

  /// Check if connected.
  pub fn is_connected(&self) -> bool {
    self
      .ipc
      .lock()
      .as_ref()
      .is_some_and(|conn| !conn.is_closed())
  }

  /// The underlying connection, for tasks that must outlive a borrow of the client.
  pub fn connection(&self) -> Result<Arc<MpvIpc>, MpvError> {
    let guard = self.ipc.lock();
    guard.clone().ok_or(MpvError::NotConnected)
  }

  /// Send a command to MPV.
  async fn send(&self, cmd: MpvCommand) -> Result<MpvResponse, MpvError> {
    let ipc = self.connection()?;
    let response = ipc.send_command(cmd).await?;

    if !response.is_success() {
      return Err(MpvError::CommandFailed(response.error));
    }

    Ok(response)
  }

  /// Get a property value.
  pub async fn get_property(&self, name: &str) -> Result<PropertyValue, MpvError> {
    let response = self.send(MpvCommand::get_property(name)).await?;
    Ok(
      response
        .data
        .map(PropertyValue::from)
        .unwrap_or(PropertyValue::Null),
    )
  }

  /// Set a property value.
  pub async fn set_property(
    &self,
    name: &str,
    value: impl Into<serde_json::Value>,
  ) -> Result<(), MpvError> {
    self.send(MpvCommand::set_property(name, value.into())).await?;
    Ok(())
  }

  /// Path of the file currently playing.
  pub async fn get_path(&self) -> Result<String, MpvError> {
    Ok(self.get_property("path").await?.to_string())
  }

  /// Pause playback.
  pub async fn pause(&self) -> Result<(), MpvError> {
    self.set_pause(true).await
  }

  /// Set pause state.
  pub async fn set_pause(&self, paused: bool) -> Result<(), MpvError> {
    self.send(MpvCommand::set_pause(paused)).await?;
    Ok(())
  }

  /// Get current pause state.
  pub async fn get_pause(&self) -> Result<bool, MpvError> {
    match self.get_property("pause").await? {
      PropertyValue::Bool(b) => Ok(b),
      _ => Ok(true),
    }
  }

  /// Ask MPV to quit. The connection closes once MPV is gone.
  pub async fn quit(&self) -> Result<(), MpvError> {
    match self.send(MpvCommand::quit()).await {
      // MPV may hang up before answering.
      Err(MpvError::Ipc(IpcError::Disconnected)) => Ok(()),
      other => other.map(|_| ()),
    }
  }

  /// Get event receiver for property changes and other events.
  pub fn events(&self) -> Option<Receiver<MpvEvent>> {
    let guard = self.ipc.lock();
    guard.as_ref().map(|ipc| ipc.events())
  }
}

impl Default for MpvClient {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mpv::testing::FakeMpv;

  #[test]
  fn test_socket_path_defaults() {
    assert_eq!(MpvClient::new().socket_path(), DEFAULT_SOCKET_PATH);
    assert_eq!(MpvClient::with_socket_path("").socket_path(), DEFAULT_SOCKET_PATH);
    assert_eq!(
      MpvClient::with_socket_path("/run/user/1000/mpv").socket_path(),
      "/run/user/1000/mpv"
    );
  }

  #[tokio::test]
  async fn test_unopened_client() {
    let client = MpvClient::with_socket_path("/nonexistent/mpv.sock");
    assert!(!client.is_connected());
    assert!(matches!(client.get_path().await, Err(MpvError::NotConnected)));
    client.close().await.unwrap();
    client.wait_until_closed().await;
    assert!(client.open().await.is_err());
  }

  #[tokio::test]
  async fn test_get_path_and_pause() {
    let fake = FakeMpv::bind();
    fake.set("path", serde_json::json!("/media/track.flac"));
    let server = fake.serve();

    let client = MpvClient::with_socket_path(server.socket_path());
    client.open().await.unwrap();
    assert!(client.is_connected());

    assert_eq!(client.get_path().await.unwrap(), "/media/track.flac");
    assert!(!client.get_pause().await.unwrap());
    client.pause().await.unwrap();
    assert!(client.get_pause().await.unwrap());

    client.close().await.unwrap();
    assert!(!client.is_connected());
  }

  #[tokio::test]
  async fn test_failed_get_propagates() {
    let server = FakeMpv::bind().serve();
    let client = MpvClient::with_socket_path(server.socket_path());
    client.open().await.unwrap();

    match client.get_path().await {
      Err(MpvError::CommandFailed(msg)) => assert_eq!(msg, "property unavailable"),
      other => panic!("unexpected result: {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_quit_closes_connection() {
    let server = FakeMpv::bind().serve();
    let client = MpvClient::with_socket_path(server.socket_path());
    client.open().await.unwrap();

    client.quit().await.unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), client.wait_until_closed())
      .await
      .unwrap();
    assert!(!client.is_connected());
  }
}
