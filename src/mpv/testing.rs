//! Test doubles: an in-process MPV IPC peer and a stand-in player binary.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Properties = Arc<Mutex<HashMap<String, Value>>>;

/// Answers `get_property`, `set_property` and `quit` like MPV does.
pub struct FakeMpv {
  dir: tempfile::TempDir,
  path: String,
  listener: UnixListener,
  properties: Properties,
}

impl FakeMpv {
  pub fn bind() -> Self {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mpv.sock").to_string_lossy().into_owned();
    let listener = UnixListener::bind(&path).unwrap();
    let properties = Arc::new(Mutex::new(HashMap::from([(
      "pause".to_string(),
      json!(false),
    )])));
    Self {
      dir,
      path,
      listener,
      properties,
    }
  }

  pub fn set(&self, name: &str, value: Value) {
    self.properties.lock().insert(name.to_string(), value);
  }

  pub fn serve(self) -> FakeServer {
    let hangup = CancellationToken::new();
    let (closed_tx, closed_rx) = watch::channel(0usize);
    let closed_tx = Arc::new(closed_tx);

    let listener = self.listener;
    let properties = self.properties;
    let accept_hangup = hangup.clone();
    let task = tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
        let properties = properties.clone();
        let hangup = accept_hangup.clone();
        let closed_tx = closed_tx.clone();
        tokio::spawn(async move {
          handle(stream, properties, hangup).await;
          closed_tx.send_modify(|n| *n += 1);
        });
      }
    });

    FakeServer {
      _dir: self.dir,
      path: self.path,
      hangup,
      closed_rx,
      task,
    }
  }
}

pub struct FakeServer {
  _dir: tempfile::TempDir,
  path: String,
  hangup: CancellationToken,
  closed_rx: watch::Receiver<usize>,
  task: JoinHandle<()>,
}

impl FakeServer {
  pub fn socket_path(&self) -> &str {
    &self.path
  }

  /// Drop every client connection, as MPV does when it quits.
  pub fn hang_up(&self) {
    self.hangup.cancel();
  }

  /// Wait until `count` connections have ended.
  pub async fn wait_closed(&self, count: usize) {
    let mut rx = self.closed_rx.clone();
    let _ = rx.wait_for(|n| *n >= count).await;
  }
}

impl Drop for FakeServer {
  fn drop(&mut self) {
    self.hangup.cancel();
    self.task.abort();
  }
}

async fn handle(stream: UnixStream, properties: Properties, hangup: CancellationToken) {
  let (read, mut write) = stream.into_split();
  let mut lines = BufReader::new(read).lines();

  loop {
    let line = tokio::select! {
      _ = hangup.cancelled() => break,
      line = lines.next_line() => match line {
        Ok(Some(line)) => line,
        _ => break,
      },
    };

    let Ok(request) = serde_json::from_str::<Value>(&line) else {
      continue;
    };
    let command = request["command"].as_array().cloned().unwrap_or_default();
    let name = command
      .get(1)
      .and_then(Value::as_str)
      .unwrap_or_default()
      .to_string();

    let mut quit = false;
    let (error, data) = match command.first().and_then(Value::as_str) {
      Some("get_property") => match properties.lock().get(&name) {
        Some(value) => ("success", value.clone()),
        None => ("property unavailable", Value::Null),
      },
      Some("set_property") => {
        let value = command.get(2).cloned().unwrap_or(Value::Null);
        properties.lock().insert(name, value);
        ("success", Value::Null)
      }
      Some("quit") => {
        quit = true;
        ("success", Value::Null)
      }
      _ => ("invalid parameter", Value::Null),
    };

    let reply = json!({ "error": error, "data": data, "request_id": request["request_id"] });
    if write
      .write_all(format!("{}\n", reply).as_bytes())
      .await
      .is_err()
      || quit
    {
      break;
    }
  }
}

/// Write an executable that ignores its arguments and idles, standing in
/// for the player binary.
pub fn fake_player(dir: &tempfile::TempDir) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = dir.path().join("fake-mpv");
  std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}
