//! Async IPC connection to MPV over a Unix domain socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{MpvCommand, MpvEvent, MpvMessage, MpvResponse};

/// How long a command waits for its response.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Events buffered before new ones are dropped.
const EVENT_BUFFER: usize = 256;

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("Socket {path} not ready after {attempts} attempts: {reason}")]
  SocketNotReady {
    path: String,
    attempts: u32,
    reason: String,
  },
  #[error("Write failed: {0}")]
  WriteFailed(#[from] std::io::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("Disconnected")]
  Disconnected,
}

/// Pending request waiting for response.
type PendingRequest = oneshot::Sender<Result<MpvResponse, IpcError>>;

/// IPC connection state shared between writer and reader.
struct IpcState {
  pending: HashMap<i64, PendingRequest>,
}

/// Writer channel message.
enum WriteMessage {
  Command(Vec<u8>),
  Close(oneshot::Sender<std::io::Result<()>>),
}

/// MPV IPC connection.
pub struct MpvIpc {
  state: Arc<Mutex<IpcState>>,
  write_tx: Sender<WriteMessage>,
  event_rx: Receiver<MpvEvent>,
  closed: CancellationToken,
  _reader_handle: JoinHandle<()>,
  _writer_handle: JoinHandle<()>,
}

impl MpvIpc {
  /// Connect to the MPV socket, retrying with a linear back-off.
  pub async fn connect(path: &str, retry_count: u32) -> Result<Self, IpcError> {
    let attempts = retry_count.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
      if attempt > 0 {
        tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
      }

      match Self::try_connect(path).await {
        Ok(ipc) => return Ok(ipc),
        Err(e) => {
          log::debug!("IPC connect attempt {} failed: {}", attempt + 1, e);
          last_error = Some(e);
        }
      }
    }

    Err(IpcError::SocketNotReady {
      path: path.to_string(),
      attempts,
      reason: last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".into()),
    })
  }

  async fn try_connect(path: &str) -> Result<Self, IpcError> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path)
      .await
      .map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;

    let (reader, writer) = tokio::io::split(stream);
    Ok(Self::setup(reader, writer))
  }

  fn setup<R, W>(reader: R, writer: W) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
  {
    let state = Arc::new(Mutex::new(IpcState {
      pending: HashMap::new(),
    }));
    let closed = CancellationToken::new();

    let (event_tx, event_rx) = async_channel::bounded(EVENT_BUFFER);
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();

    let reader_state = state.clone();
    let reader_closed = closed.clone();
    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, reader_state.clone(), event_tx, reader_closed.clone()).await;
      // Whatever ended the loop, the connection is gone.
      reader_closed.cancel();
      Self::fail_pending(&reader_state);
    });

    let writer_closed = closed.clone();
    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx, writer_closed).await;
    });

    Self {
      state,
      write_tx,
      event_rx,
      closed,
      _reader_handle: reader_handle,
      _writer_handle: writer_handle,
    }
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    state: Arc<Mutex<IpcState>>,
    event_tx: Sender<MpvEvent>,
    closed: CancellationToken,
  ) {
    log::debug!("MPV IPC reader loop started");
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
      line.clear();
      let read = tokio::select! {
        _ = closed.cancelled() => {
          log::debug!("MPV IPC reader stopping, connection closed locally");
          break;
        }
        read = buf_reader.read_line(&mut line) => read,
      };

      match read {
        Ok(0) => {
          log::info!("MPV IPC connection closed by peer");
          break;
        }
        Ok(_) => {
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }

          match MpvMessage::parse(trimmed) {
            Ok(MpvMessage::Response(response)) => {
              log::debug!(
                "MPV reader: received response for request_id={}",
                response.request_id
              );
              let tx = state.lock().pending.remove(&response.request_id);
              if let Some(tx) = tx {
                let _ = tx.send(Ok(response));
              }
            }
            Ok(MpvMessage::Event(event)) => {
              log::debug!("MPV reader: received event {:?}", event);
              if event_tx.try_send(event).is_err() {
                log::debug!("MPV event buffer full, dropping event");
              }
            }
            Err(e) => {
              log::warn!("Failed to parse MPV message: {} - {}", e, trimmed);
            }
          }
        }
        Err(e) => {
          log::error!("MPV IPC read error: {}", e);
          break;
        }
      }
    }
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: Receiver<WriteMessage>,
    closed: CancellationToken,
  ) {
    log::debug!("MPV IPC writer loop started");

    loop {
      let msg = tokio::select! {
        biased;
        msg = write_rx.recv() => match msg {
          Ok(msg) => msg,
          Err(_) => break,
        },
        _ = closed.cancelled() => break,
      };

      match msg {
        WriteMessage::Command(mut data) => {
          data.push(b'\n');
          if let Err(e) = writer.write_all(&data).await {
            log::error!("MPV IPC write error: {}", e);
            break;
          }
          if let Err(e) = writer.flush().await {
            log::error!("MPV IPC flush error: {}", e);
            break;
          }
        }
        WriteMessage::Close(reply) => {
          log::debug!("MPV IPC writer closing");
          let _ = reply.send(writer.shutdown().await);
          break;
        }
      }
    }
  }

  /// Resolve every in-flight request with `Disconnected`.
  fn fail_pending(state: &Mutex<IpcState>) {
    let pending: Vec<_> = state.lock().pending.drain().map(|(_, tx)| tx).collect();
    for tx in pending {
      let _ = tx.send(Err(IpcError::Disconnected));
    }
  }

  /// Send a command to MPV and wait for response.
  pub async fn send_command(&self, cmd: MpvCommand) -> Result<MpvResponse, IpcError> {
    if self.is_closed() {
      return Err(IpcError::Disconnected);
    }

    let request_id = cmd.request_id;
    let (tx, rx) = oneshot::channel();
    self.state.lock().pending.insert(request_id, tx);

    let json = serde_json::to_string(&cmd).map_err(|e| IpcError::WriteFailed(e.into()))?;
    log::debug!("Sending MPV command: {}", json);

    if self
      .write_tx
      .send(WriteMessage::Command(json.into_bytes()))
      .await
      .is_err()
    {
      self.state.lock().pending.remove(&request_id);
      return Err(IpcError::Disconnected);
    }

    match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
      Ok(Ok(result)) => result,
      Ok(Err(_)) => Err(IpcError::Disconnected),
      Err(_) => {
        log::error!(
          "MPV command timeout after {:?}, request_id={}",
          COMMAND_TIMEOUT,
          request_id
        );
        self.state.lock().pending.remove(&request_id);
        Err(IpcError::Timeout)
      }
    }
  }

  /// Get the event receiver for property changes and other events.
  pub fn events(&self) -> Receiver<MpvEvent> {
    self.event_rx.clone()
  }

  /// Whether the connection has been closed from either side.
  pub fn is_closed(&self) -> bool {
    self.closed.is_cancelled()
  }

  /// Wait until the peer disconnects or `close` is called.
  pub async fn wait_until_closed(&self) {
    self.closed.cancelled().await;
  }

  /// Close the connection. Closing twice, or after the peer left, is a no-op.
  pub async fn close(&self) -> Result<(), IpcError> {
    if self.is_closed() {
      return Ok(());
    }

    let (tx, rx) = oneshot::channel();
    let result = match self.write_tx.send(WriteMessage::Close(tx)).await {
      // A dropped reply means the writer already stopped.
      Ok(()) => rx.await.unwrap_or(Ok(())),
      Err(_) => Ok(()),
    };
    self.closed.cancel();
    result.map_err(IpcError::from)
  }
}

impl Drop for MpvIpc {
  fn drop(&mut self) {
    self.closed.cancel();
  }
}
