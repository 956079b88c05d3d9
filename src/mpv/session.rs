//! MPV session: builds the command line, launches MPV, connects to its IPC
//! socket and keeps the process and the connection alive or dead together.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{MpvClient, MpvError};
use super::command::Command;
use super::filter::{FilterNode, AUDIO_SINK};
use super::process::{self, MpvProcess, ProcessError};
use crate::config::SessionConfig;

const IPC_SERVER_FLAG: &str = "input-ipc-server";

/// How long `stop` waits for the watcher tasks and the process to wind down.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("session already started")]
  AlreadyStarted,
  #[error("no audio sources available to add global audio filter")]
  NoAudioSources,
  #[error("failed to start MPV process: {0}")]
  ProcessStart(#[from] ProcessError),
  #[error("failed to open MPV client: {0}")]
  ClientOpen(#[source] MpvError),
  #[error("failed to close MPV client: {0}")]
  ClientClose(#[source] MpvError),
  #[error("failed to kill process: {0}")]
  Kill(#[source] std::io::Error),
  #[error("failed to stop session: {close}, {kill}")]
  Teardown {
    close: MpvError,
    kill: std::io::Error,
  },
  #[error("session has no MPV client")]
  NotConnected,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  /// Accepting sources, filters and flags.
  Configuring,
  /// Launch begun, connection not open yet. A failed launch stays here.
  Starting,
  /// Process spawned, connection open, watchers running.
  Running,
  /// Torn down; the session cannot be reused.
  Stopped,
}

/// A playable input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
  /// Graph label: `vid<N>` or `aid<N>`.
  pub id: String,
  pub path: String,
}

/// One MPV process and its control connection.
pub struct Session {
  state: SessionState,
  client: Option<MpvClient>,
  command: Option<Command>,
  custom_flags: BTreeMap<String, String>,
  videos: Vec<Source>,
  audios: Vec<Source>,
  filters: Vec<FilterNode>,
  mpv_path: Option<PathBuf>,
  settle_delay: Duration,
  connect_retries: u32,
  process: Option<MpvProcess>,
  shutdown: CancellationToken,
  watchers: Vec<JoinHandle<()>>,
}

impl Session {
  /// Session on the default socket with default timing.
  pub fn new() -> Self {
    Self::from_config(&SessionConfig::default())
  }

  /// Session with one video and any number of audio tracks.
  pub fn with_sources<I, S>(video_path: impl Into<String>, audio_paths: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut session = Self::new();
    session.push_video(video_path.into());
    for path in audio_paths {
      session.push_audio(path.into());
    }
    session
  }

  pub fn with_socket_path(socket_path: impl Into<String>) -> Self {
    let mut session = Self::new();
    session.client = Some(MpvClient::with_socket_path(socket_path));
    session
  }

  pub fn from_config(config: &SessionConfig) -> Self {
    Self {
      state: SessionState::Configuring,
      client: Some(MpvClient::with_socket_path(config.socket_path.clone())),
      command: None,
      custom_flags: config.flags.clone(),
      videos: Vec::new(),
      audios: Vec::new(),
      filters: Vec::new(),
      mpv_path: config.mpv_path.clone(),
      settle_delay: config.settle_delay(),
      connect_retries: config.connect_retries,
      process: None,
      shutdown: CancellationToken::new(),
      watchers: Vec::new(),
    }
  }

  // ==========================================================================
  // Configuration
  // ==========================================================================

  fn ensure_configuring(&mut self) -> Result<(), SessionError> {
    if self.state != SessionState::Configuring {
      return Err(SessionError::AlreadyStarted);
    }
    self.command = None;
    Ok(())
  }

  fn push_video(&mut self, path: String) -> &Source {
    let id = format!("vid{}", self.videos.len() + 1);
    self.videos.push(Source { id, path });
    &self.videos[self.videos.len() - 1]
  }

  fn push_audio(&mut self, path: String) -> &Source {
    let id = format!("aid{}", self.audios.len() + 1);
    self.audios.push(Source { id, path });
    &self.audios[self.audios.len() - 1]
  }

  /// Add a video source. Videos play in the order they are added.
  pub fn add_video_source(&mut self, path: impl Into<String>) -> Result<&Source, SessionError> {
    self.ensure_configuring()?;
    Ok(self.push_video(path.into()))
  }

  /// Add an audio source. The first one is the main track.
  pub fn add_audio_source(&mut self, path: impl Into<String>) -> Result<&Source, SessionError> {
    self.ensure_configuring()?;
    Ok(self.push_audio(path.into()))
  }

  pub fn add_custom_filter(&mut self, filter: FilterNode) -> Result<(), SessionError> {
    self.ensure_configuring()?;
    self.filters.push(filter);
    Ok(())
  }

  /// Add a filter fed by every audio source and writing to the audio output.
  pub fn add_global_audio_filter(&mut self, operator: &str) -> Result<(), SessionError> {
    if self.state != SessionState::Configuring {
      return Err(SessionError::AlreadyStarted);
    }
    if self.audios.is_empty() {
      return Err(SessionError::NoAudioSources);
    }
    let mut filter = FilterNode::new(operator, self.audios.iter().map(|a| a.id.clone()));
    filter.set_target(AUDIO_SINK);
    self.add_custom_filter(filter)
  }

  /// Point both MPV and the client at another IPC socket.
  pub fn set_input_ipc_socket(&mut self, socket_path: impl Into<String>) -> Result<(), SessionError> {
    self.ensure_configuring()?;
    self.client = Some(MpvClient::with_socket_path(socket_path));
    Ok(())
  }

  /// Add a flag for MPV. An empty value is a bare switch.
  pub fn add_flag(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<(), SessionError> {
    let name = name.into();
    if name == IPC_SERVER_FLAG {
      return self.set_input_ipc_socket(value);
    }
    self.ensure_configuring()?;
    self.custom_flags.insert(name, value.into());
    Ok(())
  }

  /// Show or hide the on-screen controller.
  pub fn set_osc(&mut self, enabled: bool) -> Result<(), SessionError> {
    self.add_flag("osc", if enabled { "yes" } else { "no" })
  }

  pub fn set_no_input_default_bindings(&mut self, enabled: bool) -> Result<(), SessionError> {
    if enabled {
      self.add_flag("no-input-default-bindings", "")
    } else {
      self.ensure_configuring()?;
      self.custom_flags.remove("no-input-default-bindings");
      Ok(())
    }
  }

  pub fn video_sources(&self) -> &[Source] {
    &self.videos
  }

  pub fn audio_sources(&self) -> &[Source] {
    &self.audios
  }

  pub fn filters(&self) -> &[FilterNode] {
    &self.filters
  }

  pub fn custom_flags(&self) -> &BTreeMap<String, String> {
    &self.custom_flags
  }

  // ==========================================================================
  // Command
  // ==========================================================================

  /// Build the MPV command. The result is cached until the configuration changes.
  pub fn build_command(&mut self) -> &Command {
    if self.command.is_none() {
      self.command = Some(self.render_command());
    }
    self.command.get_or_insert_with(Command::new)
  }

  /// The cached command, if `build_command` has run since the last change.
  pub fn command(&self) -> Option<&Command> {
    self.command.as_ref()
  }

  fn render_command(&self) -> Command {
    let mut command = Command::new();
    if let Some(mpv_path) = &self.mpv_path {
      command.set_program(mpv_path.to_string_lossy());
    }

    command.add_flag(IPC_SERVER_FLAG, self.socket_path());
    for (name, value) in &self.custom_flags {
      command.add_flag(name.as_str(), value.as_str());
    }

    for (i, audio) in self.audios.iter().enumerate() {
      if i == 0 {
        command.add_flag("audio-files", audio.path.as_str());
      } else {
        command.append_flag("audio-files-append", audio.path.as_str());
      }
    }

    for video in &self.videos {
      command.add_arg(video.path.as_str());
    }

    for filter in &self.filters {
      command.append_flag("lavfi-complex", filter.to_string());
    }

    command
  }

  // ==========================================================================
  // Lifecycle
  // ==========================================================================

  pub fn state(&self) -> SessionState {
    self.state
  }

  /// The control client; `None` once the session is stopped.
  pub fn client(&self) -> Option<&MpvClient> {
    self.client.as_ref()
  }

  pub fn socket_path(&self) -> String {
    self
      .client
      .as_ref()
      .map(|c| c.socket_path().to_string())
      .unwrap_or_default()
  }

  /// PID of the running MPV process.
  pub fn pid(&self) -> Option<u32> {
    self.process.as_ref().and_then(MpvProcess::id)
  }

  pub fn has_exited(&self) -> bool {
    self.process.as_ref().map_or(true, MpvProcess::has_exited)
  }

  /// Wait for the MPV process to exit. Returns at once if none is running.
  pub async fn wait_exit(&self) -> Option<ExitStatus> {
    match &self.process {
      Some(process) => process.wait().await,
      None => None,
    }
  }

  /// Launch MPV, connect to its socket and link their lifetimes.
  ///
  /// If connecting fails MPV may be left running; call [`Session::stop`].
  pub async fn start(&mut self) -> Result<(), SessionError> {
    if self.state != SessionState::Configuring {
      return Err(SessionError::AlreadyStarted);
    }
    let client = self.client.clone().ok_or(SessionError::NotConnected)?;
    let mut command = self.build_command().clone();
    // No way back to Configuring from here, even if the launch fails.
    self.state = SessionState::Starting;

    let program = process::resolve_program(self.mpv_path.as_deref())?;
    command.set_program(program.to_string_lossy());
    let mpv = process::spawn_shell(&command.to_string())?;
    log::info!("MPV process started (pid: {:?})", mpv.id());
    self.process = Some(mpv.clone());

    // Give MPV a moment to create the socket before polling it.
    tokio::time::sleep(self.settle_delay).await;
    client
      .open_with_retries(self.connect_retries)
      .await
      .map_err(SessionError::ClientOpen)?;
    let conn = client.connection().map_err(SessionError::ClientOpen)?;

    // Connection gone: take the process down with it.
    let watch_process = mpv.clone();
    let watch_conn = conn.clone();
    let shutdown = self.shutdown.clone();
    self.watchers.push(tokio::spawn(async move {
      tokio::select! {
        _ = watch_conn.wait_until_closed() => log::info!("MPV IPC connection closed, stopping process"),
        _ = shutdown.cancelled() => log::debug!("Session shutting down, stopping process"),
      }
      if let Err(e) = watch_process.kill().await {
        log::warn!("Failed to kill MPV process: {}", e);
      }
    }));

    // Process gone: close the connection.
    let shutdown = self.shutdown.clone();
    self.watchers.push(tokio::spawn(async move {
      tokio::select! {
        status = mpv.wait() => log::info!("MPV process exited ({:?}), closing IPC connection", status),
        _ = shutdown.cancelled() => log::debug!("Session shutting down, closing IPC connection"),
      }
      if let Err(e) = conn.close().await {
        log::warn!("Failed to close MPV IPC connection: {}", e);
      }
    }));

    self.state = SessionState::Running;
    log::info!("MPV session running on {}", client.socket_path());
    Ok(())
  }

  /// Close the connection and kill MPV. Both are always attempted; the
  /// session ends up stopped whatever the outcome.
  pub async fn stop(&mut self) -> Result<(), SessionError> {
    let Some(mpv) = self.process.take() else {
      return Ok(());
    };
    let client = self.client.take();
    self.state = SessionState::Stopped;
    log::info!("Stopping MPV session (pid: {:?})", mpv.id());

    let close_result = match &client {
      Some(client) => client.close().await,
      None => Ok(()),
    };
    let kill_result = mpv.kill().await;

    self.shutdown.cancel();
    for watcher in self.watchers.drain(..) {
      if tokio::time::timeout(TEARDOWN_TIMEOUT, watcher).await.is_err() {
        log::warn!("Session watcher did not finish in time");
      }
    }
    if kill_result.is_ok() {
      match tokio::time::timeout(TEARDOWN_TIMEOUT, mpv.wait()).await {
        Ok(status) => log::info!("MPV process exited with: {:?}", status),
        Err(_) => log::warn!("MPV process did not exit within {:?}", TEARDOWN_TIMEOUT),
      }
    }
    if let Some(client) = &client {
      process::cleanup_ipc(client.socket_path());
    }

    teardown_result(close_result, kill_result)
  }
}

/// Fold the outcomes of closing the client and killing MPV into one result.
fn teardown_result(
  close: Result<(), MpvError>,
  kill: std::io::Result<()>,
) -> Result<(), SessionError> {
  match (close, kill) {
    (Ok(()), Ok(())) => Ok(()),
    (Err(close), Err(kill)) => Err(SessionError::Teardown { close, kill }),
    (Err(close), Ok(())) => Err(SessionError::ClientClose(close)),
    (Ok(()), Err(kill)) => Err(SessionError::Kill(kill)),
  }
}

impl Default for Session {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for Session {
  fn drop(&mut self) {
    // Watchers tear down whatever is still alive.
    self.shutdown.cancel();
  }
}
