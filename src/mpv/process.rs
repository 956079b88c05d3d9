//! MPV process detection, spawning and supervision.

use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("MPV executable not found: {0}")]
  NotFound(String),
  #[error("Failed to spawn MPV: {0}")]
  SpawnFailed(#[from] io::Error),
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  // Check PATH first
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(target_os = "macos")]
  {
    let common_paths = [
      "/usr/local/bin/mpv",
      "/opt/homebrew/bin/mpv",
      "/Applications/mpv.app/Contents/MacOS/mpv",
    ];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  #[cfg(target_os = "linux")]
  {
    let common_paths = ["/usr/bin/mpv", "/usr/local/bin/mpv", "/snap/bin/mpv"];
    for path in common_paths {
      let p = PathBuf::from(path);
      if p.exists() {
        return Some(p);
      }
    }
  }

  None
}

/// Resolve the executable to launch: an explicit path or name is looked up
/// as given, otherwise MPV is searched for.
pub fn resolve_program(explicit: Option<&Path>) -> Result<PathBuf, ProcessError> {
  match explicit {
    Some(program) => {
      which::which(program).map_err(|_| ProcessError::NotFound(program.display().to_string()))
    }
    None => find_mpv().ok_or_else(|| ProcessError::NotFound("mpv".to_string())),
  }
}

/// Spawn a shell running `command_line`, with the shell replaced by the
/// program so signals reach it directly.
pub fn spawn_shell(command_line: &str) -> Result<MpvProcess, ProcessError> {
  log::info!("Starting MPV with command: {}", command_line);

  let child = Command::new("sh")
    .arg("-c")
    .arg(format!("exec {}", command_line))
    .stdin(Stdio::null())
    .stdout(Stdio::inherit())
    .stderr(Stdio::inherit())
    .kill_on_drop(true)
    .spawn()?;

  Ok(MpvProcess::supervise(child))
}

/// Remove a stale socket file left by a previous MPV instance.
pub fn cleanup_ipc(path: &str) {
  let Ok(metadata) = std::fs::symlink_metadata(path) else {
    return;
  };
  if !metadata.file_type().is_socket() {
    log::debug!("Leaving {} in place, it is not a socket", path);
    return;
  }
  match std::fs::remove_file(path) {
    Ok(()) => log::debug!("Removed stale IPC socket {}", path),
    Err(e) => log::warn!("Failed to remove stale IPC socket {}: {}", path, e),
  }
}

type KillRequest = oneshot::Sender<io::Result<()>>;

/// Handle to a supervised MPV child.
///
/// The child itself lives in a supervisor task that waits for it to exit and
/// services kill requests, so any number of clones can kill or await it. When
/// every clone is dropped the child is killed.
#[derive(Debug, Clone)]
pub struct MpvProcess {
  pid: Option<u32>,
  kill_tx: mpsc::Sender<KillRequest>,
  exit_rx: watch::Receiver<Option<ExitStatus>>,
}

impl MpvProcess {
  fn supervise(mut child: Child) -> Self {
    let pid = child.id();
    let (kill_tx, mut kill_rx) = mpsc::channel::<KillRequest>(4);
    let (exit_tx, exit_rx) = watch::channel(None);

    tokio::spawn(async move {
      let mut handles_alive = true;
      loop {
        tokio::select! {
          status = child.wait() => {
            match status {
              Ok(status) => {
                log::info!("MPV process (pid: {:?}) exited with: {}", pid, status);
                let _ = exit_tx.send(Some(status));
              }
              Err(e) => log::error!("wait() failed for MPV process (pid: {:?}): {}", pid, e),
            }
            break;
          }
          request = kill_rx.recv(), if handles_alive => {
            let result = child.start_kill();
            match request {
              Some(reply) => {
                log::info!("Killing MPV process (pid: {:?})", pid);
                let _ = reply.send(result);
              }
              None => {
                log::debug!("All MPV process handles dropped, killing pid {:?}", pid);
                handles_alive = false;
              }
            }
          }
        }
      }
    });

    Self {
      pid,
      kill_tx,
      exit_rx,
    }
  }

  /// A handle whose kill requests all fail and which never exits.
  #[cfg(test)]
  pub(crate) fn unkillable(pid: u32) -> Self {
    let (kill_tx, mut kill_rx) = mpsc::channel::<KillRequest>(4);
    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(async move {
      let _exit_tx = exit_tx;
      while let Some(reply) = kill_rx.recv().await {
        let _ = reply.send(Err(io::Error::new(
          io::ErrorKind::PermissionDenied,
          "operation not permitted",
        )));
      }
    });
    Self {
      pid: Some(pid),
      kill_tx,
      exit_rx,
    }
  }

  /// OS process id, if the child was still running when spawned.
  pub fn id(&self) -> Option<u32> {
    self.pid
  }

  /// Forcibly terminate the process. Killing a process that has already
  /// exited succeeds.
  pub async fn kill(&self) -> io::Result<()> {
    let (tx, rx) = oneshot::channel();
    if self.kill_tx.send(tx).await.is_err() {
      return Ok(());
    }
    rx.await.unwrap_or(Ok(()))
  }

  /// Wait for the process to exit. Returns `None` if its status could not
  /// be collected.
  pub async fn wait(&self) -> Option<ExitStatus> {
    let mut rx = self.exit_rx.clone();
    if rx.wait_for(Option::is_some).await.is_err() {
      log::debug!("MPV supervisor ended without an exit status (pid: {:?})", self.pid);
    }
    let status = *rx.borrow();
    status
  }

  /// Exit status, if the process has exited.
  pub fn try_status(&self) -> Option<ExitStatus> {
    *self.exit_rx.borrow()
  }

  pub fn has_exited(&self) -> bool {
    self.try_status().is_some() || self.kill_tx.is_closed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn test_resolve_missing_program() {
    let err = resolve_program(Some(Path::new("/nonexistent/dir/mpv"))).unwrap_err();
    assert!(matches!(err, ProcessError::NotFound(_)));
  }

  #[test]
  fn test_resolve_explicit_program_on_path() {
    let sh = resolve_program(Some(Path::new("sh"))).unwrap();
    assert!(sh.is_absolute());
  }

  #[tokio::test]
  async fn test_wait_reports_exit() {
    let process = spawn_shell("true").unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
      .await
      .unwrap()
      .unwrap();
    assert!(status.success());
    assert!(process.has_exited());
  }

  #[tokio::test]
  async fn test_kill_terminates_and_is_idempotent() {
    let process = spawn_shell("sleep 30").unwrap();
    assert!(process.id().is_some());
    assert!(!process.has_exited());

    process.kill().await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
      .await
      .unwrap()
      .unwrap();
    assert!(!status.success());

    // The process is gone; killing again is fine.
    process.kill().await.unwrap();
  }

  #[tokio::test]
  async fn test_clones_share_the_child() {
    let process = spawn_shell("sleep 30").unwrap();
    let watcher = process.clone();
    let waiter = tokio::spawn(async move { watcher.wait().await });

    process.kill().await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), waiter)
      .await
      .unwrap()
      .unwrap();
    assert!(status.is_some());
  }

  #[test]
  fn test_cleanup_ipc_removes_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stale.sock");
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());
    cleanup_ipc(&path.to_string_lossy());
    assert!(!path.exists());
  }

  #[test]
  fn test_cleanup_ipc_keeps_regular_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"keep me").unwrap();
    cleanup_ipc(&path.to_string_lossy());
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");

    // Missing paths are ignored.
    cleanup_ipc(&dir.path().join("missing.sock").to_string_lossy());
  }

  #[tokio::test]
  async fn test_unkillable_reports_kill_error() {
    let process = MpvProcess::unkillable(1);
    let err = process.kill().await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    assert!(!process.has_exited());
  }
}
