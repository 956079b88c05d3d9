use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mpv_session::{FilterNode, MpvClient, Session, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "mpv-session", version, about = "Launch and control MPV over its IPC socket")]
struct Cli {
  /// Config file (defaults to <config dir>/mpv-session/config.json).
  #[arg(long, global = true, env = "MPV_SESSION_CONFIG")]
  config: Option<PathBuf>,

  /// IPC socket path, overriding the config.
  #[arg(long, global = true)]
  socket: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Play videos (in order) with optional extra audio tracks.
  Play {
    #[arg(required = true)]
    videos: Vec<String>,

    /// Audio file; the first is the main track, the rest are appended.
    #[arg(long = "audio")]
    audios: Vec<String>,

    /// Filter applied across every audio track, e.g. `loudnorm`.
    #[arg(long)]
    audio_filter: Option<String>,

    /// Raw filter node: OPERATOR[:INPUT,INPUT...][>OUTPUT].
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Extra MPV flag as NAME or NAME=VALUE.
    #[arg(long = "flag")]
    flags: Vec<String>,

    /// Hide the on-screen controller.
    #[arg(long)]
    no_osc: bool,

    /// Disable MPV's built-in key bindings.
    #[arg(long)]
    no_input_default_bindings: bool,
  },
  /// Print the path MPV is currently playing.
  Path,
  /// Pause playback.
  Pause,
}

#[tokio::main]
async fn main() -> Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let cli = Cli::parse();
  let mut config = match &cli.config {
    Some(path) => SessionConfig::load(path)?,
    None => SessionConfig::load_default()?,
  };
  if let Some(socket) = cli.socket {
    config.socket_path = socket;
  }

  match cli.command {
    Commands::Play {
      videos,
      audios,
      audio_filter,
      filters,
      flags,
      no_osc,
      no_input_default_bindings,
    } => {
      let mut session = Session::from_config(&config);
      for video in videos {
        session.add_video_source(video)?;
      }
      for audio in audios {
        session.add_audio_source(audio)?;
      }
      if let Some(operator) = audio_filter {
        session.add_global_audio_filter(&operator)?;
      }
      for spec in &filters {
        session.add_custom_filter(parse_filter(spec))?;
      }
      for flag in &flags {
        let (name, value) = flag.split_once('=').unwrap_or((flag.as_str(), ""));
        session.add_flag(name, value)?;
      }
      if no_osc {
        session.set_osc(false)?;
      }
      if no_input_default_bindings {
        session.set_no_input_default_bindings(true)?;
      }

      play(session).await
    }
    Commands::Path => {
      let client = connect(&config).await?;
      println!("{}", client.get_path().await.context("failed to get path")?);
      Ok(())
    }
    Commands::Pause => {
      let client = connect(&config).await?;
      client.pause().await.context("failed to pause")?;
      Ok(())
    }
  }
}

async fn play(mut session: Session) -> Result<()> {
  if let Err(e) = session.start().await {
    // A failed connect can leave MPV running.
    if let Err(stop_err) = session.stop().await {
      log::warn!("Failed to stop MPV session after start error: {}", stop_err);
    }
    return Err(e).context("failed to start session");
  }

  tokio::select! {
    status = session.wait_exit() => log::info!("MPV finished: {:?}", status),
    _ = tokio::signal::ctrl_c() => log::info!("Interrupted, stopping MPV"),
  }

  session.stop().await.context("failed to stop session")?;
  Ok(())
}

async fn connect(config: &SessionConfig) -> Result<MpvClient> {
  let client = MpvClient::with_socket_path(config.socket_path.clone());
  client
    .open()
    .await
    .with_context(|| format!("failed to connect to {}", client.socket_path()))?;
  Ok(client)
}

/// Parse `OPERATOR[:IN,IN...][>OUT]`.
fn parse_filter(spec: &str) -> FilterNode {
  let (rest, output) = match spec.split_once('>') {
    Some((rest, output)) => (rest, Some(output)),
    None => (spec, None),
  };
  let (operator, inputs) = rest.split_once(':').unwrap_or((rest, ""));
  let mut node = FilterNode::new(
    operator,
    inputs.split(',').filter(|s| !s.is_empty()),
  );
  if let Some(output) = output {
    node.set_target(output);
  }
  node
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_filter() {
    assert_eq!(parse_filter("anull").to_string(), "anull");
    assert_eq!(
      parse_filter("amix:aid1,aid2").to_string(),
      "[aid1] [aid2] amix [ao]"
    );
    assert_eq!(
      parse_filter("hstack:vid1,vid2>vo").to_string(),
      "[vid1] [vid2] hstack [vo]"
    );
  }

  #[test]
  fn test_cli_parses_play() {
    let cli = Cli::try_parse_from([
      "mpv-session",
      "--socket",
      "/tmp/x.sock",
      "play",
      "a.mkv",
      "b.mkv",
      "--audio",
      "c.flac",
      "--audio-filter",
      "loudnorm",
      "--flag",
      "fs",
    ])
    .unwrap();
    assert_eq!(cli.socket.as_deref(), Some("/tmp/x.sock"));
    match cli.command {
      Commands::Play {
        videos,
        audios,
        audio_filter,
        flags,
        ..
      } => {
        assert_eq!(videos, vec!["a.mkv", "b.mkv"]);
        assert_eq!(audios, vec!["c.flac"]);
        assert_eq!(audio_filter.as_deref(), Some("loudnorm"));
        assert_eq!(flags, vec!["fs"]);
      }
      other => panic!("unexpected command: {other:?}"),
    }
  }
}
