//! Launch and supervise an MPV process, controlling it over its JSON IPC socket.
//!
//! ```no_run
//! # async fn run() -> Result<(), mpv_session::SessionError> {
//! use mpv_session::Session;
//!
//! let mut session = Session::with_sources("movie.mkv", ["commentary.flac"]);
//! session.add_global_audio_filter("loudnorm")?;
//! session.start().await?;
//! if let Some(client) = session.client() {
//!   let _ = client.pause().await;
//! }
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod mpv;

pub use config::{ConfigError, SessionConfig};
pub use mpv::*;
