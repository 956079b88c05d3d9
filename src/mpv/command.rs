//! MPV command-line builder.
//!
//! Flags keep insertion order so the rendered command is reproducible.

use std::fmt;

/// Program launched when no explicit executable is configured.
pub const DEFAULT_PROGRAM: &str = "mpv";

/// Sentinel value for switches rendered without `=value`.
pub const BOOLEAN_FLAG: &str = "true";

/// A single `--name[=value]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Flag {
  name: String,
  value: String,
}

impl Flag {
  fn render(&self) -> String {
    if self.value == BOOLEAN_FLAG {
      format!("--{}", self.name)
    } else {
      format!("--{}={}", self.name, self.value)
    }
  }
}

/// Full MPV invocation: program, flags and positional arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
  program: String,
  flags: Vec<Flag>,
  args: Vec<String>,
}

impl Command {
  pub fn new() -> Self {
    Self {
      program: DEFAULT_PROGRAM.to_string(),
      flags: Vec::new(),
      args: Vec::new(),
    }
  }

  /// Set a flag, replacing any earlier value for the same name.
  /// An empty value turns the flag into a bare switch.
  pub fn add_flag(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = normalize_value(value.into());
    match self.flags.iter_mut().find(|f| f.name == name) {
      Some(flag) => flag.value = value,
      None => self.flags.push(Flag { name, value }),
    }
  }

  /// Add another entry for a list option (e.g. `audio-files-append`).
  pub fn append_flag(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.flags.push(Flag {
      name: name.into(),
      value: normalize_value(value.into()),
    });
  }

  /// Append a positional argument. Order is kept; duplicates are allowed.
  pub fn add_arg(&mut self, arg: impl Into<String>) {
    self.args.push(arg.into());
  }

  /// Current value of a flag (first entry if it was appended several times).
  pub fn flag(&self, name: &str) -> Option<&str> {
    self
      .flags
      .iter()
      .find(|f| f.name == name)
      .map(|f| f.value.as_str())
  }

  /// All values recorded for a flag, in insertion order.
  pub fn flag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .flags
      .iter()
      .filter(move |f| f.name == name)
      .map(|f| f.value.as_str())
  }

  pub fn positional_args(&self) -> &[String] {
    &self.args
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn set_program(&mut self, program: impl Into<String>) {
    self.program = program.into();
  }

  /// Render as a token list: `[program, --flag[=value]..., arg...]`.
  pub fn args(&self) -> Vec<String> {
    let mut tokens = Vec::with_capacity(1 + self.flags.len() + self.args.len());
    tokens.push(self.program.clone());
    tokens.extend(self.flags.iter().map(Flag::render));
    tokens.extend(self.args.iter().cloned());
    tokens
  }
}

impl Default for Command {
  fn default() -> Self {
    Self::new()
  }
}

/// Shell-escaped single line, suitable for `sh -c`.
impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let line = self
      .args()
      .iter()
      .map(|token| shell_quote(token))
      .collect::<Vec<_>>()
      .join(" ");
    f.write_str(&line)
  }
}

fn normalize_value(value: String) -> String {
  if value.is_empty() {
    BOOLEAN_FLAG.to_string()
  } else {
    value
  }
}

/// Quote a token for a POSIX shell. Tokens made only of safe characters
/// are left untouched.
pub fn shell_quote(token: &str) -> String {
  let safe = !token.is_empty()
    && token
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
  if safe {
    token.to_string()
  } else {
    format!("'{}'", token.replace('\'', r"'\''"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_value_is_boolean_switch() {
    let mut cmd = Command::new();
    cmd.add_flag("idle", "");
    assert_eq!(cmd.flag("idle"), Some(BOOLEAN_FLAG));
    assert_eq!(cmd.args(), vec!["mpv", "--idle"]);
  }

  #[test]
  fn test_add_flag_overwrites_in_place() {
    let mut cmd = Command::new();
    cmd.add_flag("osc", "no");
    cmd.add_flag("volume", "50");
    cmd.add_flag("osc", "yes");
    assert_eq!(cmd.args(), vec!["mpv", "--osc=yes", "--volume=50"]);
  }

  #[test]
  fn test_append_flag_keeps_every_entry() {
    let mut cmd = Command::new();
    cmd.append_flag("audio-files-append", "b.flac");
    cmd.append_flag("audio-files-append", "c.flac");
    let values: Vec<_> = cmd.flag_values("audio-files-append").collect();
    assert_eq!(values, vec!["b.flac", "c.flac"]);
  }

  #[test]
  fn test_positional_args_follow_flags_in_order() {
    let mut cmd = Command::new();
    cmd.add_arg("one.mkv");
    cmd.add_flag("fs", "");
    cmd.add_arg("two.mkv");
    cmd.add_arg("one.mkv");
    assert_eq!(
      cmd.args(),
      vec!["mpv", "--fs", "one.mkv", "two.mkv", "one.mkv"]
    );
  }

  #[test]
  fn test_render_is_idempotent() {
    let mut cmd = Command::new();
    cmd.add_flag("input-ipc-server", "/tmp/mpv_socket");
    cmd.add_flag("b", "2");
    cmd.add_flag("a", "1");
    cmd.add_arg("video.mp4");
    assert_eq!(cmd.args(), cmd.args());
    assert_eq!(cmd.to_string(), cmd.to_string());
  }

  #[test]
  fn test_display_quotes_unsafe_tokens() {
    let mut cmd = Command::new();
    cmd.add_flag("lavfi-complex", "[aid1] [aid2] amix [ao]");
    cmd.add_arg("it's here.mkv");
    assert_eq!(
      cmd.to_string(),
      r#"mpv '--lavfi-complex=[aid1] [aid2] amix [ao]' 'it'\''s here.mkv'"#
    );
  }

  #[test]
  fn test_set_program() {
    let mut cmd = Command::new();
    cmd.set_program("/usr/local/bin/mpv");
    cmd.add_arg("a.mp4");
    assert_eq!(cmd.program(), "/usr/local/bin/mpv");
    assert_eq!(cmd.to_string(), "/usr/local/bin/mpv a.mp4");
  }

  #[test]
  fn test_shell_quote_empty() {
    assert_eq!(shell_quote(""), "''");
  }
}
