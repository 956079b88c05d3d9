//! Filter graph nodes for `--lavfi-complex`.

use std::fmt;

/// Label of MPV's audio output pad.
pub const AUDIO_SINK: &str = "ao";

/// Label of MPV's video output pad.
pub const VIDEO_SINK: &str = "vo";

/// One filter operation with its input pads and output pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterNode {
  operator: String,
  inputs: Vec<String>,
  output: String,
}

impl FilterNode {
  /// Create a node reading from `inputs` and writing to the audio sink.
  pub fn new<I, S>(operator: impl Into<String>, inputs: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      operator: operator.into(),
      inputs: inputs.into_iter().map(Into::into).collect(),
      output: AUDIO_SINK.to_string(),
    }
  }

  pub fn set_target(&mut self, target: impl Into<String>) {
    self.output = target.into();
  }

  pub fn push_input(&mut self, label: impl Into<String>) {
    self.inputs.push(label.into());
  }

  pub fn operator(&self) -> &str {
    &self.operator
  }

  pub fn inputs(&self) -> &[String] {
    &self.inputs
  }

  pub fn output(&self) -> &str {
    &self.output
  }
}

/// Renders `[in1] [in2] operator [out]`, or the bare operator with no inputs.
/// Labels are not escaped.
impl fmt::Display for FilterNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.inputs.is_empty() {
      return f.write_str(&self.operator);
    }
    for input in &self.inputs {
      write!(f, "[{}] ", input)?;
    }
    write!(f, "{} [{}]", self.operator, self.output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_no_inputs_renders_bare_operator() {
    let node = FilterNode::new("anull", Vec::<String>::new());
    assert_eq!(node.to_string(), "anull");
  }

  #[test]
  fn test_inputs_render_with_default_sink() {
    let node = FilterNode::new("loudnorm", ["aid1", "aid2"]);
    assert_eq!(node.output(), AUDIO_SINK);
    assert_eq!(node.to_string(), "[aid1] [aid2] loudnorm [ao]");
  }

  #[test]
  fn test_set_target_and_push_input() {
    let mut node = FilterNode::new("hstack", ["vid1"]);
    node.push_input("vid2");
    node.set_target(VIDEO_SINK);
    assert_eq!(node.to_string(), "[vid1] [vid2] hstack [vo]");
  }
}
