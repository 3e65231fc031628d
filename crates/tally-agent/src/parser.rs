//! Streaming response assembly
//!
//! Deltas arrive one at a time. Text fragments are concatenated in order;
//! tool-call fragments are merged by their stream index into partial calls
//! that are frozen into [`ToolCall`]s when the stream ends.

use std::collections::BTreeMap;

use tally_ai::{StreamDelta, ToolCall};

/// Closing markup some models leak around tool-call text
pub const STRAY_MARKUP: &[&str] = &[
    "</tool_call>",
    "</function_call>",
    "</function>",
    "<|tool_call_end|>",
    "<|tool_calls_section_end|>",
    "<|im_end|>",
];

/// Remove stray closing markup from a text fragment
pub fn strip_markup(fragment: &str) -> String {
    STRAY_MARKUP
        .iter()
        .fold(fragment.to_string(), |acc, token| acc.replace(token, ""))
}

/// Generate an id for a call the stream did not name
pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// What one streamed turn produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Accumulates one turn of streamed output
#[derive(Debug, Default)]
pub struct StreamParser {
    text: String,
    /// Keyed by stream index; the server picks the indices
    calls: BTreeMap<usize, PartialCall>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta. Returns true if the visible text grew.
    pub fn push(&mut self, delta: &StreamDelta) -> bool {
        let mut grew = false;
        if let Some(content) = delta.content.as_deref() {
            let cleaned = strip_markup(content);
            if !cleaned.is_empty() {
                self.text.push_str(&cleaned);
                grew = true;
            }
        }

        for fragment in &delta.tool_calls {
            let call = self.calls.entry(fragment.index).or_default();
            if let Some(id) = fragment.id.as_deref().filter(|id| !id.is_empty()) {
                call.id = Some(id.to_string());
            }
            if let Some(name) = fragment.name.as_deref() {
                call.name.push_str(name);
            }
            if let Some(arguments) = fragment.arguments.as_deref() {
                call.arguments.push_str(arguments);
            }
        }
        grew
    }

    /// Text accumulated so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Freeze the turn. Calls keep their index order; unnamed ids are generated.
    ///
    /// Markup is stripped again over the whole text, since a token can be
    /// split across deltas.
    pub fn finish(self) -> ParsedTurn {
        let tool_calls = self
            .calls
            .into_values()
            .map(|call| ToolCall {
                id: call.id.unwrap_or_else(new_call_id),
                name: call.name.trim().to_string(),
                arguments: call.arguments,
            })
            .collect();

        ParsedTurn {
            text: strip_markup(&self.text),
            tool_calls,
        }
    }
}
