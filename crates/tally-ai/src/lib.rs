//! tally-ai: chat-completion client for the tally orchestrator
//!
//! This crate speaks the OpenAI-compatible chat completions protocol, both
//! streamed (content and tool-call fragments) and non-streamed.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{MessageEvent, MessageEventStream, StreamDelta, ToolCallDelta};
pub use types::*;
