//! tally-agent: the question-answering loop over tabular data
//!
//! A session streams model turns, runs the tool calls they contain
//! (`get_database_schema`, `run_sql`) against an external query engine, and
//! feeds the observations back until the model answers. Large results are
//! condensed by folding them through the model batch by batch.

pub mod agent;
pub mod batching;
pub mod compression;
pub mod conversation;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handle;
pub mod parser;
pub mod prompt;
pub mod rescue;
pub mod sanitize;
pub mod step;
pub mod tool;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentConfig, MAX_ITERATIONS};
pub use compression::{CompressionConfig, Compressor};
pub use conversation::Conversation;
pub use data::{QueryEngine, QueryResult, Row, SchemaProvider, TableSchema};
pub use error::{Error, Result};
pub use events::{AgentEvent, SessionOutcome};
pub use handle::AgentHandle;
pub use step::{AgentStep, StepKind, StepStatus};
pub use tool::{ProgressSender, Tool, ToolResult};
pub use transport::{ProviderTransport, RateLimitConfig, RetryConfig, RunConfig, Transport};
