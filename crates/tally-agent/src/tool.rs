//! Tool trait and execution

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::data::QueryResult;
use crate::events::AgentEvent;
use crate::step::StepRecorder;

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Observation text returned to the model
    pub content: String,
    /// Whether the execution resulted in an error
    pub is_error: bool,
    /// Structured query result, shown alongside the observation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            is_error: false,
            result: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            result: None,
        }
    }

    /// Attach the structured query result
    pub fn with_result(mut self, result: QueryResult) -> Self {
        self.result = Some(result);
        self
    }
}

/// A sender for tool progress updates during execution.
///
/// Each update goes out as [`AgentEvent::ToolProgress`] and, when a step
/// recorder is attached, replaces the content of the streaming observation.
#[derive(Clone)]
pub struct ProgressSender {
    tx: broadcast::Sender<AgentEvent>,
    tool_call_id: String,
    tool_name: String,
    steps: Option<StepRecorder>,
}

impl ProgressSender {
    /// Create a new progress sender for a specific tool invocation.
    pub fn new(
        tx: broadcast::Sender<AgentEvent>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            tx,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            steps: None,
        }
    }

    /// Mirror progress into the streaming tail of a step log
    pub fn with_steps(mut self, steps: StepRecorder) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Send a progress update.
    pub fn send(&self, content: impl Into<String>) {
        let content = content.into();
        if let Some(steps) = &self.steps {
            steps.update_tail(content.clone());
        }
        let _ = self.tx.send(AgentEvent::ToolProgress {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
            content,
        });
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments
    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult;

    /// Execute the tool with progress reporting support.
    ///
    /// Default implementation ignores the progress sender and delegates to `execute()`.
    async fn execute_with_progress(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
        _progress: ProgressSender,
    ) -> ToolResult {
        self.execute(tool_call_id, arguments, cancel).await
    }
}

/// Type alias for a boxed tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a tally_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> tally_ai::Tool {
    tally_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{StepKind, StepStatus};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                }
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            let text = arguments
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)");
            ToolResult::text(text)
        }
    }

    #[tokio::test]
    async fn test_execute_with_progress_default_delegates() {
        let tool = EchoTool;
        let (tx, _rx) = broadcast::channel(16);
        let progress = ProgressSender::new(tx, "call_1", "echo");
        let args = serde_json::json!({"text": "hello"});

        let result = tool
            .execute_with_progress("call_1", args, CancellationToken::new(), progress)
            .await;

        assert!(!result.is_error);
        assert_eq!(result.content, "hello");
    }

    #[tokio::test]
    async fn test_progress_sender_emits_events() {
        let (tx, mut rx) = broadcast::channel(16);
        let sender = ProgressSender::new(tx, "call_42", "run_sql");

        sender.send("Compressed batch 1/2 (10 rows)");

        match rx.recv().await.unwrap() {
            AgentEvent::ToolProgress {
                tool_call_id,
                tool_name,
                content,
            } => {
                assert_eq!(tool_call_id, "call_42");
                assert_eq!(tool_name, "run_sql");
                assert_eq!(content, "Compressed batch 1/2 (10 rows)");
            }
            other => panic!("expected ToolProgress, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_updates_streaming_observation() {
        let (tx, _rx) = broadcast::channel(64);
        let steps = StepRecorder::new(tx.clone());
        steps.begin(StepKind::Observation);
        let sender = ProgressSender::new(tx, "call_1", "run_sql").with_steps(steps.clone());

        sender.send("batch 1/3");
        sender.send("batch 2/3");

        let snapshot = steps.snapshot();
        assert_eq!(snapshot[0].content, "batch 2/3");
        assert_eq!(snapshot[0].status, StepStatus::Streaming);
    }

    #[test]
    fn test_tool_result_error() {
        let r = ToolResult::error("bad");
        assert!(r.is_error);
        assert_eq!(r.content, "bad");
        assert!(r.result.is_none());
    }

    #[test]
    fn test_to_api_tool() {
        let api_tool = to_api_tool(&EchoTool);
        assert_eq!(api_tool.name, "echo");
        assert_eq!(api_tool.description, "Echoes input");
    }
}
