//! Tool dispatch: argument parsing, validation, execution and step recording

use std::collections::HashMap;
use std::sync::Arc;

use tally_ai::ToolCall;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::events::AgentEvent;
use crate::step::{AgentStep, StepKind, StepRecorder, StepStatus};
use crate::tool::{BoxedTool, ProgressSender, to_api_tool};

/// Text fed back to the model for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub content: String,
    pub is_error: bool,
}

impl Observation {
    fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Routes tool calls to the declared tools
pub struct ToolDispatcher {
    tools: Vec<BoxedTool>,
    /// Cached compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl ToolDispatcher {
    pub fn new(tools: Vec<BoxedTool>) -> Self {
        let mut schema_cache = HashMap::new();
        for tool in &tools {
            let schema = tool.parameters_schema();
            match jsonschema::validator_for(&schema) {
                Ok(validator) => {
                    schema_cache.insert(tool.name().to_string(), Arc::new(validator));
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid tool parameter schema for '{}', skipping validation: {}",
                        tool.name(),
                        e
                    );
                }
            }
        }
        Self {
            tools,
            schema_cache,
        }
    }

    /// Declarations sent with every request
    pub fn api_tools(&self) -> Vec<tally_ai::Tool> {
        self.tools.iter().map(|t| to_api_tool(t.as_ref())).collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Run one call, recording its action and observation steps.
    ///
    /// Never fails: every problem becomes an error observation the model can
    /// react to.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        steps: &StepRecorder,
        event_tx: &broadcast::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Observation {
        let arguments = match parse_arguments(&call.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                tracing::warn!("Malformed arguments for {}: {}", call.name, e);
                steps.push(AgentStep::action(&call.name, &call.arguments, StepStatus::Error));
                let observation = Observation::error(format!(
                    "Invalid arguments for {}: {}. Arguments must be a JSON object.",
                    call.name, e
                ));
                steps.push(AgentStep::observation(&observation.content, StepStatus::Error));
                return observation;
            }
        };

        steps.push(AgentStep::action(
            &call.name,
            describe_action(&arguments),
            StepStatus::Complete,
        ));

        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            let observation = Observation::error(format!(
                "Unknown tool: {}. Available tools: {}",
                call.name,
                self.tool_names().join(", ")
            ));
            steps.push(AgentStep::observation(&observation.content, StepStatus::Error));
            return observation;
        };

        if let Some(err) = self
            .schema_cache
            .get(call.name.as_str())
            .and_then(|validator| validate_with_validator(&arguments, validator))
        {
            steps.push(AgentStep::observation(&err, StepStatus::Error));
            return Observation::error(err);
        }

        tracing::info!("Executing tool {} ({})", call.name, call.id);
        steps.begin(StepKind::Observation);
        let progress = ProgressSender::new(event_tx.clone(), &call.id, &call.name)
            .with_steps(steps.clone());
        let result = tool
            .execute_with_progress(&call.id, arguments, cancel.clone(), progress)
            .await;

        let status = if result.is_error {
            StepStatus::Error
        } else {
            StepStatus::Complete
        };
        steps.resolve_tail(&result.content, status, result.result);
        Observation {
            content: result.content,
            is_error: result.is_error,
        }
    }
}

/// Parse argument text into a JSON object; blank text means no arguments
fn parse_arguments(raw: &str) -> Result<serde_json::Value, String> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err("expected a JSON object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Human-readable action content: the SQL text if present, else the arguments
fn describe_action(arguments: &serde_json::Value) -> String {
    match arguments.get("query").and_then(|q| q.as_str()) {
        Some(query) => query.to_string(),
        None => arguments.to_string(),
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::QueryResult;
    use crate::testing::{MemorySchema, orders_table};
    use crate::tool::{Tool, ToolResult};
    use crate::tools::{SCHEMA_TOOL, SchemaTool};
    use async_trait::async_trait;
    use serde_json::json;

    struct QueryTool;

    #[async_trait]
    impl Tool for QueryTool {
        fn name(&self) -> &str {
            "run_sql"
        }
        fn description(&self) -> &str {
            "Runs SQL"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            })
        }
        async fn execute(
            &self,
            _tool_call_id: &str,
            _arguments: serde_json::Value,
            _cancel: CancellationToken,
        ) -> ToolResult {
            ToolResult::text("1 row").with_result(QueryResult::rows(vec!["n".into()], vec![]))
        }
    }

    fn dispatcher() -> ToolDispatcher {
        let schema = MemorySchema {
            tables: vec![orders_table()],
        };
        let tools: Vec<BoxedTool> = vec![
            Arc::new(QueryTool),
            Arc::new(SchemaTool::new(Arc::new(schema))),
        ];
        ToolDispatcher::new(tools)
    }

    async fn run(call: ToolCall) -> (Observation, Vec<AgentStep>) {
        let (tx, _rx) = broadcast::channel(64);
        let steps = StepRecorder::new(tx.clone());
        let observation = dispatcher()
            .dispatch(&call, &steps, &tx, &CancellationToken::new())
            .await;
        (observation, steps.snapshot())
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments(r#"{"query":"SELECT 1"}"#).unwrap()["query"], "SELECT 1");
        assert!(parse_arguments("[1, 2]").is_err());
        assert!(parse_arguments("{\"query\": ").is_err());
    }

    #[tokio::test]
    async fn test_malformed_arguments_record_error_steps() {
        let (observation, steps) = run(ToolCall::new("call_1", "run_sql", "{\"query\": SELECT")).await;

        assert!(observation.is_error);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].kind, StepKind::Action);
        assert_eq!(steps[0].status, StepStatus::Error);
        assert_eq!(steps[0].content, "{\"query\": SELECT");
        assert_eq!(steps[1].kind, StepKind::Observation);
        assert_eq!(steps[1].status, StepStatus::Error);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (observation, steps) = run(ToolCall::new("call_1", "drop_table", "{}")).await;
        assert!(observation.is_error);
        assert!(observation.content.starts_with("Unknown tool: drop_table"));
        assert_eq!(steps[1].status, StepStatus::Error);
    }

    #[tokio::test]
    async fn test_schema_validation_failure() {
        let (observation, steps) = run(ToolCall::new("call_1", "run_sql", r#"{"query": 5}"#)).await;
        assert!(observation.is_error);
        assert!(observation.content.starts_with("Tool argument validation failed"));
        assert_eq!(steps.len(), 2);
    }

    #[tokio::test]
    async fn test_successful_call_records_result() {
        let (observation, steps) =
            run(ToolCall::new("call_1", "run_sql", r#"{"query": "SELECT COUNT(*) AS n FROM t_1"}"#))
                .await;
        assert!(!observation.is_error);
        assert_eq!(steps[0].content, "SELECT COUNT(*) AS n FROM t_1");
        assert_eq!(steps[0].tool_name.as_deref(), Some("run_sql"));
        assert_eq!(steps[1].content, "1 row");
        assert_eq!(steps[1].status, StepStatus::Complete);
        assert!(steps[1].result.is_some());
    }

    #[tokio::test]
    async fn test_schema_tool_accepts_empty_arguments() {
        let (observation, _) = run(ToolCall::new("call_1", SCHEMA_TOOL, "")).await;
        assert!(observation.content.starts_with("Table t_1"));
    }

    #[test]
    fn test_api_tools_follow_registration_order() {
        let names: Vec<String> = dispatcher().api_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["run_sql", SCHEMA_TOOL]);
    }
}
