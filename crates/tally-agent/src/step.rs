//! Agent steps: the thought/action/observation log of one session.
//!
//! The log is append-only. Only the tail may change, and only while it is
//! [`StepStatus::Streaming`]; once it is complete or failed it is frozen.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::data::QueryResult;
use crate::events::AgentEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Thought,
    Action,
    Observation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Streaming,
    Complete,
    Error,
}

impl StepStatus {
    /// Whether the step can no longer change
    pub fn is_final(&self) -> bool {
        !matches!(self, StepStatus::Streaming)
    }
}

/// One entry in the step log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: String,
    pub kind: StepKind,
    pub content: String,
    pub status: StepStatus,
    /// Tool invoked, for action steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Structured query result, for observation steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<QueryResult>,
    pub timestamp: i64,
}

impl AgentStep {
    fn new(kind: StepKind, content: impl Into<String>, status: StepStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            status,
            tool_name: None,
            result: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn thought(content: impl Into<String>, status: StepStatus) -> Self {
        Self::new(StepKind::Thought, content, status)
    }

    pub fn action(tool_name: impl Into<String>, content: impl Into<String>, status: StepStatus) -> Self {
        let mut step = Self::new(StepKind::Action, content, status);
        step.tool_name = Some(tool_name.into());
        step
    }

    pub fn observation(content: impl Into<String>, status: StepStatus) -> Self {
        Self::new(StepKind::Observation, content, status)
    }

    pub fn with_result(mut self, result: Option<QueryResult>) -> Self {
        self.result = result;
        self
    }
}

/// Why a tail mutation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepLogError {
    /// The log has no steps
    Empty,
    /// The tail already reached a final status
    Frozen,
}

/// Ordered step log with a mutable streaming tail
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    steps: Vec<AgentStep>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[AgentStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&AgentStep> {
        self.steps.last()
    }

    /// Append a step. A still-streaming tail is completed first.
    pub fn push(&mut self, step: AgentStep) {
        if let Some(tail) = self.steps.last_mut() {
            if !tail.status.is_final() {
                tail.status = StepStatus::Complete;
            }
        }
        self.steps.push(step);
    }

    /// Append an empty streaming step of the given kind
    pub fn begin(&mut self, kind: StepKind) {
        self.push(AgentStep::new(kind, String::new(), StepStatus::Streaming));
    }

    /// Replace the content of the streaming tail
    pub fn update_tail(&mut self, content: impl Into<String>) -> Result<(), StepLogError> {
        let tail = self.streaming_tail()?;
        tail.content = content.into();
        Ok(())
    }

    /// Move the streaming tail to `Complete`
    pub fn complete_tail(&mut self) -> Result<(), StepLogError> {
        self.streaming_tail()?.status = StepStatus::Complete;
        Ok(())
    }

    /// Move the streaming tail to `Error`, replacing its content with the message
    pub fn fail_tail(&mut self, message: impl Into<String>) -> Result<(), StepLogError> {
        let tail = self.streaming_tail()?;
        tail.content = message.into();
        tail.status = StepStatus::Error;
        Ok(())
    }

    /// Finish the streaming tail with its final content, status and result
    pub fn resolve_tail(
        &mut self,
        content: impl Into<String>,
        status: StepStatus,
        result: Option<QueryResult>,
    ) -> Result<(), StepLogError> {
        let tail = self.streaming_tail()?;
        tail.content = content.into();
        tail.result = result;
        tail.status = if status.is_final() {
            status
        } else {
            StepStatus::Complete
        };
        Ok(())
    }

    fn streaming_tail(&mut self) -> Result<&mut AgentStep, StepLogError> {
        let tail = self.steps.last_mut().ok_or(StepLogError::Empty)?;
        if tail.status.is_final() {
            return Err(StepLogError::Frozen);
        }
        Ok(tail)
    }
}

/// A step log shared by the loop and running tools.
///
/// Every successful change publishes a [`AgentEvent::StepsUpdated`] snapshot.
/// Refused tail mutations are logged and not published.
#[derive(Clone)]
pub struct StepRecorder {
    log: Arc<Mutex<StepLog>>,
    tx: broadcast::Sender<AgentEvent>,
}

impl StepRecorder {
    pub fn new(tx: broadcast::Sender<AgentEvent>) -> Self {
        Self {
            log: Arc::new(Mutex::new(StepLog::new())),
            tx,
        }
    }

    /// Copy of the current steps
    pub fn snapshot(&self) -> Vec<AgentStep> {
        self.log.lock().steps().to_vec()
    }

    pub fn push(&self, step: AgentStep) {
        self.apply(|log| {
            log.push(step);
            Ok(())
        });
    }

    pub fn begin(&self, kind: StepKind) {
        self.apply(|log| {
            log.begin(kind);
            Ok(())
        });
    }

    pub fn update_tail(&self, content: impl Into<String>) {
        let content = content.into();
        self.apply(|log| log.update_tail(content));
    }

    pub fn complete_tail(&self) {
        self.apply(StepLog::complete_tail);
    }

    pub fn fail_tail(&self, message: impl Into<String>) {
        let message = message.into();
        self.apply(|log| log.fail_tail(message));
    }

    pub fn resolve_tail(
        &self,
        content: impl Into<String>,
        status: StepStatus,
        result: Option<QueryResult>,
    ) {
        let content = content.into();
        self.apply(|log| log.resolve_tail(content, status, result));
    }

    fn apply(&self, change: impl FnOnce(&mut StepLog) -> Result<(), StepLogError>) {
        let steps = {
            let mut log = self.log.lock();
            if let Err(e) = change(&mut log) {
                tracing::debug!("Step log refused mutation: {:?}", e);
                return;
            }
            log.steps().to_vec()
        };
        let _ = self.tx.send(AgentEvent::StepsUpdated { steps });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_tail_updates_then_freezes() {
        let mut log = StepLog::new();
        log.begin(StepKind::Thought);
        log.update_tail("Let me").unwrap();
        log.update_tail("Let me check").unwrap();
        log.complete_tail().unwrap();

        assert_eq!(log.last().unwrap().content, "Let me check");
        assert_eq!(log.update_tail("changed"), Err(StepLogError::Frozen));
        assert_eq!(log.fail_tail("nope"), Err(StepLogError::Frozen));
        assert_eq!(log.last().unwrap().status, StepStatus::Complete);
    }

    #[test]
    fn test_empty_log_rejects_mutation() {
        let mut log = StepLog::new();
        assert_eq!(log.update_tail("x"), Err(StepLogError::Empty));
    }

    #[test]
    fn test_push_completes_streaming_tail() {
        let mut log = StepLog::new();
        log.begin(StepKind::Thought);
        log.push(AgentStep::action("run_sql", "SELECT 1", StepStatus::Complete));
        assert_eq!(log.steps()[0].status, StepStatus::Complete);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_push_keeps_error_tail() {
        let mut log = StepLog::new();
        log.begin(StepKind::Thought);
        log.fail_tail("stream broke").unwrap();
        log.push(AgentStep::thought("next", StepStatus::Complete));
        assert_eq!(log.steps()[0].status, StepStatus::Error);
        assert_eq!(log.steps()[0].content, "stream broke");
    }

    #[test]
    fn test_only_tail_is_mutable() {
        let mut log = StepLog::new();
        log.begin(StepKind::Observation);
        log.update_tail("batch 1/3").unwrap();
        log.begin(StepKind::Thought);
        log.update_tail("thinking").unwrap();
        assert_eq!(log.steps()[0].content, "batch 1/3");
        assert_eq!(log.steps()[0].status, StepStatus::Complete);
    }

    #[test]
    fn test_action_carries_tool_name() {
        let step = AgentStep::action("get_database_schema", "{}", StepStatus::Complete);
        assert_eq!(step.kind, StepKind::Action);
        assert_eq!(step.tool_name.as_deref(), Some("get_database_schema"));
    }

    #[test]
    fn test_resolve_tail_attaches_result() {
        let mut log = StepLog::new();
        log.begin(StepKind::Observation);
        let result = QueryResult::rows(vec!["n".into()], vec![]);
        log.resolve_tail("0 rows", StepStatus::Complete, Some(result.clone()))
            .unwrap();
        let tail = log.last().unwrap();
        assert_eq!(tail.content, "0 rows");
        assert_eq!(tail.result, Some(result));
        assert_eq!(tail.status, StepStatus::Complete);
    }

    #[tokio::test]
    async fn test_recorder_publishes_snapshots() {
        let (tx, mut rx) = broadcast::channel(16);
        let recorder = StepRecorder::new(tx);

        recorder.begin(StepKind::Thought);
        recorder.update_tail("Looking");
        recorder.complete_tail();
        // frozen tail: refused, nothing published
        recorder.update_tail("ignored");

        let mut snapshots = vec![];
        while let Ok(AgentEvent::StepsUpdated { steps }) = rx.try_recv() {
            snapshots.push(steps);
        }
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[1][0].content, "Looking");
        assert_eq!(snapshots[2][0].status, StepStatus::Complete);
        assert_eq!(recorder.snapshot()[0].content, "Looking");
    }
}
