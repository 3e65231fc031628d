//! Agent event types

use serde::{Deserialize, Serialize};
use tally_ai::Usage;

use crate::step::AgentStep;

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The model produced a final answer
    Answered(String),
    /// The iteration budget ran out before a final answer
    IterationsExhausted,
    /// A transport or stream failure ended the session
    Failed(String),
}

impl SessionOutcome {
    pub fn answer(&self) -> Option<&str> {
        match self {
            SessionOutcome::Answered(answer) => Some(answer),
            _ => None,
        }
    }
}

/// Events emitted during a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Session started processing a question
    SessionStart { question: String },

    /// A new iteration started
    IterationStart { iteration: u32 },

    /// The step log changed; carries the full current log
    StepsUpdated { steps: Vec<AgentStep> },

    /// Progress reported by a running tool
    ToolProgress {
        tool_call_id: String,
        tool_name: String,
        content: String,
    },

    /// The final answer; sent at most once per session
    FinalAnswer { answer: String },

    /// Session finished
    SessionEnd {
        outcome: SessionOutcome,
        iterations: u32,
        usage: Usage,
    },

    /// Error occurred
    Error { message: String },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::SessionEnd { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_answer() {
        assert_eq!(SessionOutcome::Answered("42".into()).answer(), Some("42"));
        assert_eq!(SessionOutcome::IterationsExhausted.answer(), None);
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = AgentEvent::FinalAnswer {
            answer: "done".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "final_answer");
    }
}
