//! Plain-text rendering of agent events

use tally_agent::{AgentEvent, AgentStep, SessionOutcome, StepKind, StepStatus};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::utils::truncate_chars;

/// Characters of an observation shown unless full output is requested
const OBSERVATION_PREVIEW: usize = 300;

/// Prints each step once it stops changing.
///
/// Steps are append-only and frozen once final, so a step can be printed as
/// soon as it is final and never needs revisiting.
pub struct StepPrinter {
    full_observations: bool,
    printed: usize,
}

impl StepPrinter {
    pub fn new(full_observations: bool) -> Self {
        Self {
            full_observations,
            printed: 0,
        }
    }

    pub fn handle(&mut self, event: &AgentEvent) {
        for line in self.lines(event) {
            println!("{}", line);
        }
        if let AgentEvent::ToolProgress { content, .. } = event {
            eprintln!("[{}]", content);
        }
    }

    /// Handle everything still queued. Lagging skips the lost events and
    /// keeps going. Returns how many events were handled.
    pub fn drain(&mut self, receiver: &mut broadcast::Receiver<AgentEvent>) -> usize {
        let mut handled = 0;
        loop {
            match receiver.try_recv() {
                Ok(event) => {
                    self.handle(&event);
                    handled += 1;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!("Event printer skipped {} events", skipped);
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return handled,
            }
        }
    }

    /// Lines to print for an event; advances the printed-step cursor
    fn lines(&mut self, event: &AgentEvent) -> Vec<String> {
        match event {
            AgentEvent::SessionStart { .. } => {
                self.printed = 0;
                vec![]
            }
            AgentEvent::StepsUpdated { steps } => {
                let mut lines = vec![];
                for step in steps.iter().skip(self.printed) {
                    if !step.status.is_final() {
                        break;
                    }
                    self.printed += 1;
                    if let Some(line) = self.format_step(step) {
                        lines.push(line);
                    }
                }
                lines
            }
            AgentEvent::SessionEnd { usage, iterations, .. } => vec![format!(
                "[{} iterations | Tokens: {} in, {} out]",
                iterations, usage.input, usage.output
            )],
            _ => vec![],
        }
    }

    fn format_step(&self, step: &AgentStep) -> Option<String> {
        let content = step.content.trim();
        let marker = if step.status == StepStatus::Error {
            " (failed)"
        } else {
            ""
        };
        match step.kind {
            StepKind::Thought if content.is_empty() => None,
            StepKind::Thought => Some(format!("Thought{}: {}", marker, content)),
            StepKind::Action => Some(format!(
                "Action{}: {}({})",
                marker,
                step.tool_name.as_deref().unwrap_or("?"),
                content
            )),
            StepKind::Observation => {
                let content = if self.full_observations {
                    content.to_string()
                } else {
                    truncate_chars(content, OBSERVATION_PREVIEW)
                };
                Some(format!("Observation{}: {}", marker, content))
            }
        }
    }
}

/// Print how a session ended
pub fn print_outcome(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Answered(answer) => println!("\n{}\n", answer),
        SessionOutcome::IterationsExhausted => {
            eprintln!("No answer within the iteration budget.")
        }
        SessionOutcome::Failed(message) => eprintln!("Error: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_ai::Usage;

    fn steps(steps: Vec<AgentStep>) -> AgentEvent {
        AgentEvent::StepsUpdated { steps }
    }

    #[test]
    fn test_prints_final_steps_once() {
        let mut printer = StepPrinter::new(false);
        let thought = AgentStep::thought("Need totals", StepStatus::Complete);
        let action = AgentStep::action("run_sql", "SELECT 1", StepStatus::Complete);
        let pending = AgentStep::observation("", StepStatus::Streaming);

        let lines = printer.lines(&steps(vec![thought.clone(), action.clone(), pending]));
        assert_eq!(lines, vec!["Thought: Need totals", "Action: run_sql(SELECT 1)"]);

        let done = AgentStep::observation("1 row", StepStatus::Complete);
        let lines = printer.lines(&steps(vec![thought, action, done]));
        assert_eq!(lines, vec!["Observation: 1 row"]);
    }

    #[test]
    fn test_empty_thoughts_and_failures() {
        let mut printer = StepPrinter::new(false);
        let lines = printer.lines(&steps(vec![
            AgentStep::thought("", StepStatus::Complete),
            AgentStep::observation("no such table: t_9", StepStatus::Error),
        ]));
        assert_eq!(lines, vec!["Observation (failed): no such table: t_9"]);
    }

    #[test]
    fn test_observation_preview_is_truncated() {
        let long = "x".repeat(OBSERVATION_PREVIEW + 10);
        let event = steps(vec![AgentStep::observation(&long, StepStatus::Complete)]);

        let short = StepPrinter::new(false).lines(&event);
        assert!(short[0].ends_with("..."));
        let full = StepPrinter::new(true).lines(&event);
        assert!(full[0].ends_with(&long));
    }

    #[test]
    fn test_session_start_resets_cursor() {
        let mut printer = StepPrinter::new(false);
        let event = steps(vec![AgentStep::thought("a", StepStatus::Complete)]);
        assert_eq!(printer.lines(&event).len(), 1);
        assert!(printer.lines(&event).is_empty());

        printer.lines(&AgentEvent::SessionStart {
            question: "again".into(),
        });
        assert_eq!(printer.lines(&event).len(), 1);
    }

    #[test]
    fn test_drain_continues_past_lag() {
        let (tx, mut rx) = broadcast::channel(2);
        tx.send(AgentEvent::SessionStart { question: "q".into() }).unwrap();
        tx.send(steps(vec![AgentStep::thought("a", StepStatus::Complete)])).unwrap();
        tx.send(AgentEvent::FinalAnswer { answer: "42".into() }).unwrap();
        tx.send(AgentEvent::SessionEnd {
            outcome: SessionOutcome::Answered("42".into()),
            iterations: 1,
            usage: Usage::default(),
        })
        .unwrap();

        let mut printer = StepPrinter::new(false);
        assert_eq!(printer.drain(&mut rx), 2);
        assert_eq!(printer.drain(&mut rx), 0);
    }

    #[test]
    fn test_session_end_summary() {
        let lines = StepPrinter::new(false).lines(&AgentEvent::SessionEnd {
            outcome: SessionOutcome::IterationsExhausted,
            iterations: 3,
            usage: Usage { input: 30, output: 12 },
        });
        assert_eq!(lines, vec!["[3 iterations | Tokens: 30 in, 12 out]"]);
    }
}
