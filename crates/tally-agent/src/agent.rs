//! The session loop: stream a turn, dispatch its tool calls, repeat until answered

use std::sync::Arc;

use futures::StreamExt;
use tally_ai::{Message, MessageEvent, Model};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    compression::{CompressionConfig, Compressor},
    conversation::Conversation,
    data::{QueryEngine, SchemaProvider},
    dispatch::ToolDispatcher,
    error::{Error, Result},
    events::{AgentEvent, SessionOutcome},
    handle::AgentHandle,
    parser::{ParsedTurn, StreamParser},
    prompt::build_system_prompt,
    rescue::rescue_tool_call,
    step::{AgentStep, StepKind, StepRecorder, StepStatus},
    tool::BoxedTool,
    tools::{RunSqlTool, SchemaTool},
    transport::{RunConfig, Transport},
};

/// Default iteration budget per session
pub const MAX_ITERATIONS: u32 = 50;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use
    pub model: Model,
    /// Credential for the completion endpoint; required
    pub api_key: Option<String>,
    /// Sampling temperature for the main loop
    pub temperature: Option<f32>,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
    /// Iteration budget per session
    pub max_iterations: u32,
    /// Settings for result compression calls
    pub compression: CompressionConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: Model::new(DEFAULT_MODEL),
            api_key: None,
            temperature: Some(0.1),
            max_tokens: None,
            max_iterations: MAX_ITERATIONS,
            compression: CompressionConfig::default(),
        }
    }
}

/// The agent that answers questions over the loaded tables
pub struct Agent {
    config: AgentConfig,
    transport: Arc<dyn Transport>,
    engine: Arc<dyn QueryEngine>,
    schema: Arc<dyn SchemaProvider>,
    conversation: Conversation,
    event_tx: broadcast::Sender<AgentEvent>,
    handle: AgentHandle,
    span: Option<tracing::Span>,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn QueryEngine>,
        schema: Arc<dyn SchemaProvider>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            transport,
            engine,
            schema,
            conversation: Conversation::default(),
            event_tx,
            handle: AgentHandle::new(),
            span: None,
        }
    }

    /// Run every session inside `span` instead of a fresh `session` span
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    /// Get the agent config
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Message history of the last session
    pub fn messages(&self) -> &[Message] {
        &self.conversation.messages
    }

    /// Get a cloneable handle for controlling the agent from external code.
    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Abort the current session
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Whether the agent loop is currently running.
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Answer one question in a fresh session.
    ///
    /// Returns `Err` only for configuration problems and cancellation; a
    /// session that fails mid-way ends with [`SessionOutcome::Failed`].
    pub async fn ask(&mut self, question: &str) -> Result<SessionOutcome> {
        if self
            .config
            .api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
        {
            return Err(Error::Configuration(
                "no API key configured; set OPENAI_API_KEY or add one to the config file"
                    .to_string(),
            ));
        }

        let span = self.span.clone().unwrap_or_else(|| {
            tracing::info_span!("session", id = %uuid::Uuid::new_v4().simple())
        });
        let cancel = self.handle.start();
        let result = self.run_session(question, cancel).instrument(span).await;
        self.handle.finish();
        result
    }

    /// Tools for one session; `run_sql` compresses with the session's question
    fn build_tools(&self, question: &str, run_config: &RunConfig) -> Vec<BoxedTool> {
        let compressor = Compressor::new(
            Arc::clone(&self.transport),
            run_config,
            &self.config.compression,
        );
        let schema_tool: BoxedTool = Arc::new(SchemaTool::new(Arc::clone(&self.schema)));
        let sql_tool: BoxedTool =
            Arc::new(RunSqlTool::new(Arc::clone(&self.engine), compressor, question));
        vec![schema_tool, sql_tool]
    }

    async fn run_session(
        &mut self,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome> {
        let tables = self.schema.tables().await;
        let mut run_config = RunConfig {
            system_prompt: Some(build_system_prompt(&tables)),
            tools: vec![],
            model: self.config.model.clone(),
            api_key: self.config.api_key.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let dispatcher = ToolDispatcher::new(self.build_tools(question, &run_config));
        run_config.tools = dispatcher.api_tools();

        self.conversation = Conversation::start(question);
        let steps = StepRecorder::new(self.event_tx.clone());
        let _ = self.event_tx.send(AgentEvent::SessionStart {
            question: question.to_string(),
        });
        tracing::info!("Session started with {} tables", tables.len());

        let mut iteration = 0u32;
        let result = loop {
            if cancel.is_cancelled() {
                steps.push(AgentStep::thought("Cancelled", StepStatus::Error));
                break Err(Error::Cancelled);
            }
            if iteration >= self.config.max_iterations {
                tracing::warn!("Iteration budget of {} exhausted", self.config.max_iterations);
                break Ok(SessionOutcome::IterationsExhausted);
            }
            iteration += 1;
            tracing::info!(iteration, "Iteration started");
            let _ = self.event_tx.send(AgentEvent::IterationStart { iteration });

            steps.begin(StepKind::Thought);
            let turn = match self.stream_turn(&run_config, &steps, &cancel).await {
                Ok(turn) => turn,
                Err(e) if e.is_cancelled() => {
                    steps.fail_tail("Cancelled");
                    break Err(Error::Cancelled);
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!("Iteration {} failed: {}", iteration, message);
                    steps.fail_tail(&message);
                    let _ = self.event_tx.send(AgentEvent::Error {
                        message: message.clone(),
                    });
                    break Ok(SessionOutcome::Failed(message));
                }
            };
            steps.complete_tail();

            let ParsedTurn {
                text,
                mut tool_calls,
            } = turn;
            if tool_calls.is_empty() {
                tool_calls.extend(rescue_tool_call(&text));
            }

            if !tool_calls.is_empty() {
                self.conversation
                    .push(Message::assistant_tool_calls(Some(text), tool_calls.clone()));
                for call in &tool_calls {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let observation = dispatcher
                        .dispatch(call, &steps, &self.event_tx, &cancel)
                        .await;
                    self.conversation
                        .push(Message::tool(&call.id, &call.name, observation.content));
                }
                continue;
            }

            let answer = text.trim();
            if answer.is_empty() {
                tracing::debug!("Iteration {} produced neither text nor tool calls", iteration);
                continue;
            }

            let _ = self.event_tx.send(AgentEvent::FinalAnswer {
                answer: answer.to_string(),
            });
            self.conversation.push(Message::assistant(answer));
            break Ok(SessionOutcome::Answered(answer.to_string()));
        };

        let outcome = match &result {
            Ok(outcome) => outcome.clone(),
            Err(e) => {
                let _ = self.event_tx.send(AgentEvent::Error {
                    message: e.to_string(),
                });
                SessionOutcome::Failed(e.to_string())
            }
        };
        tracing::info!(iterations = iteration, "Session ended: {:?}", outcome);
        let _ = self.event_tx.send(AgentEvent::SessionEnd {
            outcome,
            iterations: iteration,
            usage: self.conversation.total_usage.clone(),
        });

        result
    }

    /// Stream one model turn into the open thought step
    async fn stream_turn(
        &mut self,
        run_config: &RunConfig,
        steps: &StepRecorder,
        cancel: &CancellationToken,
    ) -> Result<ParsedTurn> {
        let mut stream = self
            .transport
            .stream(self.conversation.messages.clone(), run_config, cancel.clone())
            .await?;
        let mut parser = StreamParser::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                event = stream.next() => event,
            };
            match event {
                Some(MessageEvent::Delta(delta)) => {
                    if parser.push(&delta) {
                        steps.update_tail(parser.text());
                    }
                }
                Some(MessageEvent::Done {
                    finish_reason,
                    usage,
                }) => {
                    tracing::debug!("Stream finished: {:?}", finish_reason);
                    if let Some(usage) = usage {
                        self.conversation.total_usage.add(&usage);
                    }
                    break;
                }
                Some(MessageEvent::Error { message }) => {
                    return Err(Error::Other(format!("Stream error: {}", message)));
                }
                None => break,
            }
        }

        let streamed_len = parser.text().len();
        let turn = parser.finish();
        if turn.text.len() != streamed_len {
            steps.update_tail(turn.text.as_str());
        }
        Ok(turn)
    }
}
