//! Test doubles shared by the module tests

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use tally_ai::{
    Error, FinishReason, Message, MessageEvent, MessageEventStream, Result, StreamDelta, Usage,
};
use tokio_util::sync::CancellationToken;

use crate::data::{QueryEngine, QueryResult, Row, SchemaProvider, TableSchema};
use crate::transport::{RunConfig, Transport};

/// One scripted streaming turn
pub enum Turn {
    Events(Vec<MessageEvent>),
    Fail(Error),
    /// A stream that never yields
    Hang,
}

impl Turn {
    /// A turn that streams `text` as a single delta
    pub fn text(text: &str) -> Self {
        Turn::Events(vec![MessageEvent::Delta(StreamDelta::text(text)), done()])
    }

    /// A turn that emits the given `(id, name, arguments)` calls
    pub fn calls(calls: &[(&str, &str, &str)]) -> Self {
        let mut events: Vec<MessageEvent> = calls
            .iter()
            .enumerate()
            .map(|(index, (id, name, args))| {
                MessageEvent::Delta(StreamDelta::tool_call(
                    index,
                    Some(*id),
                    Some(*name),
                    Some(*args),
                ))
            })
            .collect();
        events.push(done());
        Turn::Events(events)
    }

    fn clone_events(&self) -> Option<Vec<MessageEvent>> {
        match self {
            Turn::Events(events) => Some(events.clone()),
            Turn::Fail(_) | Turn::Hang => None,
        }
    }
}

pub fn done() -> MessageEvent {
    MessageEvent::Done {
        finish_reason: Some(FinishReason::Stop),
        usage: Some(Usage { input: 10, output: 5 }),
    }
}

/// Transport that replays scripted turns and completions
#[derive(Default)]
pub struct MockTransport {
    turns: Mutex<VecDeque<Turn>>,
    repeat: Option<Turn>,
    completions: Mutex<VecDeque<Result<String>>>,
    /// Message history of every streamed request
    pub stream_requests: Mutex<Vec<Vec<Message>>>,
    /// Settings of every streamed request
    pub stream_configs: Mutex<Vec<RunConfig>>,
    /// User prompt of every completion request
    pub completion_prompts: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn(self, turn: Turn) -> Self {
        self.turns.lock().push_back(turn);
        self
    }

    /// Turn replayed once the scripted turns run out
    pub fn repeat(mut self, turn: Turn) -> Self {
        self.repeat = Some(turn);
        self
    }

    pub fn completion(self, result: Result<String>) -> Self {
        self.completions.lock().push_back(result);
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn stream(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        _cancel: CancellationToken,
    ) -> Result<MessageEventStream> {
        self.stream_requests.lock().push(messages);
        self.stream_configs.lock().push(config.clone());
        let turn = self.turns.lock().pop_front();
        let events = match turn {
            Some(Turn::Events(events)) => events,
            Some(Turn::Fail(e)) => return Err(e),
            Some(Turn::Hang) => return Ok(Box::pin(tokio_stream::pending())),
            None => self
                .repeat
                .as_ref()
                .and_then(Turn::clone_events)
                .unwrap_or_else(|| vec![done()]),
        };
        Ok(Box::pin(tokio_stream::iter(events)))
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        _config: &RunConfig,
        _cancel: CancellationToken,
    ) -> Result<String> {
        let prompt = messages
            .iter()
            .filter_map(Message::text)
            .collect::<Vec<_>>()
            .join("\n");
        self.completion_prompts.lock().push(prompt);
        self.completions
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::UnexpectedResponse("no scripted completion".into())))
    }
}

/// Query engine answering from a fixed table of SQL to results
#[derive(Default)]
pub struct MemoryEngine {
    results: Mutex<Vec<(String, QueryResult)>>,
    /// Every statement received, after sanitizing
    pub executed: Mutex<Vec<String>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, sql: &str, result: QueryResult) -> Self {
        self.results.lock().push((sql.to_string(), result));
        self
    }
}

#[async_trait]
impl QueryEngine for MemoryEngine {
    async fn execute_sql(&self, sql: &str) -> QueryResult {
        self.executed.lock().push(sql.to_string());
        self.results
            .lock()
            .iter()
            .find(|(known, _)| known == sql)
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| QueryResult::failed(format!("no such statement: {}", sql)))
    }
}

/// Schema provider over a fixed table list
#[derive(Default)]
pub struct MemorySchema {
    pub tables: Vec<TableSchema>,
}

#[async_trait]
impl SchemaProvider for MemorySchema {
    async fn tables(&self) -> Vec<TableSchema> {
        self.tables.clone()
    }
}

pub fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("row fixture must be an object"),
    }
}

pub fn numbered_rows(n: usize) -> Vec<Row> {
    (0..n).map(|i| row(serde_json::json!({ "id": i }))).collect()
}

pub fn orders_table() -> TableSchema {
    TableSchema {
        safe_name: "t_1".into(),
        source_label: Some("orders.xlsx / Sheet1".into()),
        columns: vec!["id".into(), "城市".into(), "金额".into()],
        row_count: 3,
        sample_rows: vec![],
    }
}
