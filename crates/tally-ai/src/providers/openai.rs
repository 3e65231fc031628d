//! OpenAI-compatible Chat Completions API provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::LlmProvider;
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream, StreamDelta, ToolCallDelta},
    types::{CompletionOptions, Context, FinishReason, Message, Model, Usage},
};

/// Chat completions client
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAIProvider {
    /// Create a new provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Create from the `OPENAI_API_KEY` environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = super::get_api_key(None, "OPENAI_API_KEY")?;
        Ok(Self::new(api_key))
    }

    fn request_builder(&self, model: &Model, body: &ChatRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", model.base_url);
        self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &CompletionOptions,
    ) -> Result<MessageEventStream> {
        let request = build_request(model, context, options, true);
        let event_source = EventSource::new(self.request_builder(model, &request))
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        tracing::debug!(model = %model.id, messages = request.messages.len(), "opening completion stream");
        Ok(Box::pin(create_stream(event_source)))
    }

    async fn complete(
        &self,
        model: &Model,
        context: &Context,
        options: &CompletionOptions,
    ) -> Result<String> {
        let request = build_request(model, context, options, false);
        let response = self.request_builder(model, &request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            let text = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status.as_u16(), text, retry_after));
        }

        let body: ChatResponse = response.json().await?;
        extract_completion_text(body)
    }
}

/// Build the wire request for a context
fn build_request(
    model: &Model,
    context: &Context,
    options: &CompletionOptions,
    stream: bool,
) -> ChatRequest {
    let mut messages = Vec::new();

    if let Some(ref system_prompt) = context.system_prompt {
        messages.push(WireMessage {
            role: "system".to_string(),
            content: Some(system_prompt.clone()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    messages.extend(context.messages.iter().map(convert_message));

    let tools: Option<Vec<WireTool>> = if context.tools.is_empty() {
        None
    } else {
        Some(
            context
                .tools
                .iter()
                .map(|t| WireTool {
                    tool_type: "function".to_string(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    },
                })
                .collect(),
        )
    };

    // Tool selection is always left to the model
    let tool_choice = tools.as_ref().map(|_| "auto".to_string());
    // Usage is only reported on a stream when asked for
    let stream_options = stream.then_some(StreamOptions {
        include_usage: true,
    });

    ChatRequest {
        model: model.id.clone(),
        messages,
        stream,
        stream_options,
        max_tokens: options.max_tokens.or(model.max_tokens),
        temperature: options.temperature,
        tools,
        tool_choice,
    }
}

fn convert_message(msg: &Message) -> WireMessage {
    match msg {
        Message::System { content } => WireMessage {
            role: "system".to_string(),
            content: Some(content.clone()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        },
        Message::User { content, .. } => WireMessage {
            role: "user".to_string(),
            content: Some(content.clone()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        },
        Message::Assistant {
            content,
            tool_calls,
            ..
        } => WireMessage {
            role: "assistant".to_string(),
            content: content.clone(),
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(
                    tool_calls
                        .iter()
                        .map(|tc| WireToolCall {
                            id: tc.id.clone(),
                            call_type: "function".to_string(),
                            function: WireFunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: None,
            name: None,
        },
        Message::Tool {
            tool_call_id,
            tool_name,
            content,
            ..
        } => WireMessage {
            role: "tool".to_string(),
            content: Some(content.clone()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
            name: Some(tool_name.clone()),
        },
    }
}

/// Translate one streamed chunk into deltas, without merging anything
fn convert_chunk(chunk: StreamChunk) -> (Vec<StreamDelta>, Option<FinishReason>, Option<Usage>) {
    let mut deltas = Vec::new();
    let mut finish_reason = None;

    for choice in chunk.choices {
        let tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallDelta {
                index: tc.index.unwrap_or(0),
                id: tc.id,
                name: tc.function.as_ref().and_then(|f| f.name.clone()),
                arguments: tc.function.and_then(|f| f.arguments),
            })
            .collect();

        let delta = StreamDelta {
            content: choice.delta.content,
            tool_calls,
        };
        if !delta.is_empty() {
            deltas.push(delta);
        }

        if let Some(reason) = choice.finish_reason.as_deref().and_then(FinishReason::parse) {
            finish_reason = Some(reason);
        }
    }

    let usage = chunk.usage.map(|u| Usage {
        input: u.prompt_tokens,
        output: u.completion_tokens,
    });

    (deltas, finish_reason, usage)
}

fn extract_completion_text(body: ChatResponse) -> Result<String> {
    let text = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(Error::UnexpectedResponse(
            "completion returned no text content".to_string(),
        ));
    }
    Ok(text)
}

fn create_stream(mut event_source: EventSource) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut finish_reason: Option<FinishReason> = None;
        let mut usage: Option<Usage> = None;

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            let (deltas, reason, chunk_usage) = convert_chunk(chunk);
                            for delta in deltas {
                                yield MessageEvent::Delta(delta);
                            }
                            if reason.is_some() {
                                finish_reason = reason;
                            }
                            if chunk_usage.is_some() {
                                usage = chunk_usage;
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok());
                    let body = response.text().await.unwrap_or_default();
                    let error = Error::from_status(status.as_u16(), body, retry_after);
                    yield MessageEvent::Error { message: error.to_string() };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }

        event_source.close();
        yield MessageEvent::Done { finish_reason, usage };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

// Non-streaming response types

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: WireDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
