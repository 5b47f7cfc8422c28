use futures::StreamExt;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::accumulator::{MessageAccumulator, PendingToolCall, ToolCallAccumulator};
use super::error::ChatError;
use super::parser::{ChatChunk, StreamEvent, StreamParser, Usage};
use super::sink::{escape_newlines, Sink};
use crate::config::ApiConfig;
use crate::session::types::{Message, MessageRole, ToolCallDescriptor};
use crate::tools::{ToolDefinition, ToolError, ToolInvoker, TOOL_FAILURE_FALLBACK};

pub const MAX_TOOL_CALL_DEPTH: u32 = 5;

/// Outcome of one request/response cycle. `messages` is the history that
/// was sent plus everything this round produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundResult {
    pub final_text: String,
    pub has_pending_tool_calls: bool,
    pub depth: u32,
    pub request_tokens: u64,
    pub response_tokens: u64,
    pub messages: Vec<Message>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct RequestMessage<'a> {
    role: MessageRole,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<&'a [ToolCallDescriptor]>,
}

impl<'a> From<&'a Message> for RequestMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            role: msg.role,
            content: &msg.content,
            tool_call_id: msg.tool_call_id.as_deref().filter(|id| !id.is_empty()),
            tool_calls: msg.tool_calls.as_deref(),
        }
    }
}

pub struct StreamClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    tools: Vec<ToolDefinition>,
    invoker: Arc<dyn ToolInvoker>,
}

impl StreamClient {
    pub fn new(api: &ApiConfig, tools: Vec<ToolDefinition>, invoker: Arc<dyn ToolInvoker>) -> Self {
        Self {
            client: Client::new(),
            api_url: api.api_url.clone(),
            api_key: api.api_key.clone(),
            model: api.model.clone(),
            tools,
            invoker,
        }
    }

    pub fn build_request_body(&self, history: &[Message]) -> Result<Vec<u8>, ChatError> {
        let request = ChatRequest {
            model: &self.model,
            messages: history.iter().map(RequestMessage::from).collect(),
            stream: true,
            tools: self.tools.iter().map(ToolDefinition::to_openai_schema).collect(),
        };
        Ok(serde_json::to_vec(&request)?)
    }

    /// Runs one round: sends `history`, streams text to `sink`, and resolves
    /// any tool calls the model asked for once the stream terminates.
    pub async fn streaming_call(
        &self,
        history: &[Message],
        sink: &mut dyn Sink,
        previous: &RoundResult,
        cancel: &CancellationToken,
    ) -> Result<RoundResult, ChatError> {
        let depth = previous.depth + 1;
        if depth > MAX_TOOL_CALL_DEPTH {
            warn!(depth, max = MAX_TOOL_CALL_DEPTH, "Refusing to start round");
            return Err(ChatError::DepthExceeded {
                depth,
                max: MAX_TOOL_CALL_DEPTH,
            });
        }

        let body = self.build_request_body(history)?;
        debug!(
            depth,
            message_count = history.len(),
            tools_count = self.tools.len(),
            body_len = body.len(),
            "Sending chat request"
        );

        let request = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            response = request => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let mut round = Round::new(history);
        let mut parser = StreamParser::new();
        let mut stream = response.bytes_stream();
        let mut terminated = false;

        'read: loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::Cancelled),
                next = stream.next() => next,
            };

            let events = match next {
                Some(chunk) => parser.parse_chunk(&chunk?),
                None => {
                    if let Some(event) = parser.finish() {
                        terminated = round.apply(event, sink).await;
                    }
                    break 'read;
                }
            };

            for event in events {
                if round.apply(event, sink).await {
                    terminated = true;
                    break 'read;
                }
            }
        }

        let request_tokens = previous.request_tokens + round.usage.prompt();
        let response_tokens = previous.response_tokens + round.usage.completion();
        let final_text = round.text.full_text().to_string();

        if let Some(msg) = round.text.finish() {
            round.messages.push(msg);
        }

        let calls = std::mem::take(&mut round.calls).into_calls();
        if terminated && !calls.is_empty() {
            for call in &calls {
                let output = self.resolve(call).await?;
                round
                    .messages
                    .push(Message::tool_call_record(call.descriptor()));
                round.messages.push(Message::tool_result(&call.id, output));
            }

            info!(
                depth,
                tool_calls = calls.len(),
                request_tokens,
                response_tokens,
                "Round finished with tool calls"
            );
            return Ok(RoundResult {
                final_text,
                has_pending_tool_calls: true,
                depth,
                request_tokens,
                response_tokens,
                messages: round.messages,
            });
        }

        if terminated {
            if let Err(e) = sink.done().await {
                warn!(error = %e, "Sink failed to accept completion");
            }
        } else {
            if !calls.is_empty() {
                warn!(
                    dropped = calls.len(),
                    "Stream ended without terminal frame, dropping tool calls"
                );
            }
            debug!("Stream ended without terminal frame");
        }

        info!(
            depth,
            frames = round.frames,
            text_len = final_text.len(),
            request_tokens,
            response_tokens,
            "Round finished"
        );

        Ok(RoundResult {
            final_text,
            has_pending_tool_calls: false,
            depth,
            request_tokens,
            response_tokens,
            messages: round.messages,
        })
    }

    async fn resolve(&self, call: &PendingToolCall) -> Result<String, ChatError> {
        match self.invoker.invoke(call, &self.tools).await {
            Ok(output) => Ok(output),
            Err(ToolError::NotFound(name)) => Err(ChatError::UnknownTool(name)),
            Err(ToolError::InvalidArguments(reason)) => Err(ChatError::ToolArguments(reason)),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                Ok(TOOL_FAILURE_FALLBACK.to_string())
            }
        }
    }
}

/// Per-round mutable state. Owned by a single `streaming_call`.
struct Round {
    messages: Vec<Message>,
    text: MessageAccumulator,
    calls: ToolCallAccumulator,
    usage: Usage,
    frames: u32,
}

impl Round {
    fn new(history: &[Message]) -> Self {
        Self {
            messages: history.to_vec(),
            text: MessageAccumulator::new(),
            calls: ToolCallAccumulator::new(),
            usage: Usage::default(),
            frames: 0,
        }
    }

    /// Returns true once the terminal frame has been seen.
    async fn apply(&mut self, event: StreamEvent, sink: &mut dyn Sink) -> bool {
        match event {
            StreamEvent::Ignored => false,
            StreamEvent::Done => true,
            StreamEvent::Malformed(reason) => {
                warn!(reason = %reason, "Skipping malformed frame");
                false
            }
            StreamEvent::Chunk(chunk) => {
                self.frames += 1;
                self.on_chunk(chunk, sink).await;
                false
            }
        }
    }

    async fn on_chunk(&mut self, chunk: ChatChunk, sink: &mut dyn Sink) {
        if let Some(usage) = chunk.usage {
            self.usage.merge(usage);
        }

        if let Some(call) = chunk.first_tool_call() {
            self.calls.accept(call);
        }

        if let Some(content) = chunk.content() {
            if let Err(e) = sink.write(&escape_newlines(content)).await {
                warn!(error = %e, frame = self.frames, "Sink rejected chunk");
            }
            if let Some(msg) = self.text.push(content) {
                self.messages.push(msg);
            }
        }
    }
}
