use tracing::{debug, warn};

use super::parser::ToolCallDelta;
use crate::session::types::{Message, ToolCallDescriptor};

const MESSAGE_BOUNDARY: &str = "\n\n";

/// Cuts streamed assistant text into messages. A boundary is crossed whenever
/// the raw text buffered since the previous boundary ends with a blank line.
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    buffer: String,
    full_text: String,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: &str) -> Option<Message> {
        self.buffer.push_str(text);
        self.full_text.push_str(text);

        if self.buffer.ends_with(MESSAGE_BOUNDARY) {
            let content = std::mem::take(&mut self.buffer);
            return Some(Message::assistant(content));
        }
        None
    }

    /// Flushes any text that never reached a boundary.
    pub fn finish(&mut self) -> Option<Message> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(Message::assistant(std::mem::take(&mut self.buffer)))
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Everything pushed this round, boundaries included.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl PendingToolCall {
    pub fn descriptor(&self) -> ToolCallDescriptor {
        ToolCallDescriptor::function(&self.id, &self.name, &self.arguments)
    }
}

/// Rebuilds function calls from streamed fragments: a named fragment opens a
/// call, an unnamed one extends the most recently opened call's arguments.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, delta: &ToolCallDelta) {
        if let Some(name) = delta.name() {
            let id = delta
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", cuid2::create_id()));
            debug!(id = %id, name = %name, "Tool call started");
            self.calls.push(PendingToolCall {
                id,
                name: name.to_string(),
                arguments: delta.arguments().to_string(),
            });
            return;
        }

        match self.calls.last_mut() {
            Some(call) => call.arguments.push_str(delta.arguments()),
            None => warn!(
                fragment = %delta.arguments(),
                "Dropping tool call fragment with no call to attach to"
            ),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn into_calls(self) -> Vec<PendingToolCall> {
        self.calls
    }
}
