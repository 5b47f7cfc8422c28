use serde::Deserialize;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_TOKEN: &str = "[DONE]";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
}

impl Usage {
    /// Later reports win field by field; a missing count keeps the old one.
    pub fn merge(&mut self, other: Usage) {
        if other.prompt_tokens.is_some() {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens.is_some() {
            self.completion_tokens = other.completion_tokens;
        }
    }

    pub fn prompt(&self) -> u64 {
        self.prompt_tokens.unwrap_or_default()
    }

    pub fn completion(&self) -> u64 {
        self.completion_tokens.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

impl ChatChunk {
    pub fn delta(&self) -> Option<&Delta> {
        self.choices.first().map(|choice| &choice.delta)
    }

    pub fn content(&self) -> Option<&str> {
        self.delta()
            .and_then(|delta| delta.content.as_deref())
            .filter(|content| !content.is_empty())
    }

    /// Upstream emits at most one call's fragment per frame, so only the
    /// first entry is consulted.
    pub fn first_tool_call(&self) -> Option<&ToolCallDelta> {
        self.delta()
            .and_then(|delta| delta.tool_calls.as_ref())
            .and_then(|calls| calls.first())
    }
}

impl ToolCallDelta {
    pub fn name(&self) -> Option<&str> {
        self.function
            .as_ref()
            .and_then(|f| f.name.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn arguments(&self) -> &str {
        self.function
            .as_ref()
            .and_then(|f| f.arguments.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Keep-alive, comment or any other line without the data prefix.
    Ignored,
    Chunk(ChatChunk),
    Done,
    Malformed(String),
}

impl StreamEvent {
    pub fn from_line(line: &str) -> Self {
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return StreamEvent::Ignored;
        };

        let payload = payload.trim();
        if payload == DONE_TOKEN {
            return StreamEvent::Done;
        }

        match serde_json::from_str::<ChatChunk>(payload) {
            Ok(chunk) => StreamEvent::Chunk(chunk),
            Err(e) => StreamEvent::Malformed(e.to_string()),
        }
    }
}

/// Splits a chunked response body into newline-terminated frames.
/// Bytes after the last newline are held until the next chunk arrives.
#[derive(Debug, Default)]
pub struct StreamParser {
    pending: Vec<u8>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
            events.push(StreamEvent::from_line(line));
        }
        events
    }

    /// Treats whatever remains after the body ends as one last frame.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&rest);
        Some(StreamEvent::from_line(line.trim_end_matches('\r')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_data_lines_are_ignored() {
        assert_eq!(StreamEvent::from_line(""), StreamEvent::Ignored);
        assert_eq!(StreamEvent::from_line(": keep-alive"), StreamEvent::Ignored);
        assert_eq!(StreamEvent::from_line("event: ping"), StreamEvent::Ignored);
    }

    #[test]
    fn test_done_token() {
        assert_eq!(StreamEvent::from_line("data: [DONE]"), StreamEvent::Done);
        assert_eq!(StreamEvent::from_line("data: [DONE]  "), StreamEvent::Done);
    }

    #[test]
    fn test_content_chunk() {
        let event = StreamEvent::from_line(r#"data: {"choices":[{"delta":{"content":"He"}}]}"#);
        let StreamEvent::Chunk(chunk) = event else {
            panic!("expected chunk");
        };
        assert_eq!(chunk.content(), Some("He"));
        assert!(chunk.usage.is_none());
        assert!(chunk.first_tool_call().is_none());
    }

    #[test]
    fn test_usage_and_empty_choices() {
        let event = StreamEvent::from_line(
            r#"data: {"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":7}}"#,
        );
        let StreamEvent::Chunk(chunk) = event else {
            panic!("expected chunk");
        };
        assert_eq!(
            chunk.usage,
            Some(Usage {
                prompt_tokens: Some(12),
                completion_tokens: Some(7)
            })
        );
        assert!(chunk.delta().is_none());
        assert!(chunk.content().is_none());
    }

    #[test]
    fn test_usage_merge_keeps_missing_fields() {
        let mut usage = Usage::default();
        usage.merge(Usage {
            prompt_tokens: Some(10),
            completion_tokens: Some(2),
        });
        usage.merge(Usage {
            prompt_tokens: Some(12),
            completion_tokens: None,
        });
        assert_eq!(usage.prompt(), 12);
        assert_eq!(usage.completion(), 2);

        let partial = StreamEvent::from_line(r#"data: {"usage":{"prompt_tokens":3}}"#);
        let StreamEvent::Chunk(chunk) = partial else {
            panic!("expected chunk");
        };
        assert_eq!(chunk.usage.unwrap().completion_tokens, None);
    }

    #[test]
    fn test_tool_call_delta() {
        let event = StreamEvent::from_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"id":"c1","function":{"name":"lookup","arguments":""}},{"id":"c2","function":{"name":"other"}}]}}]}"#,
        );
        let StreamEvent::Chunk(chunk) = event else {
            panic!("expected chunk");
        };
        let call = chunk.first_tool_call().unwrap();
        assert_eq!(call.id.as_deref(), Some("c1"));
        assert_eq!(call.name(), Some("lookup"));
        assert_eq!(call.arguments(), "");
    }

    #[test]
    fn test_continuation_has_no_name() {
        let event = StreamEvent::from_line(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"function":{"name":"","arguments":"{\"q\""}}]}}]}"#,
        );
        let StreamEvent::Chunk(chunk) = event else {
            panic!("expected chunk");
        };
        let call = chunk.first_tool_call().unwrap();
        assert_eq!(call.name(), None);
        assert_eq!(call.arguments(), "{\"q\"");
    }

    #[test]
    fn test_malformed_payload() {
        let event = StreamEvent::from_line("data: {not json");
        assert!(matches!(event, StreamEvent::Malformed(_)));
    }

    #[test]
    fn test_parser_splits_frames_across_chunks() {
        let mut parser = StreamParser::new();
        let first = parser.parse_chunk(b"data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.is_empty());

        let second = parser.parse_chunk(b"tent\":\"Hi\"}}]}\n\ndata: [DONE]\n\n");
        assert_eq!(second.len(), 4);
        assert!(matches!(&second[0], StreamEvent::Chunk(c) if c.content() == Some("Hi")));
        assert_eq!(second[1], StreamEvent::Ignored);
        assert_eq!(second[2], StreamEvent::Done);
        assert_eq!(second[3], StreamEvent::Ignored);
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_parser_handles_crlf_and_multibyte_split() {
        let mut parser = StreamParser::new();
        let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"é\"}}]}\r\n".as_bytes();
        let split = frame.iter().position(|b| *b > 0x7f).unwrap() + 1;

        assert!(parser.parse_chunk(&frame[..split]).is_empty());
        let events = parser.parse_chunk(&frame[split..]);
        assert!(matches!(&events[0], StreamEvent::Chunk(c) if c.content() == Some("é")));
    }

    #[test]
    fn test_finish_returns_unterminated_frame() {
        let mut parser = StreamParser::new();
        assert!(parser.parse_chunk(b"data: [DONE]").is_empty());
        assert_eq!(parser.finish(), Some(StreamEvent::Done));
        assert!(parser.finish().is_none());
    }
}
