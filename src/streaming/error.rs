/// Everything that can end a round early. All variants are fatal to the
/// orchestration loop; tool execution failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("build message failed: {0}")]
    Build(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("stream upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("tool call depth exceeded: round {depth} is past the limit of {max}")]
    DepthExceeded { depth: u32, max: u32 },
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid tool arguments: {0}")]
    ToolArguments(String),
    #[error("request cancelled")]
    Cancelled,
}

impl ChatError {
    pub fn is_depth_exceeded(&self) -> bool {
        matches!(self, ChatError::DepthExceeded { .. })
    }
}
