use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::parser::{DATA_PREFIX, DONE_TOKEN};

/// Stands in for `\n` on the wire: downstream framing is line oriented.
pub const NEWLINE_SENTINEL: &str = "[NEWLINE]";

pub fn escape_newlines(text: &str) -> String {
    text.replace('\n', NEWLINE_SENTINEL)
}

pub fn unescape_newlines(text: &str) -> String {
    text.replace(NEWLINE_SENTINEL, "\n")
}

/// Push-only destination for round output. Failures here never abort a
/// round; backpressure is the sink's own business.
#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, text: &str) -> Result<()>;
    async fn done(&mut self) -> Result<()>;
}

/// Relays output as server-sent events, one `data:` frame per write.
pub struct SseSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> SseSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn frame(&mut self, payload: &str) -> Result<()> {
        let frame = format!("{}{}\n\n", DATA_PREFIX, payload);
        self.writer
            .write_all(frame.as_bytes())
            .await
            .context("Failed to write event frame")?;
        self.writer.flush().await.context("Failed to flush event frame")
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Sink for SseSink<W> {
    async fn write(&mut self, text: &str) -> Result<()> {
        self.frame(text).await
    }

    async fn done(&mut self) -> Result<()> {
        self.frame(DONE_TOKEN).await
    }
}

/// Prints plain text, restoring the newlines the client escaped.
pub struct TerminalSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> TerminalSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Sink for TerminalSink<W> {
    async fn write(&mut self, text: &str) -> Result<()> {
        self.writer
            .write_all(unescape_newlines(text).as_bytes())
            .await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn done(&mut self) -> Result<()> {
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkMessage {
    Text(String),
    End,
}

pub type ChunkSender = mpsc::UnboundedSender<ChunkMessage>;
pub type ChunkReceiver = mpsc::UnboundedReceiver<ChunkMessage>;

/// Forwards output to an in-process consumer.
pub struct ChannelSink {
    sender: ChunkSender,
}

impl ChannelSink {
    pub fn new(sender: ChunkSender) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, ChunkReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn write(&mut self, text: &str) -> Result<()> {
        self.sender
            .send(ChunkMessage::Text(text.to_string()))
            .map_err(|_| anyhow::anyhow!("Chunk receiver dropped"))
    }

    async fn done(&mut self) -> Result<()> {
        self.sender
            .send(ChunkMessage::End)
            .map_err(|_| anyhow::anyhow!("Chunk receiver dropped"))
    }
}
