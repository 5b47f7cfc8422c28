pub mod accumulator;
pub mod client;
pub mod error;
pub mod parser;
pub mod sink;

pub use client::{RoundResult, StreamClient, MAX_TOOL_CALL_DEPTH};
pub use error::ChatError;
pub use sink::{ChannelSink, Sink, SseSink, TerminalSink};
