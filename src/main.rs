#![allow(dead_code)]

mod agent;
mod config;
mod logging;
mod persistence;
mod session;
mod streaming;
mod tools;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use agent::Orchestrator;
use config::AppConfig;
use streaming::{Sink, SseSink, StreamClient, TerminalSink};
use tools::ScriptInvoker;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// `data:` frames as relayed to browsers
    Sse,
    /// Plain text
    Text,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Stream a chat completion with script-backed tools", long_about = None)]
struct Args {
    /// Session to continue; a new one is created when omitted
    #[arg(short, long)]
    session: Option<String>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Prompt text; multiple words are joined with spaces
    #[arg(required = true)]
    prompt: Vec<String>,
}

fn build_sink(format: OutputFormat) -> Box<dyn Sink> {
    let stdout = tokio::io::stdout();
    match format {
        OutputFormat::Sse => Box::new(SseSink::new(stdout)),
        OutputFormat::Text => Box::new(TerminalSink::new(stdout)),
    }
}

fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let api = config.active_api()?;

    let mut invoker = ScriptInvoker::new(config.scripts_root.clone());
    if let Some(timeout) = config.tool_timeout() {
        invoker = invoker.with_timeout(timeout);
    }

    let client = StreamClient::new(&api, config.tools.clone(), Arc::new(invoker));
    Ok(Orchestrator::new(
        client,
        config.session_store(),
        config.audit_log()?,
        config.sys_prompt.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = args.log_file.clone().unwrap_or_else(logging::default_log_path);
    logging::init_logging(&log_path)?;

    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path)?;
    let orchestrator = build_orchestrator(&config).context("Failed to set up chat client")?;

    let session_id = match args.session {
        Some(id) => id,
        None => {
            let id = cuid2::create_id();
            eprintln!("session: {}", id);
            id
        }
    };
    let prompt = args.prompt.join(" ");

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling round");
            watcher.cancel();
        }
    });

    let mut sink = build_sink(args.format);
    info!(session_id = %session_id, format = ?args.format, "Running prompt");

    match orchestrator
        .run(&session_id, &prompt, sink.as_mut(), &cancel)
        .await
    {
        Ok(persist) => {
            // The reply is already out; only wait so the process outlives the write.
            if let Err(e) = persist.await {
                error!(error = %e, "Persistence task panicked");
            }
            Ok(())
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Exchange failed");
            Err(e)
        }
    }
}
