use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::persistence::{AuditLog, Record};
use crate::session::{Message, SessionStore};
use crate::streaming::{ChatError, RoundResult, Sink, StreamClient};

/// Drives one prompt through as many rounds as the model's tool calls
/// require, then hands the outcome to storage in the background.
pub struct Orchestrator {
    client: StreamClient,
    sessions: SessionStore,
    audit: AuditLog,
    sys_prompt: String,
}

struct Exchange {
    session_id: String,
    prompt: String,
    history_len: usize,
    sent_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(
        client: StreamClient,
        sessions: SessionStore,
        audit: AuditLog,
        sys_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            sessions,
            audit,
            sys_prompt: sys_prompt.into(),
        }
    }

    /// Records the prompt against the session, runs the round loop and
    /// spawns persistence of the result. The returned handle may be
    /// dropped; storage failures are only logged.
    pub async fn run(
        &self,
        session_id: &str,
        prompt: &str,
        sink: &mut dyn Sink,
        cancel: &CancellationToken,
    ) -> Result<JoinHandle<()>> {
        if !self.sessions.exists(session_id).await {
            debug!(session_id, "Starting new session");
            self.sessions
                .append_message(session_id, &Message::system(self.sys_prompt.clone()))
                .await?;
        }
        self.sessions
            .append_message(session_id, &Message::user(prompt))
            .await?;
        let sent_at = Utc::now();

        let history = self.sessions.fetch_prev_messages(session_id).await?;
        let exchange = Exchange {
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
            history_len: history.len(),
            sent_at,
        };

        let result = self.run_rounds(history, sink, cancel).await?;
        Ok(self.spawn_persist(exchange, result))
    }

    pub async fn run_rounds(
        &self,
        history: Vec<Message>,
        sink: &mut dyn Sink,
        cancel: &CancellationToken,
    ) -> Result<RoundResult, ChatError> {
        let mut result = RoundResult::default();
        let mut history = history;

        loop {
            result = self
                .client
                .streaming_call(&history, sink, &result, cancel)
                .await?;
            history = result.messages.clone();

            if !result.has_pending_tool_calls {
                break;
            }
            debug!(depth = result.depth, "Continuing with tool results");
        }

        info!(
            rounds = result.depth,
            request_tokens = result.request_tokens,
            response_tokens = result.response_tokens,
            "Exchange complete"
        );
        Ok(result)
    }

    fn spawn_persist(&self, exchange: Exchange, result: RoundResult) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let audit = self.audit.clone();

        tokio::spawn(async move {
            let session_id = exchange.session_id.clone();
            if let Err(e) = persist(&sessions, &audit, exchange, result).await {
                error!(session_id = %session_id, error = %e, "Failed to persist exchange");
            }
        })
    }
}

async fn persist(
    sessions: &SessionStore,
    audit: &AuditLog,
    exchange: Exchange,
    result: RoundResult,
) -> Result<()> {
    let new_messages = result.messages.get(exchange.history_len..).unwrap_or_default();
    for msg in new_messages {
        sessions.append_message(&exchange.session_id, msg).await?;
    }

    let record = Record::new(
        &exchange.session_id,
        exchange.prompt,
        result.final_text,
        result.request_tokens,
        result.response_tokens,
        exchange.sent_at,
        Utc::now(),
    );
    audit.insert(&record).await?;

    debug!(
        session_id = %exchange.session_id,
        messages = new_messages.len(),
        record_id = %record.id,
        "Exchange persisted"
    );
    Ok(())
}
