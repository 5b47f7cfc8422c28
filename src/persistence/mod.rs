use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod db;
pub mod jsonl;
pub mod migrations;

pub use db::SqliteRecordLog;
pub use jsonl::JsonLinesRecordLog;

/// One completed exchange: the user's prompt, the final answer and the
/// token totals spent getting there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub session_id: String,
    pub request_text: String,
    pub response_text: String,
    pub request_tokens: u64,
    pub response_tokens: u64,
    pub sent_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        session_id: impl Into<String>,
        request_text: impl Into<String>,
        response_text: impl Into<String>,
        request_tokens: u64,
        response_tokens: u64,
        sent_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: cuid2::create_id(),
            session_id: session_id.into(),
            request_text: request_text.into(),
            response_text: response_text.into(),
            request_tokens,
            response_tokens,
            sent_at,
            received_at,
        }
    }
}

/// Append-only audit log of exchanges.
#[derive(Clone)]
pub enum AuditLog {
    Sqlite(SqliteRecordLog),
    JsonLines(JsonLinesRecordLog),
}

impl AuditLog {
    pub async fn insert(&self, record: &Record) -> Result<()> {
        match self {
            AuditLog::Sqlite(log) => log.insert(record).await,
            AuditLog::JsonLines(log) => log.insert(record).await,
        }
    }
}

pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaychat")
}
