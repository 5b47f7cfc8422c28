use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::migrations::run_migrations;
use super::Record;

pub type DbConn = Arc<Mutex<Connection>>;

/// Audit records in a SQLite `records` table.
#[derive(Clone)]
pub struct SqliteRecordLog {
    conn: DbConn,
}

impl SqliteRecordLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn insert(&self, record: &Record) -> Result<()> {
        let conn = self.conn.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || Self::insert_blocking(&conn, &record)).await?
    }

    fn insert_blocking(conn: &DbConn, record: &Record) -> Result<()> {
        let conn = conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection poisoned"))?;
        conn.execute(
            "INSERT INTO records (
                 id, session_id, request_text, response_text,
                 request_tokens, response_tokens, sent_at, received_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id,
                record.session_id,
                record.request_text,
                record.response_text,
                record.request_tokens as i64,
                record.response_tokens as i64,
                record.sent_at.to_rfc3339(),
                record.received_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn list_for_session(&self, session_id: &str) -> Result<Vec<Record>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database connection poisoned"))?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, request_text, response_text,
                    request_tokens, response_tokens, sent_at, received_at
             FROM records WHERE session_id = ?1 ORDER BY sent_at ASC",
        )?;

        let rows = stmt.query_map(params![session_id], |row| {
            Ok(Record {
                id: row.get(0)?,
                session_id: row.get(1)?,
                request_text: row.get(2)?,
                response_text: row.get(3)?,
                request_tokens: row.get::<_, i64>(4)? as u64,
                response_tokens: row.get::<_, i64>(5)? as u64,
                sent_at: parse_time(6, &row.get::<_, String>(6)?)?,
                received_at: parse_time(7, &row.get::<_, String>(7)?)?,
            })
        })?;

        let result: Result<Vec<_>, _> = rows.collect();
        result.map_err(Into::into)
    }
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
