use anyhow::Result;
use rusqlite::Connection;

pub fn run_migrations(db: &mut Connection) -> Result<()> {
    let current_version: i32 = db.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current_version < 1 {
        migrate_to_v1(db)?;
    }

    Ok(())
}

fn migrate_to_v1(db: &mut Connection) -> Result<()> {
    let tx = db.transaction()?;

    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            request_text TEXT NOT NULL,
            response_text TEXT NOT NULL,
            request_tokens INTEGER NOT NULL DEFAULT 0,
            response_tokens INTEGER NOT NULL DEFAULT 0,
            sent_at TEXT NOT NULL,
            received_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_session ON records(session_id, sent_at);
        "#,
    )?;

    tx.pragma_update(None, "user_version", 1)?;

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
