//! Database schema migrations.
//!
//! Applies the initial schema: feedback, events, translations, leads and
//! the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use parley_core::error::ParleyError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| ParleyError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), ParleyError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS feedback (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id      TEXT NOT NULL,
            session_id      TEXT NOT NULL,
            user_message    TEXT NOT NULL DEFAULT '',
            bot_response    TEXT NOT NULL DEFAULT '',
            kind            TEXT NOT NULL CHECK (kind IN ('good', 'bad')),
            timestamp       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_feedback_message
            ON feedback (message_id);

        CREATE TABLE IF NOT EXISTS events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            event_name      TEXT NOT NULL,
            session_id      TEXT,
            metadata        TEXT NOT NULL DEFAULT '{}',
            timestamp       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_name
            ON events (event_name, timestamp DESC);

        CREATE TABLE IF NOT EXISTS translations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id      TEXT,
            message_id      TEXT,
            original_text   TEXT NOT NULL,
            translated_text TEXT NOT NULL,
            target_language TEXT NOT NULL
                            CHECK (target_language IN ('english', 'roman_urdu')),
            translated      INTEGER NOT NULL DEFAULT 1,
            timestamp       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS leads (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id      TEXT,
            name            TEXT NOT NULL,
            contact         TEXT NOT NULL,
            interest        TEXT,
            metadata        TEXT NOT NULL DEFAULT '{}',
            timestamp       TEXT NOT NULL
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| ParleyError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_feedback_kind_is_constrained() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO feedback (message_id, session_id, kind, timestamp)
             VALUES ('m', 's', 'meh', '2024-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
