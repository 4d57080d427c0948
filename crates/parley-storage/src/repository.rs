//! Append-only repository for recorded user reactions.
//!
//! Every record is written exactly once. There is no update or delete path.

use std::sync::Arc;

use chrono::SecondsFormat;
use rusqlite::params;

use parley_core::error::ParleyError;
use parley_core::types::{EventRecord, FeedbackRecord, LeadRecord, Record, TranslationRecord};

use crate::db::Database;

/// Writes [`Record`]s into their tables.
#[derive(Debug, Clone)]
pub struct RecordRepository {
    db: Arc<Database>,
}

impl RecordRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one record to the table matching its kind.
    pub fn append(&self, record: &Record) -> Result<(), ParleyError> {
        match record {
            Record::Feedback(r) => self.insert_feedback(r),
            Record::Event(r) => self.insert_event(r),
            Record::Translation(r) => self.insert_translation(r),
            Record::Lead(r) => self.insert_lead(r),
        }
    }

    /// Number of rows stored for a record kind ("feedback", "event", ...).
    pub fn count(&self, kind: &str) -> Result<u64, ParleyError> {
        let table = match kind {
            "feedback" => "feedback",
            "event" => "events",
            "translation" => "translations",
            "lead" => "leads",
            other => {
                return Err(ParleyError::Storage(format!(
                    "Unknown record kind: {}",
                    other
                )))
            }
        };
        self.db.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
            .map_err(|e| ParleyError::Storage(e.to_string()))
        })
    }

    /// Feedback kinds stored for a message, oldest first.
    pub fn feedback_for_message(&self, message_id: &str) -> Result<Vec<String>, ParleyError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT kind FROM feedback WHERE message_id = ?1 ORDER BY id ASC")
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![message_id], |row| row.get::<_, String>(0))
                .map_err(|e| ParleyError::Storage(e.to_string()))?;
            let mut kinds = Vec::new();
            for row in rows {
                kinds.push(row.map_err(|e| ParleyError::Storage(e.to_string()))?);
            }
            Ok(kinds)
        })
    }

    fn insert_feedback(&self, r: &FeedbackRecord) -> Result<(), ParleyError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO feedback (message_id, session_id, user_message, bot_response, kind, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    r.message_id,
                    r.session_id,
                    r.user_message,
                    r.bot_response,
                    r.kind.as_str(),
                    r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                ],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to save feedback: {}", e)))?;
            Ok(())
        })
    }

    fn insert_event(&self, r: &EventRecord) -> Result<(), ParleyError> {
        let metadata = serde_json::to_string(&r.metadata)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (event_name, session_id, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    r.event_name,
                    r.session_id,
                    metadata,
                    r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                ],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to save event: {}", e)))?;
            Ok(())
        })
    }

    fn insert_translation(&self, r: &TranslationRecord) -> Result<(), ParleyError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO translations
                    (session_id, message_id, original_text, translated_text, target_language, translated, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    r.session_id,
                    r.message_id,
                    r.original_text,
                    r.translated_text,
                    r.target_language.as_str(),
                    r.translated as i32,
                    r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                ],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to save translation: {}", e)))?;
            Ok(())
        })
    }

    fn insert_lead(&self, r: &LeadRecord) -> Result<(), ParleyError> {
        let metadata = serde_json::to_string(&r.metadata)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO leads (session_id, name, contact, interest, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    r.session_id,
                    r.name,
                    r.contact,
                    r.interest,
                    metadata,
                    r.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                ],
            )
            .map_err(|e| ParleyError::Storage(format!("Failed to save lead: {}", e)))?;
            Ok(())
        })
    }
}
