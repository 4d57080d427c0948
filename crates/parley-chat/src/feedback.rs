//! Fire-and-forget recording of feedback, UI events, translations and leads.
//!
//! Callers enqueue records on a bounded channel and return immediately. A
//! single writer task drains the queue into the persistence backend. Write
//! failures are logged and dropped; they never reach the chat flow.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_core::clean_text;
use parley_core::error::ParleyError;
use parley_core::types::{
    EventRecord, FeedbackKind, FeedbackRecord, Language, LeadRecord, Record, Timestamp,
    TranslationRecord,
};
use parley_storage::RecordRepository;

use crate::error::ChatError;

/// Append-only destination for records.
pub trait RecordSink: Send + Sync + 'static {
    fn append(&self, record: &Record) -> Result<(), ParleyError>;
}

impl RecordSink for RecordRepository {
    fn append(&self, record: &Record) -> Result<(), ParleyError> {
        RecordRepository::append(self, record)
    }
}

/// Handle for enqueueing records. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FeedbackSink {
    tx: mpsc::Sender<Record>,
}

impl FeedbackSink {
    /// Start the writer task.
    ///
    /// The task ends once every `FeedbackSink` clone has been dropped and
    /// the queue is drained.
    pub fn spawn(sink: Arc<dyn RecordSink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Record>(capacity.max(1));
        let handle = tokio::spawn(async move {
            let mut written = 0u64;
            while let Some(record) = rx.recv().await {
                let kind = record.kind();
                let sink = Arc::clone(&sink);
                let result = tokio::task::spawn_blocking(move || sink.append(&record)).await;
                match result {
                    Ok(Ok(())) => {
                        written += 1;
                        debug!(kind, "Record persisted");
                    }
                    Ok(Err(e)) => warn!(kind, error = %e, "Failed to persist record"),
                    Err(e) => warn!(kind, error = %e, "Record writer panicked"),
                }
            }
            info!(written, "Record writer stopped");
        });
        (Self { tx }, handle)
    }

    /// Enqueue a record without waiting.
    ///
    /// `Ok` acknowledges the write attempt, not the outcome of the write.
    /// An error means the queue was full or closed and the record was dropped.
    pub fn submit(&self, record: Record) -> Result<(), ChatError> {
        let kind = record.kind();
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(kind, "Record queue full, dropping record");
                Err(ChatError::PersistenceFailure("record queue is full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                warn!(kind, "Record writer stopped, dropping record");
                Err(ChatError::PersistenceFailure("record writer is not running".to_string()))
            }
        }
    }

    /// Thumbs up/down on an assistant message. The message id is not
    /// checked against any session.
    ///
    /// The client's timestamp is stored when given; otherwise the receive time.
    pub fn record_feedback(
        &self,
        message_id: &str,
        session_id: &str,
        user_message: &str,
        bot_response: &str,
        kind: FeedbackKind,
        client_timestamp: Option<Timestamp>,
    ) -> Result<(), ChatError> {
        self.submit(Record::Feedback(FeedbackRecord {
            message_id: clean_text(message_id.trim()),
            session_id: clean_text(session_id.trim()),
            user_message: clean_text(user_message),
            bot_response: clean_text(bot_response),
            kind,
            timestamp: client_timestamp.unwrap_or_else(Utc::now),
        }))
    }

    pub fn record_event(
        &self,
        event_name: &str,
        session_id: Option<&str>,
        metadata: Value,
    ) -> Result<(), ChatError> {
        self.submit(Record::Event(EventRecord {
            event_name: clean_text(event_name.trim()),
            session_id: session_id.map(|s| clean_text(s.trim())),
            metadata,
            timestamp: Utc::now(),
        }))
    }

    pub fn record_translation(
        &self,
        session_id: Option<&str>,
        message_id: Option<&str>,
        original_text: &str,
        translated_text: &str,
        target_language: Language,
        translated: bool,
    ) -> Result<(), ChatError> {
        self.submit(Record::Translation(TranslationRecord {
            session_id: session_id.map(|s| clean_text(s.trim())),
            message_id: message_id.map(|s| clean_text(s.trim())),
            original_text: original_text.to_string(),
            translated_text: translated_text.to_string(),
            target_language,
            translated,
            timestamp: Utc::now(),
        }))
    }

    pub fn record_lead(
        &self,
        session_id: Option<&str>,
        name: &str,
        contact: &str,
        interest: Option<&str>,
        metadata: Value,
    ) -> Result<(), ChatError> {
        self.submit(Record::Lead(LeadRecord {
            session_id: session_id.map(|s| clean_text(s.trim())),
            name: clean_text(name.trim()),
            contact: clean_text(contact.trim()),
            interest: interest.map(|s| clean_text(s.trim())),
            metadata,
            timestamp: Utc::now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use parley_storage::Database;

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<Record>>,
    }

    impl RecordSink for MemorySink {
        fn append(&self, record: &Record) -> Result<(), ParleyError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn append(&self, _record: &Record) -> Result<(), ParleyError> {
            Err(ParleyError::Storage("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_records_reach_the_sink_in_order() {
        let memory = Arc::new(MemorySink::default());
        let (sink, writer) = FeedbackSink::spawn(memory.clone(), 16);

        sink.record_feedback("m-1", "s-1", "hi", "hello", FeedbackKind::Good, None)
            .unwrap();
        sink.record_event("copy_clicked", Some("s-1"), serde_json::json!({"n": 1}))
            .unwrap();
        sink.record_lead(None, "Ayesha", "0300", Some("health"), Value::Null)
            .unwrap();
        drop(sink);
        writer.await.unwrap();

        let records = memory.records.lock().unwrap();
        let kinds: Vec<&str> = records.iter().map(Record::kind).collect();
        assert_eq!(kinds, vec!["feedback", "event", "lead"]);
    }

    #[tokio::test]
    async fn test_feedback_text_is_sanitized() {
        let memory = Arc::new(MemorySink::default());
        let (sink, writer) = FeedbackSink::spawn(memory.clone(), 4);
        sink.record_feedback("m-1", "s-1", "<i>hi</i>", "a & b", FeedbackKind::Bad, None)
            .unwrap();
        drop(sink);
        writer.await.unwrap();

        let record = memory.records.lock().unwrap()[0].clone();
        match record {
            Record::Feedback(r) => {
                assert_eq!(r.user_message, "&lt;i&gt;hi&lt;/i&gt;");
                assert_eq!(r.bot_response, "a &amp; b");
                assert_eq!(r.kind, FeedbackKind::Bad);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_feedback_keeps_client_timestamp() {
        let memory = Arc::new(MemorySink::default());
        let (sink, writer) = FeedbackSink::spawn(memory.clone(), 4);
        let sent_at: Timestamp = "2024-01-01T00:00:00Z".parse().unwrap();
        let before = Utc::now();
        sink.record_feedback("m-1", "s-1", "q", "a", FeedbackKind::Good, Some(sent_at))
            .unwrap();
        sink.record_feedback("m-2", "s-1", "q", "a", FeedbackKind::Bad, None)
            .unwrap();
        drop(sink);
        writer.await.unwrap();

        let records = memory.records.lock().unwrap().clone();
        let stamps: Vec<Timestamp> = records
            .iter()
            .map(|record| match record {
                Record::Feedback(r) => r.timestamp,
                other => panic!("unexpected record {:?}", other),
            })
            .collect();
        assert_eq!(stamps[0], sent_at);
        assert!(stamps[1] >= before);
    }

    #[tokio::test]
    async fn test_sink_failure_is_not_surfaced() {
        let (sink, writer) = FeedbackSink::spawn(Arc::new(FailingSink), 4);
        // Unknown message id, failing storage: still acknowledged.
        assert!(sink
            .record_feedback("no-such-message", "s-1", "q", "a", FeedbackKind::Good, None)
            .is_ok());
        drop(sink);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_writer_reports_persistence_failure() {
        let (sink, writer) = FeedbackSink::spawn(Arc::new(MemorySink::default()), 4);
        writer.abort();
        let _ = writer.await;
        let result = sink.record_event("x", None, Value::Null);
        assert!(matches!(result, Err(ChatError::PersistenceFailure(_))));
    }

    #[tokio::test]
    async fn test_writes_into_sqlite_repository() {
        let repo = RecordRepository::new(Arc::new(Database::in_memory().unwrap()));
        let (sink, writer) = FeedbackSink::spawn(Arc::new(repo.clone()), 8);
        sink.record_feedback("m-7", "s-1", "q", "a", FeedbackKind::Good, None)
            .unwrap();
        sink.record_translation(Some("s-1"), Some("m-7"), "Hello", "Salam", Language::RomanUrdu, true)
            .unwrap();
        drop(sink);
        writer.await.unwrap();

        assert_eq!(repo.count("feedback").unwrap(), 1);
        assert_eq!(repo.count("translation").unwrap(), 1);
        assert_eq!(repo.feedback_for_message("m-7").unwrap(), vec!["good"]);
    }
}
