//! libSQL backend: audit table and queue broker in one database file.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::PersistenceError;
use crate::store::migrations;
use crate::store::traits::{AuditRecord, AuditStore, MessageBroker, QueueMessage};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PersistenceError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| PersistenceError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(&backend.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, PersistenceError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                PersistenceError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(&backend.conn).await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, PersistenceError> {
        let conn = db
            .connect()
            .map_err(|e| PersistenceError::Connection(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 string; unparseable values sort first.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql Row to an AuditRecord.
///
/// Column order matches AUDIT_COLUMNS.
fn row_to_audit_record(row: &libsql::Row) -> Result<AuditRecord, libsql::Error> {
    let recorded_str: String = row.get(6)?;
    Ok(AuditRecord {
        partition_key: row.get(0)?,
        row_key: row.get(1)?,
        score: row.get::<f64>(2)? as f32,
        is_success: row.get::<i64>(3)? != 0,
        error_message: row.get(4).ok(),
        assessment_id: row.get(5)?,
        recorded_at: parse_datetime(&recorded_str),
    })
}

const AUDIT_COLUMNS: &str =
    "partition_key, row_key, score, is_success, error_message, assessment_id, recorded_at";

// ── Audit store ─────────────────────────────────────────────────────

#[async_trait]
impl AuditStore for LibSqlBackend {
    async fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), PersistenceError> {
        self.conn()
            .execute(
                &format!("INSERT INTO assessments ({AUDIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    record.partition_key.as_str(),
                    record.row_key.as_str(),
                    record.score as f64,
                    record.is_success as i64,
                    opt_text(record.error_message.as_deref()),
                    record.assessment_id.as_str(),
                    record.recorded_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| PersistenceError::Query(format!("insert_audit_record: {e}")))?;

        debug!(
            partition = %record.partition_key,
            row = %record.row_key,
            "Audit record inserted"
        );
        Ok(())
    }

    async fn list_audit_records(
        &self,
        partition_key: &str,
    ) -> Result<Vec<AuditRecord>, PersistenceError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {AUDIT_COLUMNS} FROM assessments WHERE partition_key = ?1 ORDER BY recorded_at ASC, rowid ASC"
                ),
                params![partition_key],
            )
            .await
            .map_err(|e| PersistenceError::Query(format!("list_audit_records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(format!("list_audit_records: {e}")))?
        {
            records.push(
                row_to_audit_record(&row)
                    .map_err(|e| PersistenceError::Query(format!("audit row parse: {e}")))?,
            );
        }
        Ok(records)
    }
}

// ── Message broker ──────────────────────────────────────────────────

#[async_trait]
impl MessageBroker for LibSqlBackend {
    async fn enqueue(&self, queue: &str, body: &str) -> Result<String, PersistenceError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();
        self.conn()
            .execute(
                "INSERT INTO queue_messages (id, queue, body, dequeue_count, inserted_at, visible_at) VALUES (?1, ?2, ?3, 0, ?4, ?4)",
                params![id.as_str(), queue, body, now],
            )
            .await
            .map_err(|e| PersistenceError::Query(format!("enqueue: {e}")))?;

        debug!(message_id = %id, queue, "Message enqueued");
        Ok(id)
    }

    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, PersistenceError> {
        let now = Utc::now().timestamp_millis();
        let visible_at = now + visibility_timeout.as_millis() as i64;
        let pop_receipt = Uuid::new_v4().to_string();

        // Single statement so two consumers can never lease the same message
        let mut rows = self
            .conn()
            .query(
                "UPDATE queue_messages
                 SET dequeue_count = dequeue_count + 1, pop_receipt = ?1, visible_at = ?2
                 WHERE id = (
                     SELECT id FROM queue_messages
                     WHERE queue = ?3 AND visible_at <= ?4
                     ORDER BY inserted_at ASC, rowid ASC
                     LIMIT 1
                 )
                 RETURNING id, queue, body, dequeue_count, inserted_at, visible_at",
                params![pop_receipt.as_str(), visible_at, queue, now],
            )
            .await
            .map_err(|e| PersistenceError::Query(format!("receive: {e}")))?;

        let row = match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(format!("receive: {e}")))?
        {
            Some(row) => row,
            None => return Ok(None),
        };

        let parse = |e: libsql::Error| PersistenceError::Query(format!("receive row parse: {e}"));
        let message = QueueMessage {
            id: row.get(0).map_err(parse)?,
            queue: row.get(1).map_err(parse)?,
            body: row.get(2).map_err(parse)?,
            dequeue_count: row.get::<i64>(3).map_err(parse)? as u32,
            pop_receipt,
            inserted_at: millis_to_datetime(row.get(4).map_err(parse)?),
            next_visible_at: millis_to_datetime(row.get(5).map_err(parse)?),
        };

        debug!(
            message_id = %message.id,
            queue,
            dequeue_count = message.dequeue_count,
            "Message leased"
        );
        Ok(Some(message))
    }

    async fn delete(&self, message: &QueueMessage) -> Result<bool, PersistenceError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM queue_messages WHERE id = ?1 AND queue = ?2 AND pop_receipt = ?3",
                params![
                    message.id.as_str(),
                    message.queue.as_str(),
                    message.pop_receipt.as_str()
                ],
            )
            .await
            .map_err(|e| PersistenceError::Query(format!("delete: {e}")))?;
        Ok(affected == 1)
    }

    async fn move_to_queue(
        &self,
        message: &QueueMessage,
        target_queue: &str,
    ) -> Result<bool, PersistenceError> {
        let now = Utc::now().timestamp_millis();
        let affected = self
            .conn()
            .execute(
                "UPDATE queue_messages
                 SET queue = ?1, dequeue_count = 0, pop_receipt = NULL, visible_at = ?2
                 WHERE id = ?3 AND queue = ?4 AND pop_receipt = ?5",
                params![
                    target_queue,
                    now,
                    message.id.as_str(),
                    message.queue.as_str(),
                    message.pop_receipt.as_str()
                ],
            )
            .await
            .map_err(|e| PersistenceError::Query(format!("move_to_queue: {e}")))?;
        Ok(affected == 1)
    }

    async fn message_count(&self, queue: &str) -> Result<usize, PersistenceError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM queue_messages WHERE queue = ?1",
                params![queue],
            )
            .await
            .map_err(|e| PersistenceError::Query(format!("message_count: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| PersistenceError::Query(format!("message_count: {e}")))?
        {
            Some(row) => Ok(row.get::<i64>(0).unwrap_or(0) as usize),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_record(action: &str, success: bool) -> AuditRecord {
        AuditRecord {
            partition_key: action.into(),
            row_key: Uuid::new_v4().to_string(),
            score: if success { 0.9 } else { 0.2 },
            is_success: success,
            error_message: (!success).then(|| "Score is below threshold".to_string()),
            assessment_id: "projects/p/assessments/a1".into(),
            recorded_at: Utc::now(),
        }
    }

    // ── Audit tests ─────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_and_list_audit_records() {
        let db = test_db().await;
        let ok = make_record("submit_contact_form", true);
        let failed = make_record("submit_contact_form", false);
        db.insert_audit_record(&ok).await.unwrap();
        db.insert_audit_record(&failed).await.unwrap();
        db.insert_audit_record(&make_record("login", true)).await.unwrap();

        let records = db.list_audit_records("submit_contact_form").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.row_key == ok.row_key && r.is_success && r.error_message.is_none()));
        let fetched = records.iter().find(|r| r.row_key == failed.row_key).unwrap();
        assert!(!fetched.is_success);
        assert_eq!(fetched.error_message.as_deref(), Some("Score is below threshold"));
        assert!((fetched.score - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn duplicate_row_key_is_rejected() {
        let db = test_db().await;
        let record = make_record("submit_contact_form", true);
        db.insert_audit_record(&record).await.unwrap();

        let err = db.insert_audit_record(&record).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Query(_)));
        assert_eq!(db.list_audit_records("submit_contact_form").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn audit_rows_cannot_be_updated_or_deleted() {
        let db = test_db().await;
        db.insert_audit_record(&make_record("submit_contact_form", true))
            .await
            .unwrap();

        assert!(db.conn().execute("UPDATE assessments SET score = 0", ()).await.is_err());
        assert!(db.conn().execute("DELETE FROM assessments", ()).await.is_err());
        assert_eq!(db.list_audit_records("submit_contact_form").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("gate.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(db);
    }

    // ── Broker tests ────────────────────────────────────────────────

    #[tokio::test]
    async fn enqueue_then_receive_and_delete() {
        let db = test_db().await;
        let id = db.enqueue("email-outbox", r#"{"a":1}"#).await.unwrap();

        let msg = db
            .receive("email-outbox", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.id, id);
        assert_eq!(msg.body, r#"{"a":1}"#);
        assert_eq!(msg.dequeue_count, 1);

        assert!(db.delete(&msg).await.unwrap());
        assert_eq!(db.message_count("email-outbox").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn leased_message_is_invisible() {
        let db = test_db().await;
        db.enqueue("email-outbox", "x").await.unwrap();

        let first = db.receive("email-outbox", Duration::from_secs(30)).await.unwrap();
        assert!(first.is_some());
        let second = db.receive("email-outbox", Duration::from_secs(30)).await.unwrap();
        assert!(second.is_none());
        assert_eq!(db.message_count("email-outbox").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_lease_redelivers_with_new_receipt() {
        let db = test_db().await;
        db.enqueue("email-outbox", "x").await.unwrap();

        let first = db.receive("email-outbox", Duration::ZERO).await.unwrap().unwrap();
        let second = db.receive("email-outbox", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.dequeue_count, 2);
        assert_ne!(first.pop_receipt, second.pop_receipt);

        // The stale lease can no longer remove the message
        assert!(!db.delete(&first).await.unwrap());
        assert!(db.delete(&second).await.unwrap());
    }

    #[tokio::test]
    async fn receive_is_fifo_and_scoped_to_queue() {
        let db = test_db().await;
        let a = db.enqueue("email-outbox", "a").await.unwrap();
        db.enqueue("other", "z").await.unwrap();
        let b = db.enqueue("email-outbox", "b").await.unwrap();

        let first = db.receive("email-outbox", Duration::from_secs(30)).await.unwrap().unwrap();
        let second = db.receive("email-outbox", Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(first.id, a);
        assert_eq!(second.id, b);
        assert!(db.receive("email-outbox", Duration::from_secs(30)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn move_to_poison_queue_resets_count() {
        let db = test_db().await;
        db.enqueue("email-outbox", "x").await.unwrap();
        let msg = db.receive("email-outbox", Duration::from_secs(30)).await.unwrap().unwrap();

        assert!(db.move_to_queue(&msg, "email-outbox-poison").await.unwrap());
        assert_eq!(db.message_count("email-outbox").await.unwrap(), 0);
        assert_eq!(db.message_count("email-outbox-poison").await.unwrap(), 1);

        let poisoned = db
            .receive("email-outbox-poison", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(poisoned.id, msg.id);
        assert_eq!(poisoned.dequeue_count, 1);
    }
}
