//! Storage seams: the audit table and the message broker.
//!
//! Both are narrow on purpose: the audit store only appends, and the broker
//! only knows about named queues with visibility leases.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PersistenceError;

/// One immutable audit row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    /// Action name.
    pub partition_key: String,
    /// Generated unique id.
    pub row_key: String,
    pub score: f32,
    pub is_success: bool,
    pub error_message: Option<String>,
    pub assessment_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only store for assessment outcomes.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a new record. Fails if the key already exists.
    async fn insert_audit_record(&self, record: &AuditRecord) -> Result<(), PersistenceError>;

    /// All records for an action, oldest first.
    async fn list_audit_records(
        &self,
        partition_key: &str,
    ) -> Result<Vec<AuditRecord>, PersistenceError>;
}

/// A message leased from a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub id: String,
    pub queue: String,
    pub body: String,
    /// Number of times the message has been received, including this one.
    pub dequeue_count: u32,
    /// Proof of the current lease; required to delete or move the message.
    pub pop_receipt: String,
    pub inserted_at: DateTime<Utc>,
    pub next_visible_at: DateTime<Utc>,
}

/// Durable at-least-once queue operations.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Commit a message to `queue`. Returns its id once durable.
    async fn enqueue(&self, queue: &str, body: &str) -> Result<String, PersistenceError>;

    /// Lease the oldest visible message, hiding it for `visibility_timeout`.
    async fn receive(
        &self,
        queue: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, PersistenceError>;

    /// Remove a leased message. Returns false if the lease is stale.
    async fn delete(&self, message: &QueueMessage) -> Result<bool, PersistenceError>;

    /// Move a leased message onto another queue, resetting its dequeue count.
    async fn move_to_queue(
        &self,
        message: &QueueMessage,
        target_queue: &str,
    ) -> Result<bool, PersistenceError>;

    /// Number of messages on `queue`, visible or not.
    async fn message_count(&self, queue: &str) -> Result<usize, PersistenceError>;
}
