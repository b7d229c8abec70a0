//! Persistence layer: libSQL-backed audit table and message broker.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{AuditRecord, AuditStore, MessageBroker, QueueMessage};
