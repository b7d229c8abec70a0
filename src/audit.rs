//! Audit recorder: one immutable row per assessment outcome.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::assessment::AssessmentResult;
use crate::error::PersistenceError;
use crate::store::{AuditRecord, AuditStore};

impl AuditRecord {
    /// Project a result onto a fresh row with a newly generated row key.
    pub fn from_result(result: &AssessmentResult) -> Self {
        Self {
            partition_key: result.action().to_string(),
            row_key: Uuid::new_v4().to_string(),
            score: result.score(),
            is_success: result.is_success(),
            error_message: result.error_message().map(str::to_string),
            assessment_id: result.assessment_id().to_string(),
            recorded_at: Utc::now(),
        }
    }
}

/// Writes assessment outcomes to the audit store.
///
/// The write outcome is returned as a value; whether a failure blocks the
/// submission is decided by the caller.
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    pub async fn log(&self, result: &AssessmentResult) -> Result<(), PersistenceError> {
        let record = AuditRecord::from_result(result);
        self.store.insert_audit_record(&record).await?;
        debug!(
            action = %record.partition_key,
            row_key = %record.row_key,
            is_success = record.is_success,
            "Assessment audited"
        );
        Ok(())
    }
}
