//! Contact gate: validate, assess, audit, then dispatch one submission.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::assessment::{ActionAssessor, AssessmentRequest};
use crate::audit::AuditRecorder;
use crate::config::{AuditFailurePolicy, GateConfig};
use crate::error::{DispatchError, PersistenceError, ValidationError};
use crate::queue::{DispatchQueue, SendEmailRequest};
use crate::state::SubmissionState;
use crate::validation::ContactPayload;

/// The client-side token and the action it claims to be for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvent {
    pub token: String,
    pub action: String,
    pub site_key: String,
}

/// Body of `POST /assess-action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSubmission {
    pub event: ClientEvent,
    pub payload: ContactPayload,
}

/// How a submission ended on the synchronous path.
#[derive(Debug)]
pub enum GateOutcome {
    /// Assessment passed and the send request is durably queued.
    Queued { message_id: String },
    /// The form payload failed validation; nothing was assessed.
    InvalidPayload(ValidationError),
    /// The assessment did not pass.
    AssessmentFailed { assessment_id: String },
    /// The audit write failed under `FailClosed`.
    AuditUnavailable(PersistenceError),
    /// The assessment passed but the enqueue failed.
    DispatchFailed(DispatchError),
}

pub struct ContactGate {
    assessor: Arc<ActionAssessor>,
    recorder: Arc<AuditRecorder>,
    dispatcher: Arc<DispatchQueue>,
    config: GateConfig,
}

impl ContactGate {
    pub fn new(
        assessor: Arc<ActionAssessor>,
        recorder: Arc<AuditRecorder>,
        dispatcher: Arc<DispatchQueue>,
        config: GateConfig,
    ) -> Self {
        Self {
            assessor,
            recorder,
            dispatcher,
            config,
        }
    }

    pub async fn submit(&self, submission: &ContactSubmission) -> GateOutcome {
        let submission_id = Uuid::new_v4();
        info!(
            submission_id = %submission_id,
            action = %submission.event.action,
            state = %SubmissionState::Received,
            "Contact submission received"
        );

        if let Err(reason) = submission.payload.validate() {
            warn!(
                submission_id = %submission_id,
                state = %SubmissionState::Rejected,
                reason = %reason,
                "Payload rejected"
            );
            return GateOutcome::InvalidPayload(reason);
        }

        info!(submission_id = %submission_id, state = %SubmissionState::Assessing, "Assessing token");
        let request = AssessmentRequest::new(
            &submission.event.token,
            &submission.event.site_key,
            &submission.event.action,
        );
        let result = self.assessor.assess_request(&request).await;

        // Every outcome is audited, pass or fail
        let audit = self.recorder.log(&result).await;

        if !result.is_success() {
            if let Err(e) = &audit {
                warn!(submission_id = %submission_id, error = %e, "Failed to audit rejected assessment");
            }
            info!(
                submission_id = %submission_id,
                assessment_id = %result.assessment_id(),
                state = %SubmissionState::AssessmentFailed,
                "Assessment failed"
            );
            return GateOutcome::AssessmentFailed {
                assessment_id: result.assessment_id().to_string(),
            };
        }

        info!(
            submission_id = %submission_id,
            assessment_id = %result.assessment_id(),
            state = %SubmissionState::AssessmentOk,
            "Assessment ok"
        );

        match audit {
            Ok(()) => {
                info!(submission_id = %submission_id, state = %SubmissionState::AuditLogged, "Audit logged");
            }
            Err(e) => match self.config.audit_policy {
                AuditFailurePolicy::FailOpen => {
                    warn!(submission_id = %submission_id, error = %e, "Audit write failed; continuing");
                }
                AuditFailurePolicy::FailClosed => {
                    warn!(submission_id = %submission_id, error = %e, "Audit write failed; refusing submission");
                    return GateOutcome::AuditUnavailable(e);
                }
            },
        }

        let payload = &submission.payload;
        let send = SendEmailRequest {
            from_name: payload.name.clone(),
            from_address: payload.email.clone(),
            subject: self.config.email_subject.clone(),
            body: payload.message.clone(),
        };

        match self.dispatcher.dispatch(&send).await {
            Ok(message_id) => {
                info!(
                    submission_id = %submission_id,
                    message_id = %message_id,
                    state = %SubmissionState::Enqueued,
                    "Submission queued"
                );
                GateOutcome::Queued { message_id }
            }
            Err(e) => {
                error!(submission_id = %submission_id, error = %e, "Enqueue failed");
                GateOutcome::DispatchFailed(e)
            }
        }
    }
}
