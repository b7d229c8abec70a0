//! Lifecycle of one contact-form submission.

use std::fmt;

/// States a submission moves through, from the HTTP request to delivery.
///
/// The synchronous half ends at `Enqueued` (or a terminal failure); the
/// rest happens on the delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Received,
    Rejected,
    Assessing,
    AssessmentFailed,
    AssessmentOk,
    AuditLogged,
    Enqueued,
    Dequeued,
    Sending,
    Sent,
    SendFailed,
    DeadLettered,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Rejected => "rejected",
            Self::Assessing => "assessing",
            Self::AssessmentFailed => "assessment_failed",
            Self::AssessmentOk => "assessment_ok",
            Self::AuditLogged => "audit_logged",
            Self::Enqueued => "enqueued",
            Self::Dequeued => "dequeued",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::SendFailed => "send_failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_snake_case() {
        assert_eq!(SubmissionState::AuditLogged.to_string(), "audit_logged");
    }
}
