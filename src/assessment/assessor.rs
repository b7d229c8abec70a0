//! Action assessor: maps a provider assessment onto a local result.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{AssessmentRequest, AssessmentResult};
use super::provider::RiskAssessmentProvider;
use crate::error::ValidationError;

/// Scores client tokens and decides pass/fail against a threshold.
pub struct ActionAssessor {
    provider: Arc<dyn RiskAssessmentProvider>,
    score_threshold: f32,
}

impl ActionAssessor {
    pub fn new(provider: Arc<dyn RiskAssessmentProvider>, score_threshold: f32) -> Self {
        Self {
            provider,
            score_threshold,
        }
    }

    /// Assess `token` for `expected_action`. Never fails: every fault
    /// becomes an unsuccessful result.
    pub async fn assess(&self, token: &str, site_key: &str, expected_action: &str) -> AssessmentResult {
        let request = AssessmentRequest::new(token, site_key, expected_action);
        self.assess_request(&request).await
    }

    pub async fn assess_request(&self, request: &AssessmentRequest) -> AssessmentResult {
        let action = request.expected_action.as_str();

        let assessment = match self.provider.create_assessment(request).await {
            Ok(a) => a,
            Err(e) => {
                // No provider-issued id exists; correlate the audit row ourselves
                let correlation_id = Uuid::new_v4().to_string();
                error!(correlation_id = %correlation_id, error = %e, "RPC error while creating assessment");
                return AssessmentResult::failure(
                    action,
                    correlation_id,
                    format!("RPC error - {e}"),
                    0.0,
                );
            }
        };

        if !assessment.token_valid {
            let reason = ValidationError::InvalidToken {
                reason: assessment
                    .invalid_reason
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            };
            warn!(assessment = %assessment.name, "{reason}");
            return AssessmentResult::rejected(action, &assessment.name, &reason, assessment.risk_score);
        }

        if assessment.executed_action != action {
            let reason = ValidationError::ActionMismatch {
                expected: action.to_string(),
                executed: assessment.executed_action.clone(),
            };
            warn!(
                assessment = %assessment.name,
                executed_action = %assessment.executed_action,
                expected_action = %action,
                "Invalid action was executed"
            );
            return AssessmentResult::rejected(action, &assessment.name, &reason, assessment.risk_score);
        }

        if assessment.risk_score < self.score_threshold {
            let reason = ValidationError::ScoreBelowThreshold {
                score: assessment.risk_score,
                threshold: self.score_threshold,
            };
            warn!(
                assessment = %assessment.name,
                score = assessment.risk_score,
                threshold = self.score_threshold,
                "Score is below threshold"
            );
            return AssessmentResult::rejected(action, &assessment.name, &reason, assessment.risk_score);
        }

        info!(assessment = %assessment.name, score = assessment.risk_score, "Assessment passed");
        AssessmentResult::success(action, assessment.name, assessment.risk_score)
    }
}
