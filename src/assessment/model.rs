//! Assessment request/result types.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// What the client asks us to verify: a token bound to an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRequest {
    pub token: String,
    pub expected_action: String,
    pub site_key: String,
}

impl AssessmentRequest {
    pub fn new(
        token: impl Into<String>,
        site_key: impl Into<String>,
        expected_action: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            expected_action: expected_action.into(),
            site_key: site_key.into(),
        }
    }
}

/// The provider's view of a token, decoupled from its wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAssessment {
    /// Provider-issued assessment name.
    pub name: String,
    pub token_valid: bool,
    pub invalid_reason: Option<String>,
    pub executed_action: String,
    pub risk_score: f32,
}

/// Outcome of one assessment.
///
/// Success is derived from the absence of an error message, so the two can
/// never disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResult {
    action: String,
    assessment_id: String,
    error_message: Option<String>,
    score: f32,
}

impl AssessmentResult {
    pub fn success(action: impl Into<String>, assessment_id: impl Into<String>, score: f32) -> Self {
        Self {
            action: action.into(),
            assessment_id: assessment_id.into(),
            error_message: None,
            score,
        }
    }

    pub fn failure(
        action: impl Into<String>,
        assessment_id: impl Into<String>,
        error_message: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            action: action.into(),
            assessment_id: assessment_id.into(),
            error_message: Some(error_message.into()),
            score,
        }
    }

    /// Failure carrying a validation reason as its message.
    pub fn rejected(
        action: impl Into<String>,
        assessment_id: impl Into<String>,
        reason: &ValidationError,
        score: f32,
    ) -> Self {
        Self::failure(action, assessment_id, reason.to_string(), score)
    }

    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn assessment_id(&self) -> &str {
        &self.assessment_id
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn score(&self) -> f32 {
        self.score
    }
}
