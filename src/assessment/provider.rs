//! Risk-assessment provider: trait plus the reCAPTCHA Enterprise REST client.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credentials::{CredentialProvider, ProviderCredential};
use super::model::{AssessmentRequest, ProviderAssessment};
use crate::error::TransportError;

/// Scores a client token against an expected action.
#[async_trait]
pub trait RiskAssessmentProvider: Send + Sync {
    async fn create_assessment(
        &self,
        request: &AssessmentRequest,
    ) -> Result<ProviderAssessment, TransportError>;
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Serialize)]
struct CreateAssessmentBody<'a> {
    event: EventBody<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBody<'a> {
    token: &'a str,
    site_key: &'a str,
    expected_action: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentBody {
    #[serde(default)]
    name: String,
    #[serde(default)]
    token_properties: TokenProperties,
    #[serde(default)]
    risk_analysis: RiskAnalysis,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct TokenProperties {
    #[serde(default)]
    valid: bool,
    #[serde(default)]
    invalid_reason: Option<String>,
    #[serde(default)]
    action: String,
}

#[derive(Deserialize, Default)]
struct RiskAnalysis {
    #[serde(default)]
    score: f32,
}

impl From<AssessmentBody> for ProviderAssessment {
    fn from(body: AssessmentBody) -> Self {
        Self {
            name: body.name,
            token_valid: body.token_properties.valid,
            invalid_reason: body.token_properties.invalid_reason,
            executed_action: body.token_properties.action,
            risk_score: body.risk_analysis.score,
        }
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// reCAPTCHA Enterprise `projects.assessments.create` over HTTPS.
pub struct RecaptchaEnterpriseClient {
    client: reqwest::Client,
    api_base: String,
    project_id: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl RecaptchaEnterpriseClient {
    pub fn new(
        client: reqwest::Client,
        api_base: impl Into<String>,
        project_id: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            credentials,
        }
    }

    fn assessments_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/assessments",
            self.api_base, self.project_id
        )
    }
}

#[async_trait]
impl RiskAssessmentProvider for RecaptchaEnterpriseClient {
    async fn create_assessment(
        &self,
        request: &AssessmentRequest,
    ) -> Result<ProviderAssessment, TransportError> {
        let url = self.assessments_url();
        let body = CreateAssessmentBody {
            event: EventBody {
                token: &request.token,
                site_key: &request.site_key,
                expected_action: &request.expected_action,
            },
        };

        let builder = match self.credentials.credential().await? {
            ProviderCredential::ApiKey(key) => self
                .client
                .post(&url)
                .query(&[("key", key.expose_secret())]),
            ProviderCredential::Bearer(token) => {
                self.client.post(&url).bearer_auth(token.expose_secret())
            }
        };

        let resp = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::RequestFailed {
                endpoint: url.clone(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let parsed: AssessmentBody = resp
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        debug!(assessment = %parsed.name, "Assessment created");
        Ok(parsed.into())
    }
}
