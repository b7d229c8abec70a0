//! Configuration types, built from environment variables.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default subject line for forwarded contact-form submissions.
pub const DEFAULT_EMAIL_SUBJECT: &str = "Personal Site Contact Form";

/// Default logical queue carrying send requests.
pub const DEFAULT_QUEUE_NAME: &str = "email-outbox";

/// Risk-assessment provider settings.
#[derive(Debug, Clone)]
pub struct RecaptchaConfig {
    pub project_id: String,
    /// Minimum acceptable risk score, inclusive.
    pub score_threshold: f32,
    pub api_base: String,
    /// Static API key. When absent, credentials come from the metadata server.
    pub api_key: Option<SecretString>,
    pub metadata_host: String,
}

impl RecaptchaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let score_threshold: f32 = env_or("RECAPTCHA_SCORE_THRESHOLD", 0.5)?;
        if !(0.0..=1.0).contains(&score_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "RECAPTCHA_SCORE_THRESHOLD".into(),
                message: format!("{score_threshold} is outside [0, 1]"),
            });
        }

        Ok(Self {
            project_id: required("RECAPTCHA_PROJECT_ID")?,
            score_threshold,
            api_base: std::env::var("RECAPTCHA_API_BASE")
                .unwrap_or_else(|_| "https://recaptchaenterprise.googleapis.com".to_string()),
            api_key: std::env::var("RECAPTCHA_API_KEY")
                .ok()
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
            metadata_host: std::env::var("GCP_METADATA_HOST")
                .unwrap_or_else(|_| "http://metadata.google.internal".to_string()),
        })
    }
}

/// SMTP relay settings for outbound delivery.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub recipient_name: String,
    pub recipient_address: String,
    /// Trusted From address. When set, the submitter only appears in Reply-To.
    pub sender_address: Option<String>,
    pub timeout: Duration,
}

impl EmailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            smtp_host: required("EMAIL_SMTP_HOST")?,
            smtp_port: env_or("EMAIL_SMTP_PORT", 465)?,
            username: std::env::var("EMAIL_USERNAME").unwrap_or_default(),
            password: SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default()),
            recipient_name: std::env::var("EMAIL_RECIPIENT_NAME").unwrap_or_default(),
            recipient_address: required("EMAIL_RECIPIENT_ADDRESS")?,
            sender_address: std::env::var("EMAIL_SENDER_ADDRESS")
                .ok()
                .filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(env_or("EMAIL_SMTP_TIMEOUT_SECS", 20)?),
        })
    }
}

/// Broker and delivery-worker settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub queue_name: String,
    pub visibility_timeout: Duration,
    pub max_dequeue_count: u32,
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            visibility_timeout: Duration::from_secs(30),
            max_dequeue_count: 5,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            queue_name: std::env::var("CONTACT_GATE_QUEUE").unwrap_or(defaults.queue_name),
            visibility_timeout: Duration::from_secs(env_or(
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout.as_secs(),
            )?),
            max_dequeue_count: env_or("QUEUE_MAX_DEQUEUE_COUNT", defaults.max_dequeue_count)?,
            poll_interval: Duration::from_millis(env_or(
                "QUEUE_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the delivery worker cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_dequeue_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: "QUEUE_MAX_DEQUEUE_COUNT".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "QUEUE_POLL_INTERVAL_MS".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Name of the dead-letter queue paired with the main queue.
    pub fn poison_queue_name(&self) -> String {
        format!("{}-poison", self.queue_name)
    }
}

/// What the gate does when the audit write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditFailurePolicy {
    /// Log the failure and keep processing the submission.
    #[default]
    FailOpen,
    /// Refuse the submission.
    FailClosed,
}

/// Submission gate settings.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub email_subject: String,
    pub audit_policy: AuditFailurePolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            email_subject: DEFAULT_EMAIL_SUBJECT.to_string(),
            audit_policy: AuditFailurePolicy::FailOpen,
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let fail_closed: bool = env_or("AUDIT_FAIL_CLOSED", false)?;
        Ok(Self {
            email_subject: std::env::var("CONTACT_EMAIL_SUBJECT")
                .unwrap_or_else(|_| DEFAULT_EMAIL_SUBJECT.to_string()),
            audit_policy: if fail_closed {
                AuditFailurePolicy::FailClosed
            } else {
                AuditFailurePolicy::FailOpen
            },
        })
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub request_timeout: Duration,
    pub allowed_origin: Option<String>,
    pub db_path: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: env_or("CONTACT_GATE_PORT", 8080)?,
            request_timeout: Duration::from_secs(env_or("CONTACT_GATE_REQUEST_TIMEOUT_SECS", 30)?),
            allowed_origin: std::env::var("CONTACT_GATE_ALLOWED_ORIGIN")
                .ok()
                .filter(|s| !s.is_empty()),
            db_path: std::env::var("CONTACT_GATE_DB_PATH")
                .unwrap_or_else(|_| "./data/contact-gate.db".to_string()),
        })
    }
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub recaptcha: RecaptchaConfig,
    pub email: EmailConfig,
    pub queue: QueueConfig,
    pub gate: GateConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            recaptcha: RecaptchaConfig::from_env()?,
            email: EmailConfig::from_env()?,
            queue: QueueConfig::from_env()?,
            gate: GateConfig::from_env()?,
            server: ServerConfig::from_env()?,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}
