//! Error types for the contact gate.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Faults talking to the risk-assessment provider or its credential source.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("Credential unavailable: {0}")]
    Credential(String),
}

/// Reasons a submission is refused before it may be dispatched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Token is invalid - {reason}")]
    InvalidToken { reason: String },

    #[error("Expected action mismatch")]
    ActionMismatch { expected: String, executed: String },

    #[error("Score is below threshold")]
    ScoreBelowThreshold { score: f32, threshold: f32 },

    #[error("Invalid name")]
    InvalidName,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Message is too short")]
    MessageTooShort,
}

/// Audit store and broker storage errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Enqueue failures on the producer side.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to serialize send request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Broker rejected message for queue {queue}: {reason}")]
    Rejected { queue: String, reason: String },
}

/// Failures while consuming a queued send request.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Malformed queue message {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("SMTP send failed: {0}")]
    Smtp(String),

    #[error("Send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker error: {0}")]
    Broker(#[from] PersistenceError),
}

/// Result type alias for the contact gate.
pub type Result<T> = std::result::Result<T, Error>;
