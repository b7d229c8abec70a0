//! Integration tests for the contact gate HTTP surface.
//!
//! Each test spins up an Axum server on a random port backed by an in-memory
//! libSQL store and a stub risk provider, then drives it with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use contact_gate::assessment::{
    ActionAssessor, AssessmentRequest, ProviderAssessment, RiskAssessmentProvider,
};
use contact_gate::audit::AuditRecorder;
use contact_gate::config::{AuditFailurePolicy, GateConfig, QueueConfig, ServerConfig};
use contact_gate::email::EmailSender;
use contact_gate::error::{DeliveryError, Error, PersistenceError, TransportError};
use contact_gate::gate::ContactGate;
use contact_gate::queue::{DeliveryOutcome, DeliveryWorker, DispatchQueue};
use contact_gate::routes::contact_routes;
use contact_gate::store::{AuditRecord, AuditStore, LibSqlBackend, MessageBroker, QueueMessage};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const ACTION: &str = "submit_contact_form";
const QUEUE: &str = "email-outbox";

/// How the stub provider answers.
enum Provider {
    Score(&'static str, f32),
    Fault,
    Hang,
}

#[async_trait]
impl RiskAssessmentProvider for Provider {
    async fn create_assessment(
        &self,
        _request: &AssessmentRequest,
    ) -> Result<ProviderAssessment, TransportError> {
        match self {
            Provider::Score(action, score) => Ok(ProviderAssessment {
                name: "projects/site/assessments/0123".into(),
                token_valid: true,
                invalid_reason: None,
                executed_action: action.to_string(),
                risk_score: *score,
            }),
            Provider::Fault => Err(TransportError::RequestFailed {
                endpoint: "stub".into(),
                reason: "connection reset".into(),
            }),
            Provider::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                unreachable!("request should have timed out")
            }
        }
    }
}

struct DownAuditStore;

#[async_trait]
impl AuditStore for DownAuditStore {
    async fn insert_audit_record(&self, _record: &AuditRecord) -> Result<(), PersistenceError> {
        Err(PersistenceError::Connection("audit store unreachable".into()))
    }
    async fn list_audit_records(&self, _pk: &str) -> Result<Vec<AuditRecord>, PersistenceError> {
        Ok(Vec::new())
    }
}

struct DownBroker;

#[async_trait]
impl MessageBroker for DownBroker {
    async fn enqueue(&self, _queue: &str, _body: &str) -> Result<String, PersistenceError> {
        Err(PersistenceError::Connection("broker unreachable".into()))
    }
    async fn receive(
        &self,
        _queue: &str,
        _visibility_timeout: Duration,
    ) -> Result<Option<QueueMessage>, PersistenceError> {
        Ok(None)
    }
    async fn delete(&self, _message: &QueueMessage) -> Result<bool, PersistenceError> {
        Ok(false)
    }
    async fn move_to_queue(&self, _m: &QueueMessage, _t: &str) -> Result<bool, PersistenceError> {
        Ok(false)
    }
    async fn message_count(&self, _queue: &str) -> Result<usize, PersistenceError> {
        Ok(0)
    }
}

/// Records sends instead of talking SMTP.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String, String, String)>>,
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(
        &self,
        from_name: &str,
        from_address: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((
            from_name.into(),
            from_address.into(),
            subject.into(),
            body.into(),
        ));
        Ok(())
    }
}

struct Harness {
    port: u16,
    db: Arc<LibSqlBackend>,
}

impl Harness {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

struct Setup {
    provider: Provider,
    audit: Option<Arc<dyn AuditStore>>,
    broker: Option<Arc<dyn MessageBroker>>,
    policy: AuditFailurePolicy,
    server: ServerConfig,
}

impl Setup {
    fn new(provider: Provider) -> Self {
        Self {
            provider,
            audit: None,
            broker: None,
            policy: AuditFailurePolicy::FailOpen,
            server: ServerConfig {
                port: 0,
                request_timeout: Duration::from_secs(2),
                allowed_origin: None,
                db_path: String::new(),
            },
        }
    }

    /// Start an Axum server on a random port.
    async fn start(self) -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let audit = self
            .audit
            .unwrap_or_else(|| db.clone() as Arc<dyn AuditStore>);
        let broker = self
            .broker
            .unwrap_or_else(|| db.clone() as Arc<dyn MessageBroker>);

        let gate = Arc::new(ContactGate::new(
            Arc::new(ActionAssessor::new(Arc::new(self.provider), 0.5)),
            Arc::new(AuditRecorder::new(audit)),
            Arc::new(DispatchQueue::new(broker, QUEUE)),
            GateConfig {
                audit_policy: self.policy,
                ..GateConfig::default()
            },
        ));
        let app = contact_routes(gate, &self.server).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting connections.
        tokio::time::sleep(Duration::from_millis(50)).await;

        Harness { port, db }
    }
}

fn submission() -> Value {
    json!({
        "event": {"token": "client-token", "action": ACTION, "siteKey": "site-key"},
        "payload": {
            "name": "Alice",
            "email": "alice@example.com",
            "message": "I would like to get in touch."
        }
    })
}

async fn post(h: &Harness, body: &Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(h.url("/assess-action"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    let body = resp.json().await.unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn health_reports_service() {
    timeout(TEST_TIMEOUT, async {
        let h = Setup::new(Provider::Fault).start().await;
        let body: Value = reqwest::get(h.url("/health")).await.unwrap().json().await.unwrap();
        assert_eq!(body, json!({"status": "ok", "service": "contact-gate"}));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn passing_submission_is_queued_and_audited() {
    timeout(TEST_TIMEOUT, async {
        let h = Setup::new(Provider::Score(ACTION, 0.9)).start().await;

        let (status, body) = post(&h, &submission()).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "queued");
        assert!(body["messageId"].as_str().is_some_and(|id| !id.is_empty()));

        let rows = h.db.list_audit_records(ACTION).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_success);
        assert!(rows[0].error_message.is_none());
        assert!((rows[0].score - 0.9).abs() < 1e-6);
        assert_eq!(h.db.message_count(QUEUE).await.unwrap(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn low_score_is_rejected_without_leaking_reason() {
    timeout(TEST_TIMEOUT, async {
        let h = Setup::new(Provider::Score(ACTION, 0.2)).start().await;

        let (status, body) = post(&h, &submission()).await;
        assert_eq!(status, 400);
        assert!(!body["error"].as_str().unwrap().contains("threshold"));

        let rows = h.db.list_audit_records(ACTION).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_success);
        assert!((rows[0].score - 0.2).abs() < 1e-6);
        assert_eq!(rows[0].error_message.as_deref(), Some("Score is below threshold"));
        assert_eq!(h.db.message_count(QUEUE).await.unwrap(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn provider_fault_is_rejected_and_audited() {
    timeout(TEST_TIMEOUT, async {
        let h = Setup::new(Provider::Fault).start().await;

        let (status, _) = post(&h, &submission()).await;
        assert_eq!(status, 400);

        let rows = h.db.list_audit_records(ACTION).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 0.0);
        assert!(rows[0].error_message.as_deref().unwrap().starts_with("RPC error - "));
        assert_eq!(h.db.message_count(QUEUE).await.unwrap(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn enqueue_failure_answers_500() {
    timeout(TEST_TIMEOUT, async {
        let mut setup = Setup::new(Provider::Score(ACTION, 0.9));
        setup.broker = Some(Arc::new(DownBroker));
        let h = setup.start().await;

        let (status, body) = post(&h, &submission()).await;
        assert_eq!(status, 500);
        assert!(body["error"].is_string());
        assert_eq!(h.db.list_audit_records(ACTION).await.unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn invalid_payload_answers_400_and_touches_nothing() {
    timeout(TEST_TIMEOUT, async {
        let h = Setup::new(Provider::Score(ACTION, 0.9)).start().await;

        let mut body = submission();
        body["payload"]["name"] = json!("A");
        let (status, resp) = post(&h, &body).await;
        assert_eq!(status, 400);
        assert_eq!(resp["error"], "Invalid name");

        let mut body = submission();
        body["payload"]["message"] = json!("hi");
        let (status, resp) = post(&h, &body).await;
        assert_eq!(status, 400);
        assert_eq!(resp["error"], "Message is too short");

        assert!(h.db.list_audit_records(ACTION).await.unwrap().is_empty());
        assert_eq!(h.db.message_count(QUEUE).await.unwrap(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_bodies_are_rejected_by_extractor() {
    timeout(TEST_TIMEOUT, async {
        let h = Setup::new(Provider::Score(ACTION, 0.9)).start().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(h.url("/assess-action"))
            .body("token=abc")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 415);

        let (status, _) = post(&h, &json!({"event": {"token": "t"}})).await;
        assert_eq!(status, 422);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn audit_failure_respects_policy() {
    timeout(TEST_TIMEOUT, async {
        let mut open = Setup::new(Provider::Score(ACTION, 0.9));
        open.audit = Some(Arc::new(DownAuditStore));
        let h = open.start().await;
        let (status, _) = post(&h, &submission()).await;
        assert_eq!(status, 200);
        assert_eq!(h.db.message_count(QUEUE).await.unwrap(), 1);

        let mut closed = Setup::new(Provider::Score(ACTION, 0.9));
        closed.audit = Some(Arc::new(DownAuditStore));
        closed.policy = AuditFailurePolicy::FailClosed;
        let h = closed.start().await;
        let (status, _) = post(&h, &submission()).await;
        assert_eq!(status, 503);
        assert_eq!(h.db.message_count(QUEUE).await.unwrap(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn slow_provider_times_out_with_408() {
    timeout(TEST_TIMEOUT, async {
        let mut setup = Setup::new(Provider::Hang);
        setup.server.request_timeout = Duration::from_millis(200);
        let h = setup.start().await;

        let (status, _) = post(&h, &submission()).await;
        assert_eq!(status, 408);
        assert_eq!(h.db.message_count(QUEUE).await.unwrap(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() {
    timeout(TEST_TIMEOUT, async {
        let mut setup = Setup::new(Provider::Score(ACTION, 0.9));
        setup.server.allowed_origin = Some("https://example.com".into());
        let h = setup.start().await;

        let resp = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, h.url("/assess-action"))
            .header("Origin", "https://example.com")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .unwrap();
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("https://example.com")
        );
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn queued_submission_is_delivered_by_worker() {
    timeout(TEST_TIMEOUT, async {
        let h = Setup::new(Provider::Score(ACTION, 0.9)).start().await;
        let (status, _) = post(&h, &submission()).await;
        assert_eq!(status, 200);

        let sender = Arc::new(RecordingSender::default());
        let worker = DeliveryWorker::new(h.db.clone(), sender.clone(), QueueConfig::default());
        let outcomes = worker.run_once().await.unwrap();

        assert_eq!(outcomes, vec![DeliveryOutcome::Sent]);
        assert_eq!(
            *sender.sent.lock().unwrap(),
            vec![(
                "Alice".to_string(),
                "alice@example.com".to_string(),
                "Personal Site Contact Form".to_string(),
                "I would like to get in touch.".to_string(),
            )]
        );
        assert_eq!(h.db.message_count(QUEUE).await.unwrap(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn invalid_allowed_origin_is_config_error() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let gate = Arc::new(ContactGate::new(
        Arc::new(ActionAssessor::new(Arc::new(Provider::Fault), 0.5)),
        Arc::new(AuditRecorder::new(db.clone())),
        Arc::new(DispatchQueue::new(db, QUEUE)),
        GateConfig::default(),
    ));
    let mut server = Setup::new(Provider::Fault).server;
    server.allowed_origin = Some("https://example.com\nX-Injected: 1".into());

    let err = contact_routes(gate, &server).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}
