use std::sync::Arc;
use std::sync::atomic::Ordering;

use contact_gate::assessment::{ActionAssessor, RecaptchaEnterpriseClient, credentials_from_config};
use contact_gate::audit::AuditRecorder;
use contact_gate::config::{AppConfig, AuditFailurePolicy};
use contact_gate::email::SmtpEmailSender;
use contact_gate::gate::ContactGate;
use contact_gate::queue::{DeliveryWorker, DispatchQueue, spawn_delivery_worker};
use contact_gate::routes::contact_routes;
use contact_gate::store::LibSqlBackend;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export RECAPTCHA_PROJECT_ID=... EMAIL_SMTP_HOST=... EMAIL_RECIPIENT_ADDRESS=...");
        std::process::exit(1);
    });

    eprintln!("📬 Contact Gate v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Submit: http://0.0.0.0:{}/assess-action", config.server.port);
    eprintln!("   Health: http://0.0.0.0:{}/health", config.server.port);
    eprintln!(
        "   Threshold: {} (project {})",
        config.recaptcha.score_threshold, config.recaptcha.project_id
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.server.db_path);
    let db = Arc::new(LibSqlBackend::new_local(db_path).await.unwrap_or_else(|e| {
        eprintln!(
            "Error: Failed to open database at {}: {}",
            config.server.db_path, e
        );
        std::process::exit(1);
    }));
    eprintln!("   Database: {}", config.server.db_path);

    // ── Assessment ───────────────────────────────────────────────────────
    let http = reqwest::Client::builder()
        .timeout(config.server.request_timeout)
        .build()?;
    let credentials = credentials_from_config(&config.recaptcha, http.clone());
    let provider = Arc::new(RecaptchaEnterpriseClient::new(
        http,
        config.recaptcha.api_base.clone(),
        config.recaptcha.project_id.clone(),
        credentials,
    ));
    let assessor = Arc::new(ActionAssessor::new(
        provider,
        config.recaptcha.score_threshold,
    ));

    // ── Gate ─────────────────────────────────────────────────────────────
    let recorder = Arc::new(AuditRecorder::new(db.clone()));
    let dispatcher = Arc::new(DispatchQueue::new(
        db.clone(),
        config.queue.queue_name.clone(),
    ));
    eprintln!(
        "   Audit: {}",
        match config.gate.audit_policy {
            AuditFailurePolicy::FailOpen => "fail-open",
            AuditFailurePolicy::FailClosed => "fail-closed",
        }
    );
    let gate = Arc::new(ContactGate::new(
        assessor,
        recorder,
        dispatcher,
        config.gate.clone(),
    ));

    // ── Delivery ─────────────────────────────────────────────────────────
    eprintln!(
        "   Delivery: queue {} via {}:{} (poison after {} attempts)",
        config.queue.queue_name,
        config.email.smtp_host,
        config.email.smtp_port,
        config.queue.max_dequeue_count,
    );
    let sender = Arc::new(SmtpEmailSender::new(config.email.clone()));
    let worker = Arc::new(DeliveryWorker::new(db.clone(), sender, config.queue.clone()));
    let (worker_handle, worker_shutdown) = spawn_delivery_worker(worker);

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = contact_routes(gate, &config.server)?;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port)).await?;
    tracing::info!(port = config.server.port, "Contact gate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    tracing::info!("Shutting down");
    worker_shutdown.store(true, Ordering::Relaxed);
    worker_handle.await.ok();

    Ok(())
}
