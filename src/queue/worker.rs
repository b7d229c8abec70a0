//! Consumer side: lease send requests and relay them to the email sender.
//!
//! The worker never retries on its own. A failed message stays leased until
//! its visibility timeout lapses and the broker hands it out again; once the
//! dequeue count reaches the limit it is moved to the poison queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::message::SendEmailRequest;
use crate::config::QueueConfig;
use crate::email::EmailSender;
use crate::error::{DeliveryError, PersistenceError};
use crate::state::SubmissionState;
use crate::store::{MessageBroker, QueueMessage};

/// Messages handled per poll tick at most.
const MAX_BATCH: usize = 16;

/// `tokio::time::interval` panics on a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What happened to one leased message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Email sent and message removed.
    Sent,
    /// Send failed; the broker will redeliver after the visibility timeout.
    Retrying { dequeue_count: u32 },
    /// Moved to the poison queue.
    DeadLettered,
}

/// Relays queued send requests through an `EmailSender`.
pub struct DeliveryWorker {
    broker: Arc<dyn MessageBroker>,
    sender: Arc<dyn EmailSender>,
    config: QueueConfig,
}

impl DeliveryWorker {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        sender: Arc<dyn EmailSender>,
        config: QueueConfig,
    ) -> Self {
        Self {
            broker,
            sender,
            config,
        }
    }

    /// Lease and process visible messages until the queue is empty or the
    /// batch limit is hit. Returns the outcomes in order.
    pub async fn run_once(&self) -> Result<Vec<DeliveryOutcome>, PersistenceError> {
        let mut outcomes = Vec::new();
        while outcomes.len() < MAX_BATCH {
            let Some(message) = self
                .broker
                .receive(&self.config.queue_name, self.config.visibility_timeout)
                .await?
            else {
                break;
            };
            outcomes.push(self.process_message(&message).await?);
        }
        Ok(outcomes)
    }

    /// Handle one leased message.
    pub async fn process_message(
        &self,
        message: &QueueMessage,
    ) -> Result<DeliveryOutcome, PersistenceError> {
        debug!(
            submission_id = %message.id,
            dequeue_count = message.dequeue_count,
            state = %SubmissionState::Dequeued,
            "Message dequeued"
        );

        // Leased more often than allowed without ever completing, e.g. the
        // process died mid-send
        if message.dequeue_count > self.config.max_dequeue_count {
            return self.dead_letter(message).await;
        }

        match self.deliver(message).await {
            Ok(()) => {
                if !self.broker.delete(message).await? {
                    warn!(
                        submission_id = %message.id,
                        "Lease expired before delete; message may be delivered again"
                    );
                }
                info!(submission_id = %message.id, state = %SubmissionState::Sent, "Email delivered");
                Ok(DeliveryOutcome::Sent)
            }
            Err(e) => {
                error!(
                    submission_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    state = %SubmissionState::SendFailed,
                    error = %e,
                    "Delivery failed"
                );
                if message.dequeue_count >= self.config.max_dequeue_count {
                    self.dead_letter(message).await
                } else {
                    Ok(DeliveryOutcome::Retrying {
                        dequeue_count: message.dequeue_count,
                    })
                }
            }
        }
    }

    async fn deliver(&self, message: &QueueMessage) -> Result<(), DeliveryError> {
        let request: SendEmailRequest =
            serde_json::from_str(&message.body).map_err(|e| DeliveryError::Malformed {
                id: message.id.clone(),
                reason: e.to_string(),
            })?;

        debug!(submission_id = %message.id, state = %SubmissionState::Sending, "Sending email");

        // Bound the send by the lease so a hung relay cannot outlive it
        let timeout = self.config.visibility_timeout;
        tokio::time::timeout(
            timeout,
            self.sender.send(
                &request.from_name,
                &request.from_address,
                &request.subject,
                &request.body,
            ),
        )
        .await
        .map_err(|_| DeliveryError::Timeout(timeout))?
    }

    async fn dead_letter(&self, message: &QueueMessage) -> Result<DeliveryOutcome, PersistenceError> {
        let poison = self.config.poison_queue_name();
        if self.broker.move_to_queue(message, &poison).await? {
            error!(
                submission_id = %message.id,
                dequeue_count = message.dequeue_count,
                queue = %poison,
                state = %SubmissionState::DeadLettered,
                "Message moved to poison queue"
            );
        } else {
            warn!(submission_id = %message.id, "Lease expired before dead-lettering");
        }
        Ok(DeliveryOutcome::DeadLettered)
    }
}

/// Spawn a background task that polls the queue and delivers messages.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_delivery_worker(worker: Arc<DeliveryWorker>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            queue = %worker.config.queue_name,
            poll_ms = worker.config.poll_interval.as_millis() as u64,
            "Delivery worker started"
        );

        let mut tick = tokio::time::interval(worker.config.poll_interval.max(MIN_POLL_INTERVAL));

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Delivery worker shutting down");
                return;
            }

            match worker.run_once().await {
                Ok(outcomes) if !outcomes.is_empty() => {
                    debug!(processed = outcomes.len(), "Delivery batch complete");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Queue poll failed"),
            }
        }
    });

    (handle, shutdown_flag)
}
