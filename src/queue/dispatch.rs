//! Producer side: enqueue send requests.

use std::sync::Arc;

use tracing::info;

use super::message::SendEmailRequest;
use crate::error::DispatchError;
use crate::store::MessageBroker;

/// Enqueues send requests on a fixed logical queue.
pub struct DispatchQueue {
    broker: Arc<dyn MessageBroker>,
    queue_name: String,
}

impl DispatchQueue {
    pub fn new(broker: Arc<dyn MessageBroker>, queue_name: impl Into<String>) -> Self {
        Self {
            broker,
            queue_name: queue_name.into(),
        }
    }

    /// Returns the message id once the broker has committed the message.
    /// Any broker failure is returned, never swallowed.
    pub async fn dispatch(&self, request: &SendEmailRequest) -> Result<String, DispatchError> {
        let body = serde_json::to_string(request)?;
        let id = self
            .broker
            .enqueue(&self.queue_name, &body)
            .await
            .map_err(|e| DispatchError::Rejected {
                queue: self.queue_name.clone(),
                reason: e.to_string(),
            })?;

        info!(message_id = %id, queue = %self.queue_name, "Send request enqueued");
        Ok(id)
    }
}
