//! Durable dispatch of send requests: producer and consumer.

pub mod dispatch;
pub mod message;
pub mod worker;

pub use dispatch::DispatchQueue;
pub use message::SendEmailRequest;
pub use worker::{DeliveryOutcome, DeliveryWorker, spawn_delivery_worker};
