//! Contact gate: bot-screened contact form with durable email delivery.

pub mod assessment;
pub mod audit;
pub mod config;
pub mod email;
pub mod error;
pub mod gate;
pub mod queue;
pub mod routes;
pub mod state;
pub mod store;
pub mod validation;
