//! HTTP route handlers.

pub mod health;
pub mod loans;
pub mod metrics;
