//! HTTP route handlers.

pub mod admin;
pub mod counters;
pub mod health;
pub mod metrics;
