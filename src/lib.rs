//! # creditsync
//!
//! Billing reconciliation service: idempotent Stripe, Square and backend
//! webhooks that keep account plans and credit balances in sync, plus an SSE
//! stream that fans task notifications out to connected clients.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod handlers;
pub mod maintenance;
pub mod models;
pub mod notifications;
pub mod processor;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod webhook_verification;
pub use migration;
