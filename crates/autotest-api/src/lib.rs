//! Webhook server for AutoTest.
//!
//! Receives GitHub webhooks, normalizes them and hands them to the commit
//! scheduler.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
