//! Audit trail for an axum service: request, model-change and login records
//! written as JSON lines to rotating files, plus a small publications API
//! wired with all of it.

pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
pub mod types;

pub use routes::build_router;
pub use state::{AppState, AuditState};
