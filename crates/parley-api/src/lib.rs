//! Parley API crate - axum HTTP surface for the conversational handler.
//!
//! Exposes the dialog code hook, conversation history and turn lookups
//! behind bearer authentication, plus a public health check.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
