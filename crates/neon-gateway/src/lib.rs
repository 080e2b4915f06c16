//! HTTP adapter over the evaluation engine.
//!
//! A thin axum surface under `/api/v1`: every handler resolves the caller's
//! API key to a request context, enforces the required scope, and delegates
//! to the store, orchestrator, or comparator. No evaluation logic lives here.

mod auth;
mod error;
mod handlers;
mod server;
#[cfg(test)]
mod tests;

pub use auth::{hash_api_key, ApiKeyAuthenticator, StoreApiKeyAuthenticator};
pub use error::ApiError;
pub use server::{build_gateway_router, run_gateway_server, GatewayState};
