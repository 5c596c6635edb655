//! HTTP and WebSocket surface for the Cadence scheduler.
//!
//! A thin axum layer over [`cadence_orchestrator::Orchestrator`]: it validates
//! submissions, resolves the caller's client id, enforces per-scope rate limits
//! and maps errors to status codes. Rejected requests carry a `Retry-After`
//! header.

/// Client identity, admission control and error responses.
pub mod middleware;
/// Router construction and handlers.
pub mod server;
/// Request validation.
pub mod validation;

pub use middleware::{ApiError, ANONYMOUS_CLIENT, CLIENT_ID_HEADER};
pub use server::{AppState, GatewayServer, QUERY_SCOPE, STATUS_SCOPE, STREAM_SCOPE};
pub use validation::validate_query_request;
