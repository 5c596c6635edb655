use crate::validation::validate_identifier;
use cadence_core::CadenceError;
use cadence_security::{RateLimitDecision, RateLimiter};
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{error, warn};

/// Header carrying the caller's client identity.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Client identity used when a request carries no `x-client-id` header.
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Resolve the caller's client id from request headers.
pub fn client_id(headers: &HeaderMap) -> Result<String, ApiError> {
    match headers.get(CLIENT_ID_HEADER) {
        None => Ok(ANONYMOUS_CLIENT.to_string()),
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| CadenceError::Validation("x-client-id must be ASCII".into()))?;
            validate_identifier("x-client-id", raw, 128)?;
            Ok(raw.to_string())
        }
    }
}

/// Count one request against `scope` and reject it when over budget.
pub async fn admit(
    limiter: &RateLimiter,
    scope: &str,
    client_id: &str,
    session_id: Option<&str>,
) -> Result<RateLimitDecision, ApiError> {
    Ok(limiter.enforce(scope, client_id, session_id).await?)
}

/// Error returned from gateway handlers.
#[derive(Debug)]
pub struct ApiError(pub CadenceError);

impl From<CadenceError> for ApiError {
    fn from(e: CadenceError) -> Self {
        Self(e)
    }
}

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CadenceError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            CadenceError::Validation(_) | CadenceError::InvalidTransition { .. } => {
                StatusCode::BAD_REQUEST
            }
            CadenceError::NotFound(_) => StatusCode::NOT_FOUND,
            CadenceError::NoAvailableAgents => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body for the wrapped error.
    pub fn body(&self) -> Value {
        match &self.0 {
            CadenceError::RateLimitExceeded {
                scope,
                limit,
                retry_after_seconds,
                request_count,
            } => json!({
                "error": self.0.to_string(),
                "scope": scope,
                "limit": limit,
                "retry_after_seconds": retry_after_seconds,
                "request_count": request_count,
            }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self.0, "Request rejected");
        }

        let mut response = (status, Json(self.body())).into_response();
        if let Some(seconds) = self.0.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
