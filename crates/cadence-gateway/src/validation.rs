use cadence_core::{CadenceError, CadenceResult};
use cadence_orchestrator::QueryRequest;

/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 10_000;
/// Longest accepted session id.
pub const MAX_SESSION_ID_LEN: usize = 128;
/// Longest accepted task type.
pub const MAX_TASK_TYPE_LEN: usize = 64;

/// Non-empty, at most `max_len` characters of `[A-Za-z0-9_-]`.
pub fn validate_identifier(field: &str, value: &str, max_len: usize) -> CadenceResult<()> {
    if value.is_empty() || value.len() > max_len {
        return Err(CadenceError::Validation(format!(
            "{field} must be 1-{max_len} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CadenceError::Validation(format!(
            "{field} may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

fn validate_task_type(value: &str) -> CadenceResult<()> {
    if value.is_empty() || value.len() > MAX_TASK_TYPE_LEN {
        return Err(CadenceError::Validation(format!(
            "task_type must be 1-{MAX_TASK_TYPE_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(CadenceError::Validation(
            "task_type may only contain lowercase letters, digits and '_'".into(),
        ));
    }
    Ok(())
}

/// Reject malformed submissions before they reach the rate limiter.
pub fn validate_query_request(request: &QueryRequest) -> CadenceResult<()> {
    if request.query.trim().is_empty() {
        return Err(CadenceError::Validation("query must not be empty".into()));
    }
    if request.query.chars().count() > MAX_QUERY_CHARS {
        return Err(CadenceError::Validation(format!(
            "query exceeds {MAX_QUERY_CHARS} characters"
        )));
    }
    if let Some(session_id) = &request.session_id {
        validate_identifier("session_id", session_id, MAX_SESSION_ID_LEN)?;
    }
    if let Some(task_type) = &request.task_type {
        validate_task_type(task_type)?;
    }
    Ok(())
}
