use crate::counter_store::{BucketState, RateLimitCounterStore};
use cadence_core::{CadenceError, CadenceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Scope used when a request names a scope with no configured policy.
pub const DEFAULT_SCOPE: &str = "default";

/// Request budget for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests allowed per window.
    pub limit: u32,
    /// Window length in seconds.
    pub window_seconds: u64,
}

impl RateLimitPolicy {
    /// A policy; a zero window is raised to one second.
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds: window_seconds.max(1),
        }
    }
}

/// Built-in scope policies.
pub fn default_policies() -> HashMap<String, RateLimitPolicy> {
    HashMap::from([
        ("query".to_string(), RateLimitPolicy::new(30, 60)),
        ("stream".to_string(), RateLimitPolicy::new(10, 60)),
        ("status".to_string(), RateLimitPolicy::new(120, 60)),
        (DEFAULT_SCOPE.to_string(), RateLimitPolicy::new(60, 60)),
    ])
}

/// Outcome of counting one request against its bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Scope the request was counted under.
    pub scope: String,
    /// `request_count <= limit`.
    pub allowed: bool,
    /// Post-increment count in the current window.
    pub request_count: u32,
    /// Limit in force for the bucket.
    pub limit: u32,
    /// Seconds until the current window resets, never below 1.
    pub retry_after_seconds: u64,
    /// When the current window ends.
    pub window_expires_at: DateTime<Utc>,
}

impl RateLimitDecision {
    fn from_bucket(scope: &str, bucket: &BucketState, now: DateTime<Utc>) -> Self {
        let remaining_ms = (bucket.window_expires_at - now).num_milliseconds().max(0);
        let retry_after_seconds = ((remaining_ms as u64).div_ceil(1000)).max(1);
        Self {
            scope: scope.to_string(),
            allowed: bucket.request_count <= bucket.limit,
            request_count: bucket.request_count,
            limit: bucket.limit,
            retry_after_seconds,
            window_expires_at: bucket.window_expires_at,
        }
    }

    /// Remaining requests in the current window.
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.request_count)
    }
}

/// Fixed-length key for a `(scope, client, session)` bucket.
///
/// A missing session is keyed as `-`.
pub fn bucket_key(scope: &str, client_id: &str, session_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.as_bytes());
    hasher.update([0u8]);
    hasher.update(client_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(session_id.unwrap_or("-").as_bytes());
    hex::encode(hasher.finalize())
}

/// Fixed-window rate limiter keyed by scope, client and session.
///
/// The limiter itself holds no counters; the increment-or-reset step is delegated
/// to a [`RateLimitCounterStore`] that performs it atomically.
pub struct RateLimiter {
    policies: HashMap<String, RateLimitPolicy>,
    store: Arc<dyn RateLimitCounterStore>,
}

impl RateLimiter {
    /// Create a limiter with the built-in scope policies.
    pub fn new(store: Arc<dyn RateLimitCounterStore>) -> Self {
        Self {
            policies: default_policies(),
            store,
        }
    }

    /// Override or add the policy for one scope.
    pub fn with_policy(mut self, scope: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.policies.insert(scope.into(), policy);
        self
    }

    /// Override or add several scope policies.
    pub fn with_policies(mut self, policies: HashMap<String, RateLimitPolicy>) -> Self {
        self.policies.extend(policies);
        self
    }

    /// Static policy lookup. Unknown scopes use the `default` policy.
    pub fn get_policy(&self, scope: &str) -> RateLimitPolicy {
        self.policies
            .get(scope)
            .or_else(|| self.policies.get(DEFAULT_SCOPE))
            .copied()
            .unwrap_or_else(|| RateLimitPolicy::new(60, 60))
    }

    /// Count a request and report the decision without failing when over limit.
    pub async fn check(
        &self,
        scope: &str,
        client_id: &str,
        session_id: Option<&str>,
    ) -> CadenceResult<RateLimitDecision> {
        self.check_at(scope, client_id, session_id, Utc::now()).await
    }

    /// [`RateLimiter::check`] against an explicit clock reading.
    pub async fn check_at(
        &self,
        scope: &str,
        client_id: &str,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> CadenceResult<RateLimitDecision> {
        let policy = self.get_policy(scope);
        let key = bucket_key(scope, client_id, session_id);
        let bucket = self.store.increment(&key, policy, now).await?;
        let decision = RateLimitDecision::from_bucket(scope, &bucket, now);
        debug!(
            scope,
            client_id,
            request_count = decision.request_count,
            limit = decision.limit,
            allowed = decision.allowed,
            "Rate limit checked"
        );
        Ok(decision)
    }

    /// Count a request, failing with [`CadenceError::RateLimitExceeded`] when over limit.
    pub async fn enforce(
        &self,
        scope: &str,
        client_id: &str,
        session_id: Option<&str>,
    ) -> CadenceResult<RateLimitDecision> {
        self.enforce_at(scope, client_id, session_id, Utc::now()).await
    }

    /// [`RateLimiter::enforce`] against an explicit clock reading.
    pub async fn enforce_at(
        &self,
        scope: &str,
        client_id: &str,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> CadenceResult<RateLimitDecision> {
        let decision = self.check_at(scope, client_id, session_id, now).await?;
        if decision.allowed {
            return Ok(decision);
        }
        warn!(
            scope,
            client_id,
            request_count = decision.request_count,
            limit = decision.limit,
            retry_after = decision.retry_after_seconds,
            "Rate limited request"
        );
        Err(CadenceError::RateLimitExceeded {
            scope: decision.scope,
            limit: decision.limit,
            retry_after_seconds: decision.retry_after_seconds,
            request_count: decision.request_count,
        })
    }
}
