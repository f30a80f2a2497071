//! Evaluation of a backend response: restart, pass, or store.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, StatusCode};

use super::context::MAX_RESTARTS;
use crate::cache::directives::{self, CacheDirectives, Vary};
use crate::engine::Policy;

/// Statuses a shared cache may keep without explicit freshness.
const CACHEABLE_STATUSES: [u16; 7] = [200, 203, 300, 301, 302, 404, 410];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchDecision {
    /// Server error with retries left: fail over to the next backend.
    Restart,
    /// Server error after the last permitted restart.
    Exhausted,
    /// Deliver once to this request, never store.
    Pass { reason: &'static str },
    Store {
        fresh_for: Duration,
        grace_for: Duration,
        origin_age: u64,
        vary: Vec<HeaderName>,
    },
}

/// What the evaluator needs to know about the request side.
#[derive(Debug, Clone, Copy)]
pub struct FetchInputs {
    pub cacheable_method: bool,
    pub restarts: u8,
}

#[must_use]
pub fn evaluate(
    status: StatusCode,
    headers: &HeaderMap,
    inputs: FetchInputs,
    policy: &Policy,
) -> FetchDecision {
    if status.is_server_error() && inputs.cacheable_method && !headers.contains_key(&policy.no_fallback) {
        return if inputs.restarts < MAX_RESTARTS {
            FetchDecision::Restart
        } else {
            FetchDecision::Exhausted
        };
    }

    let cc = CacheDirectives::parse(headers);
    // the edge outlives what the origin asks for on the first attempt only
    let grace_for = if inputs.restarts == 0 {
        policy.grace
    } else {
        cc.origin_grace()
    };

    if !inputs.cacheable_method {
        return FetchDecision::Pass { reason: "method" };
    }
    if !CACHEABLE_STATUSES.contains(&status.as_u16()) {
        return FetchDecision::Pass { reason: "status" };
    }
    if cc.forbids_storage() {
        return FetchDecision::Pass { reason: "cache-control" };
    }
    if directives::sets_cookie(headers) {
        return FetchDecision::Pass { reason: "set-cookie" };
    }
    let vary = match directives::vary(headers) {
        Vary::Any => return FetchDecision::Pass { reason: "vary" },
        Vary::Headers(names) => names,
    };

    let origin_age = directives::origin_age(headers);
    let lifetime = cc.lifetime().unwrap_or(policy.default_ttl.as_secs());
    FetchDecision::Store {
        fresh_for: Duration::from_secs(lifetime.saturating_sub(origin_age)),
        grace_for,
        origin_age,
        vary,
    }
}
