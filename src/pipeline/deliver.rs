//! Response enrichment and delivery.
//!
//! Every response leaving the node, synthetic ones included, passes
//! through [`enrich`] exactly once. Observability headers are composed
//! with set-or-append semantics so values stamped by an upstream layer
//! are kept and this node's value follows them.

use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;

use crate::backend::BackendId;
use crate::cache::CachedRef;
use crate::engine::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Stale,
    Miss,
    Pass,
    Synthetic,
}

impl CacheOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Stale => "stale",
            Self::Miss => "miss",
            Self::Pass => "pass",
            Self::Synthetic => "synthetic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EdgeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// This node's hit count for the object as of this serve.
    pub hits: u64,
    pub outcome: CacheOutcome,
    pub backend: Option<BackendId>,
}

impl EdgeResponse {
    /// A response built from a stored object, with `Age` brought up to
    /// date.
    #[must_use]
    pub fn from_cache(cached: &CachedRef, hits: u64, outcome: CacheOutcome, now: Instant) -> Self {
        let object = &cached.object;
        let mut headers = object.headers.clone();
        headers.insert(header::AGE, HeaderValue::from(object.age(now)));
        Self {
            status: object.status,
            headers,
            body: object.body.clone(),
            hits,
            outcome,
            backend: Some(object.backend),
        }
    }

    #[must_use]
    pub fn passed(status: StatusCode, headers: HeaderMap, body: Bytes, backend: BackendId) -> Self {
        Self {
            status,
            headers,
            body,
            hits: 0,
            outcome: CacheOutcome::Pass,
            backend: Some(backend),
        }
    }

    #[must_use]
    pub fn synthetic(status: StatusCode, content_type: Option<&'static str>, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        Self {
            status,
            headers,
            body,
            hits: 0,
            outcome: CacheOutcome::Synthetic,
            backend: None,
        }
    }

    pub fn into_response(self, correlation_id: &str) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if let Ok(value) = HeaderValue::from_str(correlation_id) {
            response.headers_mut().insert("x-correlation-id", value);
        }
        response
    }
}

/// Header writer with an explicit set-or-append contract.
pub struct HeaderComposer<'a> {
    headers: &'a mut HeaderMap,
}

impl<'a> HeaderComposer<'a> {
    pub fn new(headers: &'a mut HeaderMap) -> Self {
        Self { headers }
    }

    /// Set `name` to `value` when absent; otherwise fold the existing
    /// values into one and append `", value"`.
    pub fn set_or_append(&mut self, name: &HeaderName, value: &str) {
        let mut combined = Vec::new();
        for existing in self.headers.get_all(name) {
            if !combined.is_empty() {
                combined.extend_from_slice(b", ");
            }
            combined.extend_from_slice(existing.as_bytes());
        }
        if !combined.is_empty() {
            combined.extend_from_slice(b", ");
        }
        combined.extend_from_slice(value.as_bytes());

        match HeaderValue::from_bytes(&combined) {
            Ok(v) => {
                self.headers.insert(name.clone(), v);
            }
            Err(e) => {
                tracing::warn!(header = %name, error = %e, "unrepresentable header value, skipping");
            }
        }
    }
}

/// Stamp node identity, hit count and hit/miss status.
pub fn enrich(headers: &mut HeaderMap, policy: &Policy, hits: u64) {
    let mut composer = HeaderComposer::new(headers);
    composer.set_or_append(&policy.served_by, &policy.identity);
    composer.set_or_append(&policy.cache_hits, &hits.to_string());
    composer.set_or_append(&policy.cache_status, if hits > 0 { "HIT" } else { "MISS" });
}
