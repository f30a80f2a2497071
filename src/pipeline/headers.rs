//! Header construction for backend requests and hop-by-hop stripping.
//!
//! [`build_backend_headers`] clones the client headers (when forwarding
//! is enabled), strips hop-by-hop headers, keeps the client's `Host` so
//! virtual-hosted backends see the public name, adds proxy metadata
//! (`X-Forwarded-For`, `X-Forwarded-Proto`, `Via`, `X-Correlation-Id`)
//! and applies the configured add/strip rules.

use std::sync::LazyLock;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

use super::context::RequestContext;
use crate::engine::ForwardingRules;

static HOP_BY_HOP: LazyLock<Vec<HeaderName>> = LazyLock::new(|| {
    [
        "connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "trailer",
        "upgrade",
        "proxy-authorization",
        "proxy-authenticate",
    ]
    .iter()
    .filter_map(|name| name.parse::<HeaderName>().ok())
    .collect()
});

/// Strip hop-by-hop headers and `content-length` from a backend response.
///
/// Bodies are fully collected before they are stored or delivered, so the
/// backend's framing headers no longer apply. A HEAD response has no body
/// to measure and keeps the length the backend announced.
pub fn strip_response_hop_by_hop(headers: &mut HeaderMap, method: &Method) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    if *method != Method::HEAD {
        headers.remove(hyper::header::CONTENT_LENGTH);
    }
}

pub fn build_backend_headers(ctx: &RequestContext, rules: &ForwardingRules, identity: &str) -> HeaderMap {
    let mut headers = if rules.forward_headers {
        ctx.headers.clone()
    } else {
        let mut minimal = HeaderMap::new();
        if let Some(host) = ctx.headers.get(hyper::header::HOST) {
            minimal.insert(hyper::header::HOST, host.clone());
        }
        minimal
    };

    if rules.strip_hop_by_hop {
        for name in HOP_BY_HOP.iter() {
            headers.remove(name);
        }
    }

    if rules.proxy_headers {
        let client_ip = ctx.client_ip.to_string();
        let xff = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map_or_else(
                || client_ip.clone(),
                |existing| format!("{existing}, {client_ip}"),
            );
        if let Ok(val) = HeaderValue::from_str(&xff) {
            headers.insert("x-forwarded-for", val);
        }

        let proto = if ctx.secure { "https" } else { "http" };
        headers.insert("x-forwarded-proto", HeaderValue::from_static(proto));

        if let Ok(val) = HeaderValue::from_str(&format!("1.1 {identity}")) {
            headers.append("via", val);
        }

        if let Ok(val) = HeaderValue::from_str(&ctx.correlation_id) {
            headers.insert("x-correlation-id", val);
        }
    }

    for (name, value) in &rules.add {
        headers.insert(name.clone(), value.clone());
    }
    for name in &rules.strip {
        headers.remove(name);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::chain_config;
    use crate::engine::Policy;
    use axum::http::Method;
    use bytes::Bytes;

    fn ctx(pairs: &[(&str, &str)]) -> (RequestContext, Policy) {
        let policy = Policy::from_config(&chain_config(1)).unwrap();
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.insert(k.parse::<HeaderName>().unwrap(), v.parse().unwrap());
        }
        let ctx = RequestContext::new(
            "10.0.0.1".parse().unwrap(),
            Method::GET,
            "/a".parse().unwrap(),
            headers,
            Bytes::new(),
            "test-id".into(),
            &policy,
        );
        (ctx, policy)
    }

    #[test]
    fn strips_hop_by_hop() {
        let (ctx, policy) = ctx(&[("connection", "keep-alive"), ("content-type", "application/json")]);
        let result = build_backend_headers(&ctx, &policy.forwarding, "cache-test");
        assert!(result.get("connection").is_none());
        assert!(result.get("content-type").is_some());
    }

    #[test]
    fn keeps_client_host() {
        let (ctx, policy) = ctx(&[("host", "www.example.com")]);
        let result = build_backend_headers(&ctx, &policy.forwarding, "cache-test");
        assert_eq!(result.get("host").unwrap(), "www.example.com");
    }

    #[test]
    fn appends_x_forwarded_for() {
        let (ctx, policy) = ctx(&[("x-forwarded-for", "1.2.3.4")]);
        let result = build_backend_headers(&ctx, &policy.forwarding, "cache-test");
        assert_eq!(result.get("x-forwarded-for").unwrap(), "1.2.3.4, 10.0.0.1");
        assert_eq!(result.get("via").unwrap(), "1.1 cache-test");
        assert_eq!(result.get("x-correlation-id").unwrap(), "test-id");
        assert_eq!(result.get("true-client-ip").unwrap(), "10.0.0.1");
    }

    #[test]
    fn applies_add_and_strip_rules() {
        let mut config = chain_config(1);
        config.forwarding.headers.add.insert("x-edge".into(), "1".into());
        config.forwarding.headers.strip.push("cookie".into());
        let policy = Policy::from_config(&config).unwrap();
        let (ctx, _) = ctx(&[("cookie", "a=b")]);
        let result = build_backend_headers(&ctx, &policy.forwarding, "cache-test");
        assert_eq!(result.get("x-edge").unwrap(), "1");
        assert!(result.get("cookie").is_none());
    }

    #[test]
    fn response_framing_is_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", "10".parse().unwrap());
        headers.insert("transfer-encoding", "chunked".parse().unwrap());
        headers.insert("etag", "\"x\"".parse().unwrap());
        strip_response_hop_by_hop(&mut headers, &Method::GET);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn head_response_keeps_announced_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", "10".parse().unwrap());
        headers.insert("connection", "keep-alive".parse().unwrap());
        strip_response_hop_by_hop(&mut headers, &Method::HEAD);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("content-length").unwrap(), "10");
    }
}
