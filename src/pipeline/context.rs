use std::net::IpAddr;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use bytes::Bytes;

use crate::backend::BackendId;
use crate::cache::BaseKey;
use crate::engine::Policy;

/// Hard cap on internal restarts for one client request.
pub const MAX_RESTARTS: u8 = 3;

/// Per-request state threaded through every pipeline stage.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub peer: IpAddr,
    /// Client address as asserted by a trusted upstream, else the peer.
    pub client_ip: IpAddr,
    /// Address checked against the purge allow list: the asserted client
    /// IP from an explicitly listed upstream, otherwise the peer.
    pub purge_ip: IpAddr,
    /// Whether a trusted upstream marked the client connection secure.
    pub secure: bool,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub base: BaseKey,
    restarts: u8,
    pub grace: Duration,
    pub backend: Option<BackendId>,
}

impl RequestContext {
    /// Build the context and apply the trust boundary: headers only a
    /// trusted upstream may set are dropped when the peer is not trusted,
    /// and the trusted client-IP header is always rewritten.
    #[must_use]
    pub fn new(
        peer: IpAddr,
        method: Method,
        uri: Uri,
        mut headers: HeaderMap,
        body: Bytes,
        correlation_id: String,
        policy: &Policy,
    ) -> Self {
        let trusted = policy.trusts(peer);
        if !trusted {
            headers.remove(&policy.secure_marker);
            headers.remove(&policy.client_ip_header);
        }

        let secure = headers.contains_key(&policy.secure_marker);
        let client_ip = headers
            .get(&policy.client_ip_header)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
            .unwrap_or(peer);

        headers.remove(&policy.trusted_client_ip_header);
        if let Ok(value) = HeaderValue::from_str(&client_ip.to_string()) {
            headers.insert(policy.trusted_client_ip_header.clone(), value);
        }

        let purge_ip = if policy.vouches_for(peer) { client_ip } else { peer };

        let base = BaseKey::new(&method, &uri, &headers);
        Self {
            correlation_id,
            peer,
            client_ip,
            purge_ip,
            secure,
            method,
            uri,
            headers,
            body,
            base,
            restarts: 0,
            grace: policy.grace,
            backend: None,
        }
    }

    #[must_use]
    pub const fn restarts(&self) -> u8 {
        self.restarts
    }

    /// Count one internal restart. Never exceeds [`MAX_RESTARTS`].
    pub fn restart(&mut self) -> u8 {
        debug_assert!(self.restarts < MAX_RESTARTS, "restart past the cap");
        self.restarts = (self.restarts + 1).min(MAX_RESTARTS);
        self.restarts
    }

    #[must_use]
    pub fn is_cacheable_method(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Host the client addressed, as sent.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(axum::http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.uri.host())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::chain_config;

    fn policy(trusted: &[&str]) -> Policy {
        let mut config = chain_config(1);
        config.security.trusted_upstreams = trusted.iter().map(|s| (*s).to_string()).collect();
        Policy::from_config(&config).unwrap()
    }

    fn inbound() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("host", "www.example.com".parse().unwrap());
        h.insert("fastly-ssl", "1".parse().unwrap());
        h.insert("fastly-client-ip", "198.51.100.7".parse().unwrap());
        h.insert("true-client-ip", "6.6.6.6".parse().unwrap());
        h
    }

    fn ctx(peer: &str, policy: &Policy) -> RequestContext {
        RequestContext::new(
            peer.parse().unwrap(),
            Method::GET,
            "/a".parse().unwrap(),
            inbound(),
            Bytes::new(),
            "cid".into(),
            policy,
        )
    }

    #[test]
    fn trusted_peer_asserts_client_ip_and_secure() {
        let policy = policy(&["10.0.0.1"]);
        let ctx = ctx("10.0.0.1", &policy);
        assert!(ctx.secure);
        assert_eq!(ctx.client_ip.to_string(), "198.51.100.7");
        assert_eq!(ctx.headers.get("true-client-ip").unwrap(), "198.51.100.7");
    }

    #[test]
    fn untrusted_peer_cannot_spoof() {
        let policy = policy(&["10.0.0.1"]);
        let ctx = ctx("203.0.113.5", &policy);
        assert!(!ctx.secure);
        assert_eq!(ctx.client_ip.to_string(), "203.0.113.5");
        assert!(ctx.headers.get("fastly-client-ip").is_none());
        assert_eq!(ctx.headers.get("true-client-ip").unwrap(), "203.0.113.5");
    }

    #[test]
    fn purge_ip_needs_a_listed_upstream() {
        let open = policy(&[]);
        let direct = ctx("127.0.0.1", &open);
        assert_eq!(direct.client_ip.to_string(), "198.51.100.7");
        assert_eq!(direct.purge_ip.to_string(), "127.0.0.1");

        let listed = policy(&["10.0.0.1"]);
        let relayed = ctx("10.0.0.1", &listed);
        assert_eq!(relayed.purge_ip.to_string(), "198.51.100.7");
    }

    #[test]
    fn restarts_are_capped() {
        let policy = policy(&[]);
        let mut ctx = ctx("127.0.0.1", &policy);
        assert_eq!(ctx.restart(), 1);
        assert_eq!(ctx.restart(), 2);
        assert_eq!(ctx.restart(), 3);
        assert_eq!(ctx.restarts(), MAX_RESTARTS);
    }
}
