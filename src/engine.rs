//! Shared decision state for the request pipeline.
//!
//! [`Engine`] bundles everything a request consults: the immutable
//! [`Registry`], probe health, the saint ledger, the cache store, the
//! single-flight table and the parsed [`Policy`]. It is built once at
//! startup and shared behind an `Arc`.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderName, HeaderValue, Method};
use serde::Serialize;

use crate::backend::probe::HealthBoard;
use crate::backend::saint::SaintLedger;
use crate::backend::{BackendId, Registry};
use crate::cache::{CacheStore, Fingerprint, FlightTable};
use crate::config::model::Config;
use crate::error::{EdgewardError, ValidationError};
use crate::server::HttpClient;

fn invalid(scope: &str, field: &str, message: String) -> EdgewardError {
    EdgewardError::ConfigValidation {
        errors: vec![ValidationError {
            scope: scope.into(),
            field: field.into(),
            message,
            suggestion: None,
        }],
    }
}

fn header_name(scope: &str, field: &str, value: &str) -> Result<HeaderName, EdgewardError> {
    value
        .parse::<HeaderName>()
        .map_err(|e| invalid(scope, field, e.to_string()))
}

fn ip_set(field: &str, values: &[String]) -> Result<HashSet<IpAddr>, EdgewardError> {
    values
        .iter()
        .map(|v| {
            v.parse::<IpAddr>()
                .map_err(|e| invalid("security", field, format!("'{v}': {e}")))
        })
        .collect()
}

/// Rules applied to every request sent to a backend.
#[derive(Debug, Clone)]
pub struct ForwardingRules {
    pub forward_headers: bool,
    pub proxy_headers: bool,
    pub strip_hop_by_hop: bool,
    pub add: Vec<(HeaderName, HeaderValue)>,
    pub strip: Vec<HeaderName>,
}

/// The parsed, typed form of the node's configuration.
#[derive(Debug, Clone)]
pub struct Policy {
    pub identity: String,
    pub grace: Duration,
    pub default_ttl: Duration,
    pub status_path: String,

    pub purge_method: Method,
    pub purge_allow: HashSet<IpAddr>,
    pub require_secure: bool,
    pub secure_marker: HeaderName,
    pub client_ip_header: HeaderName,
    pub trusted_client_ip_header: HeaderName,
    pub trusted_upstreams: HashSet<IpAddr>,

    pub served_by: HeaderName,
    pub cache_hits: HeaderName,
    pub cache_status: HeaderName,
    pub no_fallback: HeaderName,

    pub forwarding: ForwardingRules,
}

impl Policy {
    pub fn from_config(config: &Config) -> Result<Self, EdgewardError> {
        let sec = &config.security;
        let names = &config.headers;
        let fwd = &config.forwarding;

        let purge_method = Method::from_bytes(sec.purge_method.as_bytes())
            .map_err(|e| invalid("security", "purge_method", e.to_string()))?;

        let mut add = Vec::with_capacity(fwd.headers.add.len());
        for (key, value) in &fwd.headers.add {
            let name = header_name("forwarding", "headers.add", key)?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid("forwarding", "headers.add", format!("{key}: {e}")))?;
            add.push((name, value));
        }
        let strip = fwd
            .headers
            .strip
            .iter()
            .map(|k| header_name("forwarding", "headers.strip", k))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            identity: config.node.identity.clone(),
            grace: Duration::from_secs(config.node.grace_secs),
            default_ttl: Duration::from_secs(config.node.default_ttl_secs),
            status_path: config.node.status_path.clone(),
            purge_method,
            purge_allow: ip_set("purge_allow", &sec.purge_allow)?,
            require_secure: sec.require_secure,
            secure_marker: header_name("security", "secure_marker", &sec.secure_marker)?,
            client_ip_header: header_name("security", "client_ip_header", &sec.client_ip_header)?,
            trusted_client_ip_header: header_name(
                "security",
                "trusted_client_ip_header",
                &sec.trusted_client_ip_header,
            )?,
            trusted_upstreams: ip_set("trusted_upstreams", &sec.trusted_upstreams)?,
            served_by: header_name("headers", "served_by", &names.served_by)?,
            cache_hits: header_name("headers", "cache_hits", &names.cache_hits)?,
            cache_status: header_name("headers", "cache_status", &names.cache_status)?,
            no_fallback: header_name("headers", "no_fallback", &names.no_fallback)?,
            forwarding: ForwardingRules {
                forward_headers: fwd.forward_headers,
                proxy_headers: fwd.proxy_headers,
                strip_hop_by_hop: fwd.strip_hop_by_hop,
                add,
                strip,
            },
        })
    }

    /// Whether `peer` may assert the secure marker and the client IP.
    #[must_use]
    pub fn trusts(&self, peer: IpAddr) -> bool {
        self.trusted_upstreams.is_empty() || self.trusted_upstreams.contains(&peer)
    }

    /// Whether `peer` is an explicitly listed upstream. Only those may
    /// assert the client IP used for purge authorization.
    #[must_use]
    pub fn vouches_for(&self, peer: IpAddr) -> bool {
        self.trusted_upstreams.contains(&peer)
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub hits: AtomicU64,
    pub stale: AtomicU64,
    pub misses: AtomicU64,
    pub passes: AtomicU64,
    pub synthetic: AtomicU64,
    pub restarts: AtomicU64,
    pub purges: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub stale: u64,
    pub misses: u64,
    pub passes: u64,
    pub synthetic: u64,
    pub restarts: u64,
    pub purges: u64,
}

impl Stats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
            synthetic: self.synthetic.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            purges: self.purges.load(Ordering::Relaxed),
        }
    }
}

/// Whether a backend may be asked for an object right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ready,
    /// Probe verdict is unhealthy (always the case for the sentinel).
    Sick,
    /// Cooling down for this object after a failed fetch.
    Saint,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Sick => f.write_str("sick"),
            Self::Saint => f.write_str("saint"),
        }
    }
}

pub struct Engine {
    pub registry: Arc<Registry>,
    pub health: Arc<HealthBoard>,
    pub saints: SaintLedger,
    pub cache: CacheStore,
    pub flights: Arc<FlightTable>,
    pub policy: Policy,
    pub client: HttpClient,
    pub stats: Stats,
}

impl Engine {
    pub fn new(config: &Config, client: HttpClient) -> Result<Self, EdgewardError> {
        let registry = Arc::new(Registry::from_config(config)?);
        let health = Arc::new(HealthBoard::new(&registry));
        let saints = SaintLedger::new(
            &registry,
            Duration::from_secs(config.node.saint_period_secs),
        );
        Ok(Self {
            registry,
            health,
            saints,
            cache: CacheStore::new(),
            flights: Arc::new(FlightTable::new()),
            policy: Policy::from_config(config)?,
            client,
            stats: Stats::default(),
        })
    }

    #[must_use]
    pub fn availability(&self, backend: BackendId, fingerprint: &Fingerprint, now: Instant) -> Availability {
        if !self.health.is_healthy(backend) {
            Availability::Sick
        } else if self.saints.is_excluded(backend, fingerprint, now) {
            Availability::Saint
        } else {
            Availability::Ready
        }
    }

    /// Drop expired saint entries and objects past their grace window.
    pub fn sweep(&self, now: Instant) -> (usize, usize) {
        (self.saints.sweep(now), self.cache.sweep(now))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("backends", &self.registry.len())
            .field("cached", &self.cache.len())
            .field("identity", &self.policy.identity)
            .finish_non_exhaustive()
    }
}
