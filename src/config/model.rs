//! Serde data structures for the edgeward configuration file.
//!
//! Contains [`Config`] (the root), [`Node`], [`BackendConfig`],
//! [`ProbeConfig`], [`Security`], [`ResponseHeaderNames`] and
//! [`Forwarding`]. All types derive `Serialize` and `Deserialize` with
//! `deny_unknown_fields` for strict parsing.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const fn default_grace_secs() -> u64 {
    86_400
}

const fn default_ttl_secs() -> u64 {
    120
}

const fn default_saint_period_secs() -> u64 {
    5
}

const fn default_timeout_ms() -> u64 {
    5000
}

const fn default_true() -> bool {
    true
}

fn default_status_path() -> String {
    "/__edge/status".to_string()
}

fn default_probe_request() -> String {
    "HEAD / HTTP/1.1".to_string()
}

const fn default_expected_status() -> u16 {
    200
}

const fn default_threshold() -> u8 {
    3
}

const fn default_window() -> u8 {
    5
}

const fn default_probe_timeout_ms() -> u64 {
    2000
}

const fn default_probe_interval_ms() -> u64 {
    5000
}

fn default_purge_method() -> String {
    "PURGE".to_string()
}

fn default_secure_marker() -> String {
    "Fastly-SSL".to_string()
}

fn default_client_ip_header() -> String {
    "Fastly-Client-IP".to_string()
}

fn default_trusted_client_ip_header() -> String {
    "True-Client-IP".to_string()
}

fn default_served_by() -> String {
    "X-Served-By".to_string()
}

fn default_cache_hits() -> String {
    "X-Cache-Hits".to_string()
}

fn default_cache_status() -> String {
    "X-Cache".to_string()
}

fn default_no_fallback() -> String {
    "No-Fallback".to_string()
}

fn is_true(v: &bool) -> bool {
    *v
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub node: Node,

    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub security: Security,

    #[serde(default)]
    pub headers: ResponseHeaderNames,

    #[serde(default)]
    pub forwarding: Forwarding,
}

impl Config {
    #[must_use]
    pub fn backends_with_role(&self, role: BackendRole) -> usize {
        self.backends.iter().filter(|b| b.role == role).count()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Node {
    /// Stamped into the `Served-By` response header.
    pub identity: String,

    /// Grace window granted to objects fetched on the first attempt.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Freshness used when the response carries no freshness directive.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_saint_period_secs")]
    pub saint_period_secs: u64,

    #[serde(default = "default_status_path")]
    pub status_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendRole {
    Primary,
    Fallback,
    Sentinel,
}

impl std::fmt::Display for BackendRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => f.pad("primary"),
            Self::Fallback => f.pad("fallback"),
            Self::Sentinel => f.pad("sentinel"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    pub id: String,
    pub host: String,
    pub port: u16,

    #[serde(default)]
    pub scheme: Scheme,

    pub role: BackendRole,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    /// Request line, e.g. `HEAD / HTTP/1.1`.
    #[serde(default = "default_probe_request")]
    pub request: String,

    #[serde(default = "default_expected_status")]
    pub expected_status: u16,

    #[serde(default = "default_threshold")]
    pub threshold: u8,

    #[serde(default = "default_window")]
    pub window: u8,

    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_probe_interval_ms")]
    pub interval_ms: u64,

    /// Probes counted as already successful at startup.
    #[serde(default)]
    pub initial: Option<u8>,
}

impl ProbeConfig {
    /// Varnish-style default: one short of healthy until the first probe lands.
    #[must_use]
    pub fn initial_successes(&self) -> u8 {
        self.initial
            .unwrap_or_else(|| self.threshold.saturating_sub(1))
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            request: default_probe_request(),
            expected_status: default_expected_status(),
            threshold: default_threshold(),
            window: default_window(),
            timeout_ms: default_probe_timeout_ms(),
            interval_ms: default_probe_interval_ms(),
            initial: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Security {
    #[serde(default = "default_purge_method")]
    pub purge_method: String,

    #[serde(default)]
    pub purge_allow: Vec<String>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub require_secure: bool,

    #[serde(default = "default_secure_marker")]
    pub secure_marker: String,

    #[serde(default = "default_client_ip_header")]
    pub client_ip_header: String,

    #[serde(default = "default_trusted_client_ip_header")]
    pub trusted_client_ip_header: String,

    /// Peers allowed to assert the secure marker and client IP. Empty
    /// means every peer is trusted.
    #[serde(default)]
    pub trusted_upstreams: Vec<String>,
}

impl Default for Security {
    fn default() -> Self {
        Self {
            purge_method: default_purge_method(),
            purge_allow: Vec::new(),
            require_secure: default_true(),
            secure_marker: default_secure_marker(),
            client_ip_header: default_client_ip_header(),
            trusted_client_ip_header: default_trusted_client_ip_header(),
            trusted_upstreams: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseHeaderNames {
    #[serde(default = "default_served_by")]
    pub served_by: String,

    #[serde(default = "default_cache_hits")]
    pub cache_hits: String,

    #[serde(default = "default_cache_status")]
    pub cache_status: String,

    #[serde(default = "default_no_fallback")]
    pub no_fallback: String,
}

impl Default for ResponseHeaderNames {
    fn default() -> Self {
        Self {
            served_by: default_served_by(),
            cache_hits: default_cache_hits(),
            cache_status: default_cache_status(),
            no_fallback: default_no_fallback(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Forwarding {
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub forward_headers: bool,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub proxy_headers: bool,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub strip_hop_by_hop: bool,

    #[serde(default, skip_serializing_if = "HeaderRules::is_default")]
    pub headers: HeaderRules,
}

impl Default for Forwarding {
    fn default() -> Self {
        Self {
            forward_headers: default_true(),
            proxy_headers: default_true(),
            strip_hop_by_hop: default_true(),
            headers: HeaderRules::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderRules {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub add: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strip: Vec<String>,
}

impl HeaderRules {
    fn is_default(&self) -> bool {
        self.add.is_empty() && self.strip.is_empty()
    }
}
