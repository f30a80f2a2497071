//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a parsed [`Config`] for structural
//! errors: the shape of the backend priority chain, duplicate ids, probe
//! policies that can never report healthy, malformed IP allow-lists and
//! invalid header names. Returns every [`ValidationError`] found, each
//! with an optional suggestion.

use std::collections::HashSet;
use std::net::IpAddr;

use axum::http::{HeaderName, Method};

use super::model::{BackendConfig, BackendRole, Config};
use crate::error::ValidationError;

/// Longest probe window the health bitmap can hold.
pub const MAX_PROBE_WINDOW: u8 = 64;

/// A parsed probe request line such as `HEAD /healthz HTTP/1.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub path: String,
}

/// Parse a probe request line. The protocol token is optional and ignored.
pub fn parse_request_line(line: &str) -> Result<RequestLine, String> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(format!(
            "'{line}' is not a request line (expected 'METHOD /path [HTTP/1.1]')"
        ));
    };
    if let Some(proto) = parts.next() {
        if !proto.starts_with("HTTP/") {
            return Err(format!("unknown protocol '{proto}'"));
        }
    }
    if parts.next().is_some() {
        return Err(format!("'{line}' has trailing tokens"));
    }
    if !path.starts_with('/') {
        return Err(format!("probe path must start with '/' (did you mean '/{path}'?)"));
    }
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| format!("'{method}' is not a valid HTTP method"))?;
    Ok(RequestLine {
        method,
        path: path.to_string(),
    })
}

/// Validate a header name. Returns `Ok(())` or a human-readable error.
pub fn validate_header_name(name: &str) -> Result<(), String> {
    name.parse::<HeaderName>()
        .map(|_| ())
        .map_err(|_| format!("'{name}' is not a valid header name"))
}

/// Validate an IP address literal. Returns `Ok(())` or a human-readable error.
pub fn validate_ip(ip: &str) -> Result<(), String> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| format!("'{ip}' is not a valid IP address"))
}

fn err(scope: &str, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        scope: scope.into(),
        field: field.into(),
        message: message.into(),
        suggestion: None,
    }
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_node(config, &mut errors);
    validate_chain(config, &mut errors);

    let mut seen_ids = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        let scope = if backend.id.is_empty() {
            format!("backends[{i}]")
        } else {
            format!("backend {}", backend.id)
        };
        if backend.id.is_empty() {
            errors.push(err(&scope, "id", "id cannot be empty"));
        } else if !seen_ids.insert(backend.id.as_str()) {
            errors.push(err(&scope, "id", "duplicate backend id"));
        }
        validate_backend(&scope, backend, &mut errors);
    }

    let security = &config.security;
    if Method::from_bytes(security.purge_method.as_bytes()).is_err() {
        errors.push(err(
            "security",
            "purge_method",
            format!("'{}' is not a valid HTTP method", security.purge_method),
        ));
    }
    for ip in &security.purge_allow {
        if let Err(msg) = validate_ip(ip) {
            errors.push(err("security", "purge_allow", msg));
        }
    }
    for ip in &security.trusted_upstreams {
        if let Err(msg) = validate_ip(ip) {
            errors.push(err("security", "trusted_upstreams", msg));
        }
    }

    let header_fields = [
        ("security", "secure_marker", security.secure_marker.as_str()),
        ("security", "client_ip_header", security.client_ip_header.as_str()),
        (
            "security",
            "trusted_client_ip_header",
            security.trusted_client_ip_header.as_str(),
        ),
        ("headers", "served_by", config.headers.served_by.as_str()),
        ("headers", "cache_hits", config.headers.cache_hits.as_str()),
        ("headers", "cache_status", config.headers.cache_status.as_str()),
        ("headers", "no_fallback", config.headers.no_fallback.as_str()),
    ];
    for (scope, field, name) in header_fields {
        if let Err(msg) = validate_header_name(name) {
            errors.push(err(scope, field, msg));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_node(config: &Config, errors: &mut Vec<ValidationError>) {
    let node = &config.node;
    if node.identity.trim().is_empty() {
        errors.push(err("node", "identity", "identity cannot be empty"));
    } else if axum::http::HeaderValue::from_str(&node.identity).is_err() {
        errors.push(err(
            "node",
            "identity",
            "identity must be a valid header value",
        ));
    }
    if node.saint_period_secs == 0 {
        errors.push(ValidationError {
            suggestion: Some("use at least 1 second".into()),
            ..err("node", "saint_period_secs", "saint period cannot be zero")
        });
    }
    if !node.status_path.starts_with('/') {
        errors.push(ValidationError {
            suggestion: Some(format!("did you mean '/{}'?", node.status_path)),
            ..err("node", "status_path", "status path must start with '/'")
        });
    }
}

fn validate_chain(config: &Config, errors: &mut Vec<ValidationError>) {
    if config.backends.is_empty() {
        errors.push(err(
            "(root)",
            "backends",
            "at least a primary, a sentinel and one fallback must be defined",
        ));
        return;
    }

    let primaries = config.backends_with_role(BackendRole::Primary);
    if primaries != 1 {
        errors.push(err(
            "(root)",
            "backends.role",
            format!("exactly 1 primary backend required, found {primaries}"),
        ));
    }

    let sentinels = config.backends_with_role(BackendRole::Sentinel);
    if sentinels != 1 {
        errors.push(ValidationError {
            suggestion: Some(
                "add a backend with role 'sentinel' pointing at an unused address".into(),
            ),
            ..err(
                "(root)",
                "backends.role",
                format!("exactly 1 sentinel backend required, found {sentinels}"),
            )
        });
    }

    let fallbacks = config.backends_with_role(BackendRole::Fallback);
    if fallbacks == 0 {
        errors.push(err(
            "(root)",
            "backends.role",
            "at least 1 fallback backend required",
        ));
    } else if fallbacks > 2 {
        errors.push(ValidationError {
            suggestion: Some("only the first two fallbacks are ever selected".into()),
            ..err(
                "(root)",
                "backends.role",
                format!("at most 2 fallback backends allowed, found {fallbacks}"),
            )
        });
    }
}

fn validate_backend(scope: &str, backend: &BackendConfig, errors: &mut Vec<ValidationError>) {
    if backend.host.trim().is_empty() {
        errors.push(err(scope, "host", "host cannot be empty"));
    } else if url::Url::parse(&format!("http://{}:{}/", backend.host, backend.port)).is_err() {
        errors.push(err(
            scope,
            "host",
            format!("'{}' is not a valid host", backend.host),
        ));
    }
    if backend.port == 0 {
        errors.push(err(scope, "port", "port cannot be zero"));
    }
    if backend.timeout_ms == 0 {
        errors.push(err(scope, "timeout_ms", "timeout cannot be zero"));
    }

    // Sentinels are never probed.
    if backend.role == BackendRole::Sentinel {
        return;
    }

    let probe = &backend.probe;
    if let Err(msg) = parse_request_line(&probe.request) {
        errors.push(err(scope, "probe.request", msg));
    }
    if !(100..=599).contains(&probe.expected_status) {
        errors.push(err(
            scope,
            "probe.expected_status",
            format!("{} is not an HTTP status code", probe.expected_status),
        ));
    }
    if probe.window == 0 || probe.window > MAX_PROBE_WINDOW {
        errors.push(err(
            scope,
            "probe.window",
            format!("window must be between 1 and {MAX_PROBE_WINDOW}"),
        ));
    }
    if probe.threshold == 0 || probe.threshold > probe.window {
        errors.push(ValidationError {
            suggestion: Some(format!("use a threshold between 1 and {}", probe.window)),
            ..err(
                scope,
                "probe.threshold",
                "threshold must be at least 1 and no larger than the window",
            )
        });
    }
    if probe.initial_successes() > probe.window {
        errors.push(err(
            scope,
            "probe.initial",
            "initial cannot exceed the window",
        ));
    }
    if probe.timeout_ms == 0 {
        errors.push(err(scope, "probe.timeout_ms", "timeout cannot be zero"));
    }
    if probe.interval_ms == 0 {
        errors.push(err(scope, "probe.interval_ms", "interval cannot be zero"));
    }
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let mut lines = vec![format!(
        "  identity {}, {} backends\n",
        config.node.identity,
        config.backends.len()
    )];

    for backend in &config.backends {
        lines.push(format!(
            "  {:<10} {:<9} {}://{}:{}",
            backend.id,
            backend.role,
            backend.scheme.as_str(),
            backend.host,
            backend.port,
        ));
        if backend.role != BackendRole::Sentinel {
            let probe = &backend.probe;
            lines.push(format!(
                "    probe: {} every {}ms, {}/{} healthy, expect {}",
                probe.request, probe.interval_ms, probe.threshold, probe.window,
                probe.expected_status
            ));
        }
    }

    lines.push(format!(
        "\n  grace {}s, default ttl {}s, saint period {}s",
        config.node.grace_secs, config.node.default_ttl_secs, config.node.saint_period_secs
    ));

    format!("{} is valid\n{}", path, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{
        BackendConfig, Config, Forwarding, Node, ProbeConfig, ResponseHeaderNames, Scheme,
        Security,
    };

    fn backend(id: &str, role: BackendRole) -> BackendConfig {
        BackendConfig {
            id: id.into(),
            host: "127.0.0.1".into(),
            port: 8080,
            scheme: Scheme::Http,
            role,
            timeout_ms: 1000,
            probe: ProbeConfig::default(),
        }
    }

    fn minimal_config() -> Config {
        Config {
            node: Node {
                identity: "cache-test".into(),
                grace_secs: 86_400,
                default_ttl_secs: 120,
                saint_period_secs: 5,
                status_path: "/__edge/status".into(),
            },
            backends: vec![
                backend("origin", BackendRole::Primary),
                backend("sentinel", BackendRole::Sentinel),
                backend("mirror1", BackendRole::Fallback),
                backend("mirror2", BackendRole::Fallback),
            ],
            security: Security::default(),
            headers: ResponseHeaderNames::default(),
            forwarding: Forwarding::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn empty_backends_fails() {
        let mut config = minimal_config();
        config.backends.clear();
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("at least a primary"));
    }

    #[test]
    fn missing_sentinel_fails() {
        let mut config = minimal_config();
        config.backends.remove(1);
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("sentinel")));
    }

    #[test]
    fn two_primaries_fail() {
        let mut config = minimal_config();
        config.backends[2].role = BackendRole::Primary;
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("exactly 1 primary")));
    }

    #[test]
    fn third_fallback_is_unreachable() {
        let mut config = minimal_config();
        config.backends.push(backend("mirror3", BackendRole::Fallback));
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("at most 2")));
    }

    #[test]
    fn duplicate_id_fails() {
        let mut config = minimal_config();
        config.backends[3].id = "mirror1".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.message == "duplicate backend id"));
    }

    #[test]
    fn threshold_above_window_fails() {
        let mut config = minimal_config();
        config.backends[0].probe.threshold = 9;
        config.backends[0].probe.window = 5;
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "probe.threshold"));
    }

    #[test]
    fn sentinel_probe_is_not_checked() {
        let mut config = minimal_config();
        config.backends[1].probe.window = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn bad_purge_ip_fails() {
        let mut config = minimal_config();
        config.security.purge_allow = vec!["10.0.0.300".into()];
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("not a valid IP address")));
    }

    #[test]
    fn request_line_parses() {
        let line = parse_request_line("HEAD / HTTP/1.0").unwrap();
        assert_eq!(line.method, Method::HEAD);
        assert_eq!(line.path, "/");

        let line = parse_request_line("get /healthz").unwrap();
        assert_eq!(line.method, Method::GET);
        assert_eq!(line.path, "/healthz");
    }

    #[test]
    fn request_line_rejects_relative_path() {
        let msg = parse_request_line("HEAD healthz HTTP/1.1").unwrap_err();
        assert!(msg.contains("did you mean '/healthz'?"));
    }

    #[test]
    fn status_path_without_slash_suggests_fix() {
        let mut config = minimal_config();
        config.node.status_path = "status".into();
        let errors = validate(&config).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.suggestion.as_deref() == Some("did you mean '/status'?")));
    }
}
