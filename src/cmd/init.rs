//! `edgeward init`: generate a starter configuration file.
//!
//! Creates a YAML, JSON, or TOML config file with either minimal
//! or fully documented templates. Existing files are never overwritten.

use std::path::PathBuf;

use crate::cli::{ConfigFormat, InitArgs};
use crate::error::EdgewardError;

pub fn execute(args: &InitArgs) -> Result<(), EdgewardError> {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("edgeward.{}", args.format.extension())));

    if output.exists() {
        return Err(EdgewardError::FileExists { path: output });
    }

    std::fs::write(&output, template(&args.format, args.full))?;
    println!("Created {}", output.display());
    Ok(())
}

const fn template(format: &ConfigFormat, full: bool) -> &'static str {
    match (format, full) {
        (ConfigFormat::Yaml, false) => YAML_MINIMAL,
        (ConfigFormat::Yaml, true) => YAML_FULL,
        (ConfigFormat::Json, false) => JSON_MINIMAL,
        (ConfigFormat::Json, true) => JSON_FULL,
        (ConfigFormat::Toml, false) => TOML_MINIMAL,
        (ConfigFormat::Toml, true) => TOML_FULL,
    }
}

const YAML_MINIMAL: &str = r#"# edgeward config

node:
  identity: "cache-local"

backends:
  - { id: origin, host: "127.0.0.1", port: 8081, role: primary }
  - { id: sentinel, host: "127.0.0.1", port: 9, role: sentinel }
  - { id: mirror1, host: "127.0.0.1", port: 8082, role: fallback }
"#;

const YAML_FULL: &str = r#"# edgeward config
#
# All commented values are defaults. Uncomment and modify as needed.

node:
  identity: "cache-local"        # Stamped into X-Served-By
  # grace_secs: 86400            # Stale window for objects fetched on the first attempt
  # default_ttl_secs: 120        # Freshness when the origin sends no max-age
  # saint_period_secs: 5         # How long a failed backend is skipped for an object
  # status_path: "/__edge/status"

# Chain walked by restart count: primary, sentinel, then fallbacks in order.
backends:
  - id: origin
    host: "127.0.0.1"
    port: 8081
    role: primary
    # scheme: http
    # timeout_ms: 5000
    probe:
      request: "HEAD / HTTP/1.1"
      # expected_status: 200
      # threshold: 3               # Healthy with this many successes...
      # window: 5                  # ...out of the last N probes
      # timeout_ms: 2000
      # interval_ms: 5000
      # initial: 2                 # Defaults to threshold - 1

  # Never healthy: a retry landing here serves grace objects.
  - { id: sentinel, host: "127.0.0.1", port: 9, role: sentinel }

  - { id: mirror1, host: "127.0.0.1", port: 8082, role: fallback }
  # - { id: mirror2, host: "127.0.0.1", port: 8083, role: fallback }

security:
  # purge_method: PURGE
  purge_allow: ["127.0.0.1"]
  # require_secure: true          # Redirect requests without the marker to https
  # secure_marker: "Fastly-SSL"
  # client_ip_header: "Fastly-Client-IP"
  # trusted_client_ip_header: "True-Client-IP"
  # trusted_upstreams: []         # Empty trusts every peer

# headers:
#   served_by: "X-Served-By"
#   cache_hits: "X-Cache-Hits"
#   cache_status: "X-Cache"
#   no_fallback: "No-Fallback"

# forwarding:
#   forward_headers: true
#   proxy_headers: true          # X-Forwarded-For, X-Forwarded-Proto, Via
#   strip_hop_by_hop: true
#   headers:
#     add: {}
#     strip: []
"#;

const JSON_MINIMAL: &str = r#"{
  "node": { "identity": "cache-local" },
  "backends": [
    { "id": "origin", "host": "127.0.0.1", "port": 8081, "role": "primary" },
    { "id": "sentinel", "host": "127.0.0.1", "port": 9, "role": "sentinel" },
    { "id": "mirror1", "host": "127.0.0.1", "port": 8082, "role": "fallback" }
  ]
}
"#;

const JSON_FULL: &str = r#"{
  "node": {
    "identity": "cache-local",
    "grace_secs": 86400,
    "default_ttl_secs": 120,
    "saint_period_secs": 5,
    "status_path": "/__edge/status"
  },
  "backends": [
    {
      "id": "origin",
      "host": "127.0.0.1",
      "port": 8081,
      "scheme": "http",
      "role": "primary",
      "timeout_ms": 5000,
      "probe": {
        "request": "HEAD / HTTP/1.1",
        "expected_status": 200,
        "threshold": 3,
        "window": 5,
        "timeout_ms": 2000,
        "interval_ms": 5000
      }
    },
    { "id": "sentinel", "host": "127.0.0.1", "port": 9, "role": "sentinel" },
    { "id": "mirror1", "host": "127.0.0.1", "port": 8082, "role": "fallback" }
  ],
  "security": {
    "purge_method": "PURGE",
    "purge_allow": ["127.0.0.1"],
    "require_secure": true,
    "secure_marker": "Fastly-SSL",
    "client_ip_header": "Fastly-Client-IP",
    "trusted_client_ip_header": "True-Client-IP",
    "trusted_upstreams": []
  },
  "headers": {
    "served_by": "X-Served-By",
    "cache_hits": "X-Cache-Hits",
    "cache_status": "X-Cache",
    "no_fallback": "No-Fallback"
  },
  "forwarding": {
    "forward_headers": true,
    "proxy_headers": true,
    "strip_hop_by_hop": true,
    "headers": { "add": {}, "strip": [] }
  }
}
"#;

const TOML_MINIMAL: &str = r#"# edgeward config

[node]
identity = "cache-local"

[[backends]]
id = "origin"
host = "127.0.0.1"
port = 8081
role = "primary"

[[backends]]
id = "sentinel"
host = "127.0.0.1"
port = 9
role = "sentinel"

[[backends]]
id = "mirror1"
host = "127.0.0.1"
port = 8082
role = "fallback"
"#;

const TOML_FULL: &str = r#"# edgeward config
#
# All commented values are defaults. Uncomment and modify as needed.

[node]
identity = "cache-local"
# grace_secs = 86400
# default_ttl_secs = 120
# saint_period_secs = 5
# status_path = "/__edge/status"

[[backends]]
id = "origin"
host = "127.0.0.1"
port = 8081
role = "primary"
# scheme = "http"
# timeout_ms = 5000

[backends.probe]
# request = "HEAD / HTTP/1.1"
# expected_status = 200
# threshold = 3
# window = 5
# timeout_ms = 2000
# interval_ms = 5000

# Never healthy: a retry landing here serves grace objects.
[[backends]]
id = "sentinel"
host = "127.0.0.1"
port = 9
role = "sentinel"

[[backends]]
id = "mirror1"
host = "127.0.0.1"
port = 8082
role = "fallback"

[security]
purge_allow = ["127.0.0.1"]
# purge_method = "PURGE"
# require_secure = true
# secure_marker = "Fastly-SSL"
# client_ip_header = "Fastly-Client-IP"
# trusted_client_ip_header = "True-Client-IP"
# trusted_upstreams = []

# [headers]
# served_by = "X-Served-By"
# cache_hits = "X-Cache-Hits"
# cache_status = "X-Cache"
# no_fallback = "No-Fallback"
"#;
