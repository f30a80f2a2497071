//! Backend registry: the static priority chain of backends.
//!
//! The [`Registry`] is built once from a validated config and never
//! mutated, so it is shared without locking. It orders backends into the
//! chain the request pipeline walks on restarts: primary, then the
//! grace-forcing sentinel, then up to two fallbacks.
//!
//! Submodules hold the two independent exclusion signals: [`probe`]
//! (global per-backend health from periodic probes) and [`saint`]
//! (per-object cooldowns after a failed fetch).

pub mod probe;
pub mod saint;

use std::time::Duration;

use axum::http::{Method, StatusCode};

use crate::config::model::{BackendRole, Config, Scheme};
use crate::config::validation::parse_request_line;
use crate::error::{EdgewardError, ValidationError};

/// Index of a backend in the [`Registry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(usize);

impl BackendId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ProbePolicy {
    pub method: Method,
    pub path: String,
    pub expected_status: StatusCode,
    pub threshold: u8,
    pub window: u8,
    pub timeout: Duration,
    pub interval: Duration,
    pub initial: u8,
}

/// Immutable descriptor of one backend.
#[derive(Debug, Clone)]
pub struct Backend {
    pub id: BackendId,
    pub name: String,
    pub role: BackendRole,
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
    /// `None` for the sentinel, which is never probed and never healthy.
    pub probe: Option<ProbePolicy>,
}

impl Backend {
    /// `scheme://host:port` without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.role == BackendRole::Sentinel
    }
}

#[derive(Debug)]
pub struct Registry {
    backends: Vec<Backend>,
    primary: BackendId,
    sentinel: BackendId,
    fallbacks: Vec<BackendId>,
}

fn chain_error(message: &str) -> EdgewardError {
    EdgewardError::ConfigValidation {
        errors: vec![ValidationError {
            scope: "(root)".into(),
            field: "backends".into(),
            message: message.into(),
            suggestion: None,
        }],
    }
}

impl Registry {
    /// Build the registry from a config that already passed validation.
    /// Malformed chains are still rejected rather than guessed at.
    pub fn from_config(config: &Config) -> Result<Self, EdgewardError> {
        let mut backends = Vec::with_capacity(config.backends.len());
        let mut primary = None;
        let mut sentinel = None;
        let mut fallbacks = Vec::new();

        for (idx, cfg) in config.backends.iter().enumerate() {
            let id = BackendId(idx);
            let probe = if cfg.role == BackendRole::Sentinel {
                None
            } else {
                let line = parse_request_line(&cfg.probe.request).map_err(|message| {
                    EdgewardError::ConfigValidation {
                        errors: vec![ValidationError {
                            scope: format!("backend {}", cfg.id),
                            field: "probe.request".into(),
                            message,
                            suggestion: None,
                        }],
                    }
                })?;
                let expected_status = StatusCode::from_u16(cfg.probe.expected_status)
                    .map_err(|_| chain_error("probe expected_status is not a status code"))?;
                Some(ProbePolicy {
                    method: line.method,
                    path: line.path,
                    expected_status,
                    threshold: cfg.probe.threshold,
                    window: cfg.probe.window,
                    timeout: Duration::from_millis(cfg.probe.timeout_ms),
                    interval: Duration::from_millis(cfg.probe.interval_ms),
                    initial: cfg.probe.initial_successes(),
                })
            };

            match cfg.role {
                BackendRole::Primary => primary = Some(id),
                BackendRole::Sentinel => sentinel = Some(id),
                BackendRole::Fallback => fallbacks.push(id),
            }

            backends.push(Backend {
                id,
                name: cfg.id.clone(),
                role: cfg.role,
                scheme: cfg.scheme,
                host: cfg.host.clone(),
                port: cfg.port,
                timeout: Duration::from_millis(cfg.timeout_ms),
                probe,
            });
        }

        let primary = primary.ok_or_else(|| chain_error("no primary backend"))?;
        let sentinel = sentinel.ok_or_else(|| chain_error("no sentinel backend"))?;
        if fallbacks.is_empty() {
            return Err(chain_error("no fallback backend"));
        }

        Ok(Self {
            backends,
            primary,
            sentinel,
            fallbacks,
        })
    }

    /// Backend for the given restart count: primary first, the sentinel on
    /// the first restart, then the first and second fallback.
    #[must_use]
    pub fn select(&self, restarts: u8) -> BackendId {
        match restarts {
            0 => self.primary,
            1 => self.sentinel,
            2 => self.fallbacks[0],
            _ => *self.fallbacks.get(1).unwrap_or(&self.fallbacks[0]),
        }
    }

    #[must_use]
    pub fn get(&self, id: BackendId) -> &Backend {
        &self.backends[id.0]
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    #[must_use]
    pub const fn primary(&self) -> BackendId {
        self.primary
    }

    #[must_use]
    pub const fn sentinel(&self) -> BackendId {
        self.sentinel
    }
}
