//! Edgeward is an HTTP edge cache that keeps serving through backend
//! failures.
//!
//! Each request walks a fixed backend chain driven by its restart count:
//! the primary origin first, then a sentinel that is never healthy (so a
//! retry falls through to grace-serving stale objects), then the fallback
//! mirrors. Failed fetches mark the backend as a *saint* for that object,
//! keeping it out of rotation for a short period, and fetches for the same
//! object are coalesced so a single request reaches the origin.
//!
//! # Architecture
//!
//! - [`backend`] -- Backend registry, the restart-indexed chain, health
//!   probing and the saint ledger.
//! - [`cache`] -- Object store, fingerprinting with `Vary`, freshness
//!   directives and single-flight fetch coalescing.
//! - [`pipeline`] -- Request lifecycle: classification, lookup, fetch,
//!   deliver and the error state machine driving restarts.
//! - [`engine`] -- Shared runtime state and the policy derived from config.
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, init, validate, health).
//! - [`config`] -- Configuration model, file sources and validation.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`health`] -- Status endpoint reporting backend health and cache stats.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`server`] -- Axum server setup, shared application state, HTTP client,
//!   background sweeps and graceful shutdown.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `file-backends` | All file formats |
//! | `full` | All features |

// Binary crate: public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod backend;
pub mod cache;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod pipeline;
pub mod server;
