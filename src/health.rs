//! Status endpoint handler.
//!
//! Returns a [`StatusResponse`] JSON payload: version, identity, uptime,
//! config source metadata, the health verdict of every backend, cache
//! and saint-mode occupancy, and cumulative request counters.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::engine::StatsSnapshot;
use crate::server::AppState;

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub identity: String,
    pub uptime_seconds: u64,
    pub config: ConfigStatus,
    pub backends: Vec<BackendStatus>,
    pub cache: CacheStatus,
    pub stats: StatsResponse,
}

#[derive(Serialize, Deserialize)]
pub struct ConfigStatus {
    pub source: String,
    pub version: String,
    pub loaded_ago_seconds: u64,
}

#[derive(Serialize, Deserialize)]
pub struct BackendStatus {
    pub id: String,
    pub role: String,
    pub address: String,
    pub healthy: bool,
    pub successes: u32,
    pub window: u8,
    pub last_probed_ago_ms: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub struct CacheStatus {
    pub objects: usize,
    pub saint_entries: usize,
    pub fetches_in_flight: usize,
}

#[derive(Serialize, Deserialize)]
pub struct StatsResponse {
    pub hits: u64,
    pub stale: u64,
    pub misses: u64,
    pub passes: u64,
    pub synthetic: u64,
    pub restarts: u64,
    pub purges: u64,
}

impl From<StatsSnapshot> for StatsResponse {
    fn from(s: StatsSnapshot) -> Self {
        Self {
            hits: s.hits,
            stale: s.stale,
            misses: s.misses,
            passes: s.passes,
            synthetic: s.synthetic,
            restarts: s.restarts,
            purges: s.purges,
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let engine = &state.engine;
    let now = Instant::now();

    let backends: Vec<BackendStatus> = engine
        .registry
        .iter()
        .map(|backend| {
            let snap = engine.health.snapshot(backend.id);
            BackendStatus {
                id: backend.name.clone(),
                role: backend.role.to_string(),
                address: format!("{}:{}", backend.host, backend.port),
                healthy: snap.healthy,
                successes: snap.successes,
                window: snap.window,
                last_probed_ago_ms: snap
                    .last_probed
                    .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            }
        })
        .collect();

    // the sentinel is never healthy, so it does not count against status
    let degraded = engine
        .registry
        .iter()
        .filter(|b| !b.is_sentinel())
        .any(|b| !engine.health.is_healthy(b.id));

    Json(StatusResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        identity: engine.policy.identity.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        config: ConfigStatus {
            source: state.config.source_name.clone(),
            version: state.config.version.short().to_string(),
            loaded_ago_seconds: state.config.loaded_at.elapsed().as_secs(),
        },
        backends,
        cache: CacheStatus {
            objects: engine.cache.len(),
            saint_entries: engine.saints.live(now),
            fetches_in_flight: engine.flights.len(),
        },
        stats: engine.stats.snapshot().into(),
    })
}
