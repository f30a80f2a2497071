//! Active health probing.
//!
//! One background task per probed backend issues the configured request
//! line on a fixed interval and records the outcome into a rolling
//! window. A backend is healthy while the number of successes in the
//! window is at least the threshold. The window is a bitmap, newest
//! outcome in the lowest bit, so it holds at most 64 probes.
//!
//! The sentinel has no window and is never healthy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use http_body_util::Full;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{Backend, BackendId, ProbePolicy, Registry};
use crate::server::HttpClient;

/// Rolling window of the most recent probe outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeWindow {
    bits: u64,
    window: u8,
    threshold: u8,
}

impl ProbeWindow {
    /// A window seeded with `initial` successes.
    #[must_use]
    pub fn new(window: u8, threshold: u8, initial: u8) -> Self {
        let window = window.clamp(1, 64);
        let initial = initial.min(window);
        let bits = if initial == 64 {
            u64::MAX
        } else {
            (1u64 << initial) - 1
        };
        Self {
            bits,
            window,
            threshold,
        }
    }

    fn mask(&self) -> u64 {
        if self.window == 64 {
            u64::MAX
        } else {
            (1u64 << self.window) - 1
        }
    }

    pub fn record(&mut self, success: bool) {
        self.bits = ((self.bits << 1) | u64::from(success)) & self.mask();
    }

    #[must_use]
    pub fn successes(&self) -> u32 {
        self.bits.count_ones()
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.successes() >= u32::from(self.threshold)
    }
}

#[derive(Debug)]
struct ProbeRecord {
    window: ProbeWindow,
    last_probed: Option<Instant>,
}

/// Health state of a single backend. Each backend has its own lock.
#[derive(Debug)]
pub struct BackendHealth {
    healthy: AtomicBool,
    record: Option<Mutex<ProbeRecord>>,
}

impl BackendHealth {
    fn for_backend(backend: &Backend) -> Self {
        match &backend.probe {
            Some(policy) => {
                let window = ProbeWindow::new(policy.window, policy.threshold, policy.initial);
                Self {
                    healthy: AtomicBool::new(window.is_healthy()),
                    record: Some(Mutex::new(ProbeRecord {
                        window,
                        last_probed: None,
                    })),
                }
            }
            None => Self {
                healthy: AtomicBool::new(false),
                record: None,
            },
        }
    }
}

/// A health verdict change reported by [`HealthBoard::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    BecameHealthy,
    BecameSick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub successes: u32,
    pub window: u8,
    pub last_probed: Option<Instant>,
}

/// Health state of every backend, indexed by [`BackendId`].
#[derive(Debug)]
pub struct HealthBoard {
    states: Vec<BackendHealth>,
}

impl HealthBoard {
    #[must_use]
    pub fn new(registry: &Registry) -> Self {
        Self {
            states: registry.iter().map(BackendHealth::for_backend).collect(),
        }
    }

    #[must_use]
    pub fn is_healthy(&self, id: BackendId) -> bool {
        self.states[id.index()].healthy.load(Ordering::Acquire)
    }

    /// Record a probe outcome. Returns the verdict change, if any.
    pub fn record(&self, id: BackendId, success: bool, now: Instant) -> Option<Transition> {
        let state = &self.states[id.index()];
        let record = state.record.as_ref()?;
        let mut record = record.lock().unwrap_or_else(PoisonError::into_inner);
        record.window.record(success);
        record.last_probed = Some(now);
        let healthy = record.window.is_healthy();
        let was = state.healthy.swap(healthy, Ordering::AcqRel);
        match (was, healthy) {
            (false, true) => Some(Transition::BecameHealthy),
            (true, false) => Some(Transition::BecameSick),
            _ => None,
        }
    }

    #[must_use]
    pub fn snapshot(&self, id: BackendId) -> HealthSnapshot {
        let state = &self.states[id.index()];
        let healthy = state.healthy.load(Ordering::Acquire);
        match &state.record {
            Some(record) => {
                let record = record.lock().unwrap_or_else(PoisonError::into_inner);
                HealthSnapshot {
                    healthy,
                    successes: record.window.successes(),
                    window: record.window.window,
                    last_probed: record.last_probed,
                }
            }
            None => HealthSnapshot {
                healthy,
                successes: 0,
                window: 0,
                last_probed: None,
            },
        }
    }
}

/// Spawn one probe loop per probed backend.
pub fn spawn_probers(
    registry: &Arc<Registry>,
    board: &Arc<HealthBoard>,
    client: &HttpClient,
    shutdown: &watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    registry
        .iter()
        .filter_map(|backend| {
            let policy = backend.probe.clone()?;
            let backend = backend.clone();
            let board = Arc::clone(board);
            let client = client.clone();
            let shutdown = shutdown.clone();
            Some(tokio::spawn(async move {
                probe_loop(backend, policy, board, client, shutdown).await;
            }))
        })
        .collect()
}

async fn probe_loop(
    backend: Backend,
    policy: ProbePolicy,
    board: Arc<HealthBoard>,
    client: HttpClient,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(policy.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        backend = %backend.name,
        interval_ms = policy.interval.as_millis() as u64,
        threshold = policy.threshold,
        window = policy.window,
        "health prober started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::debug!(backend = %backend.name, "health prober shutting down");
                return;
            }
        }

        let success = probe_once(&client, &backend, &policy).await;
        match board.record(backend.id, success, Instant::now()) {
            Some(Transition::BecameHealthy) => {
                tracing::info!(backend = %backend.name, "backend became healthy");
            }
            Some(Transition::BecameSick) => {
                tracing::warn!(backend = %backend.name, "backend became sick");
            }
            None => {}
        }
    }
}

async fn probe_once(client: &HttpClient, backend: &Backend, policy: &ProbePolicy) -> bool {
    let uri = format!("{}{}", backend.base_url(), policy.path);
    let request = match hyper::Request::builder()
        .method(policy.method.clone())
        .uri(&uri)
        .header(hyper::header::HOST, format!("{}:{}", backend.host, backend.port))
        .header(hyper::header::USER_AGENT, "edgeward-probe")
        .body(Full::new(Bytes::new()))
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(backend = %backend.name, error = %e, "failed to build probe request");
            return false;
        }
    };

    match tokio::time::timeout(policy.timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            let ok = response.status() == policy.expected_status;
            tracing::debug!(
                backend = %backend.name,
                status = response.status().as_u16(),
                ok,
                "probe answered"
            );
            ok
        }
        Ok(Err(e)) => {
            tracing::debug!(backend = %backend.name, error = %e, "probe connection failed");
            false
        }
        Err(_) => {
            tracing::debug!(backend = %backend.name, "probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::chain_config;

    #[test]
    fn initial_seeds_the_window() {
        let window = ProbeWindow::new(5, 3, 3);
        assert_eq!(window.successes(), 3);
        assert!(window.is_healthy());

        let window = ProbeWindow::new(5, 3, 2);
        assert!(!window.is_healthy());
    }

    #[test]
    fn window_forgets_old_outcomes() {
        let mut window = ProbeWindow::new(3, 2, 3);
        window.record(false);
        assert!(window.is_healthy());
        window.record(false);
        assert!(!window.is_healthy());
        window.record(true);
        window.record(true);
        assert_eq!(window.successes(), 2);
        assert!(window.is_healthy());
    }

    #[test]
    fn full_width_window() {
        let mut window = ProbeWindow::new(64, 64, 64);
        assert!(window.is_healthy());
        window.record(false);
        assert_eq!(window.successes(), 63);
        assert!(!window.is_healthy());
    }

    #[test]
    fn board_reports_transitions() {
        let registry = Registry::from_config(&chain_config(1)).unwrap();
        let board = HealthBoard::new(&registry);
        let origin = registry.primary();
        let now = Instant::now();

        // default probe: window 5, threshold 3, initial 2
        assert!(!board.is_healthy(origin));
        assert_eq!(
            board.record(origin, true, now),
            Some(Transition::BecameHealthy)
        );
        assert_eq!(board.record(origin, true, now), None);
        assert!(board.is_healthy(origin));

        for _ in 0..3 {
            board.record(origin, false, now);
        }
        assert!(!board.is_healthy(origin));
        assert_eq!(board.snapshot(origin).last_probed, Some(now));
    }

    #[test]
    fn sentinel_is_never_healthy() {
        let registry = Registry::from_config(&chain_config(1)).unwrap();
        let board = HealthBoard::new(&registry);
        let sentinel = registry.sentinel();
        assert_eq!(board.record(sentinel, true, Instant::now()), None);
        assert!(!board.is_healthy(sentinel));
        assert_eq!(board.snapshot(sentinel).window, 0);
    }
}
