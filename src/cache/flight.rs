//! Single-flight table: at most one backend fetch per fingerprint.
//!
//! The first request to miss on a fingerprint becomes the leader and owns
//! a [`FlightGuard`]. Later requests for the same fingerprint become
//! followers and wait on the leader's outcome instead of hitting the
//! backend. A guard dropped without [`FlightGuard::complete`] reports
//! [`FlightOutcome::Abandoned`], so followers never wait forever.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use super::fingerprint::Fingerprint;
use super::store::CachedRef;

#[derive(Debug, Clone)]
pub enum FlightOutcome {
    /// The leader stored an object; followers serve it as a hit.
    Stored(CachedRef),
    /// Nothing was stored (pass, restart, error). Followers fetch on
    /// their own.
    Abandoned,
}

#[derive(Debug, Default)]
pub struct FlightTable {
    pending: DashMap<Fingerprint, watch::Receiver<Option<FlightOutcome>>>,
}

#[derive(Debug)]
pub enum Flight {
    Leader(FlightGuard),
    Follower(FlightWaiter),
}

impl FlightTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(self: &Arc<Self>, fingerprint: Fingerprint) -> Flight {
        match self.pending.entry(fingerprint) {
            Entry::Occupied(entry) => Flight::Follower(FlightWaiter {
                rx: entry.get().clone(),
            }),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx);
                Flight::Leader(FlightGuard {
                    table: Arc::clone(self),
                    fingerprint,
                    tx: Some(tx),
                })
            }
        }
    }

    /// Whether a fetch for `fingerprint` is already running.
    #[must_use]
    pub fn is_pending(&self, fingerprint: &Fingerprint) -> bool {
        self.pending.contains_key(fingerprint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug)]
pub struct FlightGuard {
    table: Arc<FlightTable>,
    fingerprint: Fingerprint,
    tx: Option<watch::Sender<Option<FlightOutcome>>>,
}

impl FlightGuard {
    pub fn complete(mut self, outcome: FlightOutcome) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(FlightOutcome::Abandoned));
        }
        self.table.pending.remove(&self.fingerprint);
    }
}

#[derive(Debug)]
pub struct FlightWaiter {
    rx: watch::Receiver<Option<FlightOutcome>>,
}

impl FlightWaiter {
    pub async fn wait(mut self) -> FlightOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(FlightOutcome::Abandoned),
            Err(_) => FlightOutcome::Abandoned,
        }
    }
}
