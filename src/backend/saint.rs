//! Saint-mode ledger: per-(backend, object) cooldowns.
//!
//! After a backend fails to produce an object, that backend is excluded
//! from fetching that object until the cooldown expires. The exclusion is
//! independent of probe health: a backend can be healthy overall and
//! still be in saint mode for one object. Each backend owns its own map,
//! so marking one backend never contends with lookups against another.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{BackendId, Registry};
use crate::cache::Fingerprint;

#[derive(Debug)]
pub struct SaintLedger {
    period: Duration,
    per_backend: Vec<DashMap<Fingerprint, Instant>>,
}

impl SaintLedger {
    #[must_use]
    pub fn new(registry: &Registry, period: Duration) -> Self {
        Self {
            period,
            per_backend: (0..registry.len()).map(|_| DashMap::new()).collect(),
        }
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Exclude `backend` from fetching `fingerprint` until `now + period`.
    pub fn mark(&self, backend: BackendId, fingerprint: Fingerprint, now: Instant) -> Instant {
        let expiry = now + self.period;
        self.per_backend[backend.index()].insert(fingerprint, expiry);
        expiry
    }

    /// Whether a live entry forbids `backend` for `fingerprint`. Expired
    /// entries are removed on the way.
    #[must_use]
    pub fn is_excluded(&self, backend: BackendId, fingerprint: &Fingerprint, now: Instant) -> bool {
        let map = &self.per_backend[backend.index()];
        let Some(expiry) = map.get(fingerprint).map(|e| *e) else {
            return false;
        };
        if now > expiry {
            map.remove_if(fingerprint, |_, e| now > *e);
            false
        } else {
            true
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut removed = 0;
        for map in &self.per_backend {
            let before = map.len();
            map.retain(|_, expiry| now <= *expiry);
            removed += before - map.len();
        }
        removed
    }

    /// Live entries across all backends.
    #[must_use]
    pub fn live(&self, now: Instant) -> usize {
        self.per_backend
            .iter()
            .map(|map| map.iter().filter(|e| now <= *e.value()).count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::chain_config;

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::of(s.as_bytes())
    }

    fn ledger() -> (Registry, SaintLedger) {
        let registry = Registry::from_config(&chain_config(2)).unwrap();
        let ledger = SaintLedger::new(&registry, Duration::from_secs(5));
        (registry, ledger)
    }

    #[test]
    fn excluded_until_expiry() {
        let (registry, ledger) = ledger();
        let origin = registry.primary();
        let now = Instant::now();

        ledger.mark(origin, fp("/a"), now);
        assert!(ledger.is_excluded(origin, &fp("/a"), now));
        assert!(ledger.is_excluded(origin, &fp("/a"), now + Duration::from_secs(5)));
        assert!(!ledger.is_excluded(origin, &fp("/a"), now + Duration::from_secs(6)));
        assert_eq!(ledger.live(now), 0);
    }

    #[test]
    fn scoped_to_backend_and_object() {
        let (registry, ledger) = ledger();
        let origin = registry.primary();
        let mirror = registry.select(2);
        let now = Instant::now();

        ledger.mark(origin, fp("/a"), now);
        assert!(!ledger.is_excluded(origin, &fp("/b"), now));
        assert!(!ledger.is_excluded(mirror, &fp("/a"), now));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let (registry, ledger) = ledger();
        let origin = registry.primary();
        let mirror = registry.select(2);
        let now = Instant::now();

        ledger.mark(origin, fp("/a"), now);
        ledger.mark(mirror, fp("/b"), now + Duration::from_secs(10));

        assert_eq!(ledger.sweep(now + Duration::from_secs(6)), 1);
        assert_eq!(ledger.live(now + Duration::from_secs(6)), 1);
    }
}
