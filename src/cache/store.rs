//! The shared object store.
//!
//! Objects are keyed by [`Fingerprint`]. Each slot pairs the current
//! object with a hit counter; replacing the object swaps the `Arc` but
//! keeps the counter, so hits accumulate across refreshes. A slot only
//! starts again from zero when no entry existed before the store.
//!
//! Freshness is evaluated against an explicit `now` so the arithmetic
//! can be tested without sleeping:
//!
//! ```text
//! stored_at        +fresh_for            +grace_for
//!     |---- Fresh ----|------ Stale --------|---- Miss ...
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderName, StatusCode};
use bytes::Bytes;
use dashmap::DashMap;

use super::fingerprint::{BaseKey, Fingerprint};
use crate::backend::BackendId;

#[derive(Debug)]
pub struct CacheObject {
    pub base: BaseKey,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at: Instant,
    pub fresh_for: Duration,
    pub grace_for: Duration,
    /// `Age` reported by the origin when the object was fetched.
    pub origin_age: u64,
    pub backend: BackendId,
}

impl CacheObject {
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.stored_at + self.fresh_for
    }

    #[must_use]
    pub fn is_servable(&self, now: Instant) -> bool {
        now < self.stored_at + self.fresh_for + self.grace_for
    }

    /// How far past its freshness the object is; zero while fresh.
    #[must_use]
    pub fn staleness(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at + self.fresh_for)
    }

    /// Origin age plus whole seconds spent in this cache.
    #[must_use]
    pub fn age(&self, now: Instant) -> u64 {
        self.origin_age + now.saturating_duration_since(self.stored_at).as_secs()
    }
}

/// A handle to a stored object and its hit counter.
#[derive(Debug, Clone)]
pub struct CachedRef {
    pub object: Arc<CacheObject>,
    hits: Arc<AtomicU64>,
}

impl CachedRef {
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Acquire)
    }

    /// Count one serve of this object. Returns the new count.
    pub fn record_hit(&self) -> u64 {
        self.hits.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[derive(Debug, Clone)]
pub enum Lookup {
    Fresh(CachedRef),
    Stale(CachedRef),
    Miss,
}

#[derive(Debug)]
struct Slot {
    object: Arc<CacheObject>,
    hits: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
pub struct CacheStore {
    slots: DashMap<Fingerprint, Slot>,
    vary: DashMap<BaseKey, Arc<[HeaderName]>>,
}

impl CacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request headers known to vary `base`.
    #[must_use]
    pub fn vary_for(&self, base: &BaseKey) -> Arc<[HeaderName]> {
        self.vary
            .get(base)
            .map_or_else(|| Arc::from(Vec::new()), |v| Arc::clone(v.value()))
    }

    /// Fingerprint for a request, folding in the known `Vary` headers.
    #[must_use]
    pub fn fingerprint(&self, base: &BaseKey, headers: &HeaderMap) -> Fingerprint {
        Fingerprint::compute(base, &self.vary_for(base), headers)
    }

    /// Record the `Vary` headers a response declared. Returns whether
    /// they differ from what was known before; if so, variants keyed by
    /// the old list are dropped since no request can reach them.
    pub fn declare_vary(&self, base: &BaseKey, names: &[HeaderName]) -> bool {
        let known = self.vary_for(base);
        if *known == *names {
            return false;
        }
        if names.is_empty() {
            self.vary.remove(base);
        } else {
            self.vary.insert(base.clone(), Arc::from(names));
        }
        self.slots.retain(|_, slot| slot.object.base != *base);
        true
    }

    #[must_use]
    pub fn lookup(&self, fingerprint: &Fingerprint, now: Instant) -> Lookup {
        let Some(slot) = self.slots.get(fingerprint) else {
            return Lookup::Miss;
        };
        let cached = CachedRef {
            object: Arc::clone(&slot.object),
            hits: Arc::clone(&slot.hits),
        };
        drop(slot);

        if cached.object.is_fresh(now) {
            Lookup::Fresh(cached)
        } else if cached.object.is_servable(now) {
            Lookup::Stale(cached)
        } else {
            Lookup::Miss
        }
    }

    /// Store or replace the object for `fingerprint`. An existing hit
    /// count is carried over.
    pub fn store(&self, fingerprint: Fingerprint, object: Arc<CacheObject>) -> CachedRef {
        let mut slot = self
            .slots
            .entry(fingerprint)
            .and_modify(|slot| slot.object = Arc::clone(&object))
            .or_insert_with(|| Slot {
                object: Arc::clone(&object),
                hits: Arc::new(AtomicU64::new(0)),
            });
        CachedRef {
            object,
            hits: Arc::clone(&slot.value_mut().hits),
        }
    }

    /// Count one serve of `fingerprint`. Returns the new count, or `None`
    /// when nothing is stored.
    pub fn record_hit(&self, fingerprint: &Fingerprint) -> Option<u64> {
        self.slots
            .get(fingerprint)
            .map(|slot| slot.hits.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Remove every variant of `base`. Returns how many were removed.
    pub fn purge(&self, base: &BaseKey) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.object.base != *base);
        self.vary.remove(base);
        before - self.slots.len()
    }

    /// Drop objects whose grace window has ended, and the `Vary` lists
    /// of bases with nothing left stored.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.object.is_servable(now));
        let removed = before - self.slots.len();

        let live: HashSet<BaseKey> = self
            .slots
            .iter()
            .map(|slot| slot.object.base.clone())
            .collect();
        self.vary.retain(|base, _| live.contains(base));
        removed
    }

    /// Number of bases with a remembered `Vary` list.
    #[must_use]
    pub fn vary_len(&self) -> usize {
        self.vary.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::chain_config;
    use crate::backend::Registry;
    use axum::http::{header, Method, Uri};

    fn base(path: &str) -> BaseKey {
        let uri: Uri = path.parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "example.com".parse().unwrap());
        BaseKey::new(&Method::GET, &uri, &headers)
    }

    fn object(path: &str, body: &'static str, now: Instant, fresh: u64, grace: u64) -> Arc<CacheObject> {
        let registry = Registry::from_config(&chain_config(1)).unwrap();
        Arc::new(CacheObject {
            base: base(path),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            stored_at: now,
            fresh_for: Duration::from_secs(fresh),
            grace_for: Duration::from_secs(grace),
            origin_age: 0,
            backend: registry.primary(),
        })
    }

    fn fp(store: &CacheStore, path: &str) -> Fingerprint {
        store.fingerprint(&base(path), &HeaderMap::new())
    }

    #[test]
    fn fresh_stale_miss_boundaries() {
        let store = CacheStore::new();
        let now = Instant::now();
        let key = fp(&store, "/a");
        store.store(key, object("/a", "body", now, 10, 20));

        assert!(matches!(store.lookup(&key, now), Lookup::Fresh(_)));
        assert!(matches!(
            store.lookup(&key, now + Duration::from_secs(9)),
            Lookup::Fresh(_)
        ));
        assert!(matches!(
            store.lookup(&key, now + Duration::from_secs(10)),
            Lookup::Stale(_)
        ));
        assert!(matches!(
            store.lookup(&key, now + Duration::from_secs(29)),
            Lookup::Stale(_)
        ));
        assert!(matches!(
            store.lookup(&key, now + Duration::from_secs(30)),
            Lookup::Miss
        ));
        assert!(matches!(store.lookup(&fp(&store, "/b"), now), Lookup::Miss));
    }

    #[test]
    fn hit_count_survives_refresh() {
        let store = CacheStore::new();
        let now = Instant::now();
        let key = fp(&store, "/a");

        let first = store.store(key, object("/a", "old", now, 10, 0));
        assert_eq!(first.hits(), 0);
        assert_eq!(store.record_hit(&key), Some(1));
        assert_eq!(store.record_hit(&key), Some(2));

        let refreshed = store.store(key, object("/a", "new", now, 10, 0));
        assert_eq!(refreshed.hits(), 2);
        assert_eq!(refreshed.record_hit(), 3);

        match store.lookup(&key, now) {
            Lookup::Fresh(cached) => {
                assert_eq!(cached.object.body, Bytes::from_static(b"new"));
                assert_eq!(cached.hits(), 3);
            }
            other => panic!("expected fresh, got {other:?}"),
        }
    }

    #[test]
    fn hits_persist_across_stale_serves() {
        let store = CacheStore::new();
        let now = Instant::now();
        let key = fp(&store, "/a");
        store.store(key, object("/a", "x", now, 1, 100));

        let later = now + Duration::from_secs(5);
        let Lookup::Stale(cached) = store.lookup(&key, later) else {
            panic!("expected stale");
        };
        assert_eq!(cached.record_hit(), 1);
        assert_eq!(store.record_hit(&key), Some(2));
    }

    #[test]
    fn record_hit_on_missing_entry() {
        let store = CacheStore::new();
        assert_eq!(store.record_hit(&fp(&store, "/nope")), None);
    }

    #[test]
    fn age_adds_time_in_cache() {
        let now = Instant::now();
        let mut obj = Arc::try_unwrap(object("/a", "x", now, 1800, 0)).unwrap();
        obj.origin_age = 100;
        assert_eq!(obj.age(now + Duration::from_millis(5_400)), 105);
        assert_eq!(obj.staleness(now), Duration::ZERO);
    }

    #[test]
    fn declared_vary_changes_fingerprint() {
        let store = CacheStore::new();
        let b = base("/a");
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_LANGUAGE, "fr".parse().unwrap());

        let before = store.fingerprint(&b, &headers);
        assert!(store.declare_vary(&b, &[header::ACCEPT_LANGUAGE]));
        assert!(!store.declare_vary(&b, &[header::ACCEPT_LANGUAGE]));
        assert_ne!(store.fingerprint(&b, &headers), before);
    }

    #[test]
    fn changed_vary_drops_unreachable_variants() {
        let store = CacheStore::new();
        let now = Instant::now();
        let b = base("/a");
        store.store(fp(&store, "/a"), object("/a", "plain", now, 100, 0));
        store.store(fp(&store, "/b"), object("/b", "other", now, 100, 0));

        assert!(store.declare_vary(&b, &[header::ACCEPT_ENCODING]));
        assert_eq!(store.len(), 1);
        assert!(matches!(store.lookup(&fp(&store, "/b"), now), Lookup::Fresh(_)));

        store.store(fp(&store, "/a"), object("/a", "gzip", now, 100, 0));
        assert!(!store.declare_vary(&b, &[header::ACCEPT_ENCODING]));
        assert_eq!(store.len(), 2);

        assert!(store.declare_vary(&b, &[]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.vary_len(), 0);
    }

    #[test]
    fn sweep_forgets_vary_of_emptied_bases() {
        let store = CacheStore::new();
        let now = Instant::now();
        store.declare_vary(&base("/short"), &[header::ACCEPT_ENCODING]);
        store.declare_vary(&base("/long"), &[header::ACCEPT_ENCODING]);
        store.store(fp(&store, "/short"), object("/short", "s", now, 10, 0));
        store.store(fp(&store, "/long"), object("/long", "l", now, 100, 0));
        assert_eq!(store.vary_len(), 2);

        assert_eq!(store.sweep(now + Duration::from_secs(50)), 1);
        assert_eq!(store.vary_len(), 1);
        assert_eq!(store.vary_for(&base("/long")).len(), 1);
        assert!(store.vary_for(&base("/short")).is_empty());
    }

    #[test]
    fn purge_and_sweep() {
        let store = CacheStore::new();
        let now = Instant::now();
        store.store(fp(&store, "/a"), object("/a", "a", now, 10, 0));
        store.store(fp(&store, "/b"), object("/b", "b", now, 100, 0));

        assert_eq!(store.purge(&base("/a")), 1);
        assert_eq!(store.purge(&base("/a")), 0);
        assert_eq!(store.len(), 1);

        assert_eq!(store.sweep(now + Duration::from_secs(50)), 0);
        assert_eq!(store.sweep(now + Duration::from_secs(100)), 1);
        assert!(store.is_empty());
    }
}
