//! The per-request state machine.
//!
//! [`edge_handler`] is the axum fallback that receives every request not
//! aimed at the status endpoint. [`run`] drives one request through
//! classification ([`classify`]), cache lookup, the backend fetch and its
//! evaluation ([`fetch`]), the restart loop and error synthesis
//! ([`error_page`]), and finally enrichment ([`deliver`]).
//!
//! A restart re-enters classification with the restart count bumped,
//! which advances the backend chain. Clients never observe a restart.

pub mod classify;
pub mod context;
pub mod deliver;
pub mod error_page;
pub mod fetch;
pub mod headers;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;

use crate::backend::BackendId;
use crate::cache::flight::FlightGuard;
use crate::cache::{BaseKey, CacheObject, CachedRef, Fingerprint, Flight, FlightOutcome, Lookup};
use crate::engine::{Availability, Engine, Stats};
use crate::server::AppState;
use classify::Verdict;
use error_page::ErrorState;
use fetch::{FetchDecision, FetchInputs};
use transport::BackendRequest;

pub use context::{RequestContext, MAX_RESTARTS};
pub use deliver::{CacheOutcome, EdgeResponse};

/// A per-request failure. Never a process error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("purge not allowed for this client")]
    Forbidden,

    /// Internal code 801: the request did not arrive over a secure hop.
    #[error("insecure transport (801)")]
    InsecureTransport,

    #[error("backend {backend} is {availability}")]
    Unavailable {
        backend: String,
        availability: Availability,
    },

    #[error("backend {backend} unreachable: {reason}")]
    Transport { backend: String, reason: String },

    #[error("backend {backend} answered {status}")]
    Upstream { backend: String, status: StatusCode },
}

pub async fn edge_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    req_headers: HeaderMap,
    body: Bytes,
) -> Response {
    let correlation_id = req_headers
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), String::from);

    let ctx = RequestContext::new(
        addr.ip(),
        method,
        uri,
        req_headers,
        body,
        correlation_id.clone(),
        &state.engine.policy,
    );
    run(&state.engine, ctx).await.into_response(&correlation_id)
}

/// Drive one request to a terminal, enriched response.
pub async fn run(engine: &Arc<Engine>, mut ctx: RequestContext) -> EdgeResponse {
    let started = Instant::now();

    let mut response = loop {
        let step = match classify::recv(&mut ctx, &engine.registry, &engine.policy) {
            Ok(Verdict::Purge) => Ok(purge(engine, &ctx)),
            Ok(verdict) => attempt(engine, &ctx, verdict).await,
            Err(fault) => Err(fault),
        };

        let fault = match step {
            Ok(response) => break response,
            Err(fault) => fault,
        };

        let state = ErrorState::enter(&fault, ctx.restarts());
        if let Some(response) = state.render(&ctx) {
            match state {
                ErrorState::SyntheticPage => tracing::error!(
                    correlation_id = %ctx.correlation_id,
                    path = %ctx.uri.path(),
                    restarts = ctx.restarts(),
                    fault = %fault,
                    "all backends failed, serving error page"
                ),
                ErrorState::Refused => tracing::warn!(
                    correlation_id = %ctx.correlation_id,
                    client_ip = %ctx.purge_ip,
                    "purge refused"
                ),
                _ => tracing::debug!(
                    correlation_id = %ctx.correlation_id,
                    fault = %fault,
                    "request answered synthetically"
                ),
            }
            break response;
        }

        Stats::bump(&engine.stats.restarts);
        let restarts = ctx.restart();
        tracing::info!(
            correlation_id = %ctx.correlation_id,
            fault = %fault,
            restarts,
            "restarting request"
        );
    };

    deliver::enrich(&mut response.headers, &engine.policy, response.hits);

    let stats = &engine.stats;
    Stats::bump(match response.outcome {
        CacheOutcome::Hit => &stats.hits,
        CacheOutcome::Stale => &stats.stale,
        CacheOutcome::Miss => &stats.misses,
        CacheOutcome::Pass => &stats.passes,
        CacheOutcome::Synthetic => &stats.synthetic,
    });

    #[allow(clippy::cast_possible_truncation)]
    let elapsed_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        correlation_id = %ctx.correlation_id,
        method = %ctx.method,
        path = %ctx.uri.path(),
        status = response.status.as_u16(),
        restarts = ctx.restarts(),
        backend = response.backend.map(|b| engine.registry.get(b).name.as_str()).unwrap_or("-"),
        cache = response.outcome.as_str(),
        hits = response.hits,
        elapsed_ms,
        "request completed"
    );

    response
}

/// One pass through lookup and, if needed, a backend fetch.
async fn attempt(engine: &Arc<Engine>, ctx: &RequestContext, verdict: Verdict) -> Result<EdgeResponse, Fault> {
    let backend = ctx
        .backend
        .unwrap_or_else(|| engine.registry.select(ctx.restarts()));
    let fingerprint = engine.cache.fingerprint(&ctx.base, &ctx.headers);
    let now = Instant::now();

    if verdict == Verdict::Lookup {
        match engine.cache.lookup(&fingerprint, now) {
            Lookup::Fresh(cached) => {
                return Ok(serve(engine, &fingerprint, &cached, CacheOutcome::Hit, now));
            }
            Lookup::Stale(cached) if cached.object.staleness(now) < ctx.grace => {
                let availability = engine.availability(backend, &fingerprint, now);
                if availability != Availability::Ready || engine.flights.is_pending(&fingerprint) {
                    tracing::debug!(
                        correlation_id = %ctx.correlation_id,
                        backend = %engine.registry.get(backend).name,
                        availability = %availability,
                        "serving stale object"
                    );
                    return Ok(serve(engine, &fingerprint, &cached, CacheOutcome::Stale, now));
                }
            }
            Lookup::Stale(_) | Lookup::Miss => {}
        }
    }

    ensure_ready(engine, backend, &fingerprint)?;

    if verdict == Verdict::Pass {
        return fetch_detached(engine, ctx, backend, fingerprint, None).await;
    }

    let mut fingerprint = fingerprint;
    loop {
        let waiter = match engine.flights.join(fingerprint) {
            Flight::Leader(guard) => {
                return fetch_detached(engine, ctx, backend, fingerprint, Some(guard)).await;
            }
            Flight::Follower(waiter) => waiter,
        };

        match waiter.wait().await {
            FlightOutcome::Stored(cached) => {
                let now = Instant::now();
                let rekeyed = engine.cache.fingerprint(&ctx.base, &ctx.headers);
                if rekeyed == fingerprint {
                    return Ok(serve(engine, &fingerprint, &cached, CacheOutcome::Hit, now));
                }
                // the leader's response declared Vary; find this request's variant
                if let Lookup::Fresh(cached) = engine.cache.lookup(&rekeyed, now) {
                    return Ok(serve(engine, &rekeyed, &cached, CacheOutcome::Hit, now));
                }
                ensure_ready(engine, backend, &rekeyed)?;
                fingerprint = rekeyed;
            }
            FlightOutcome::Abandoned => {
                ensure_ready(engine, backend, &fingerprint)?;
                return fetch_detached(engine, ctx, backend, fingerprint, None).await;
            }
        }
    }
}

fn ensure_ready(engine: &Engine, backend: BackendId, fingerprint: &Fingerprint) -> Result<(), Fault> {
    match engine.availability(backend, fingerprint, Instant::now()) {
        Availability::Ready => Ok(()),
        availability => Err(Fault::Unavailable {
            backend: engine.registry.get(backend).name.clone(),
            availability,
        }),
    }
}

fn serve(
    engine: &Engine,
    fingerprint: &Fingerprint,
    cached: &CachedRef,
    outcome: CacheOutcome,
    now: Instant,
) -> EdgeResponse {
    let hits = engine
        .cache
        .record_hit(fingerprint)
        .unwrap_or_else(|| cached.record_hit());
    EdgeResponse::from_cache(cached, hits, outcome, now)
}

fn purge(engine: &Engine, ctx: &RequestContext) -> EdgeResponse {
    let removed: usize = [Method::GET, Method::HEAD]
        .iter()
        .map(|m| engine.cache.purge(&BaseKey::new(m, &ctx.uri, &ctx.headers)))
        .sum();
    Stats::bump(&engine.stats.purges);
    tracing::info!(
        correlation_id = %ctx.correlation_id,
        client_ip = %ctx.purge_ip,
        path = %ctx.uri.path(),
        removed,
        "purge"
    );

    let (status, body) = if removed > 0 {
        (StatusCode::OK, "Purged")
    } else {
        (StatusCode::NOT_FOUND, "Not in cache")
    };
    EdgeResponse::synthetic(
        status,
        Some("text/plain; charset=utf-8"),
        Bytes::from_static(body.as_bytes()),
    )
}

/// Run the fetch on its own task so a client disconnect cannot cancel
/// work that followers, or the cache, are waiting on.
async fn fetch_detached(
    engine: &Arc<Engine>,
    ctx: &RequestContext,
    backend: BackendId,
    fingerprint: Fingerprint,
    guard: Option<FlightGuard>,
) -> Result<EdgeResponse, Fault> {
    let policy = &engine.policy;
    let job = FetchJob {
        engine: Arc::clone(engine),
        backend,
        fingerprint,
        base: ctx.base.clone(),
        client_headers: ctx.headers.clone(),
        request: BackendRequest {
            method: ctx.method.clone(),
            uri: ctx.uri.clone(),
            headers: headers::build_backend_headers(ctx, &policy.forwarding, &policy.identity),
            body: ctx.body.clone(),
            correlation_id: ctx.correlation_id.clone(),
        },
        inputs: FetchInputs {
            cacheable_method: ctx.is_cacheable_method(),
            restarts: ctx.restarts(),
        },
        guard,
    };

    match tokio::spawn(job.run()).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(correlation_id = %ctx.correlation_id, error = %e, "fetch task failed");
            Err(Fault::Transport {
                backend: engine.registry.get(backend).name.clone(),
                reason: e.to_string(),
            })
        }
    }
}

struct FetchJob {
    engine: Arc<Engine>,
    backend: BackendId,
    fingerprint: Fingerprint,
    base: BaseKey,
    client_headers: HeaderMap,
    request: BackendRequest,
    inputs: FetchInputs,
    /// Held while leading a single-flight; dropping it abandons the flight.
    guard: Option<FlightGuard>,
}

impl FetchJob {
    async fn run(self) -> Result<EdgeResponse, Fault> {
        let engine = &self.engine;
        let backend = engine.registry.get(self.backend);

        let response = match transport::send(&engine.client, backend, &self.request).await {
            Ok(response) => response,
            Err(reason) => {
                self.mark_saint();
                return Err(Fault::Transport {
                    backend: backend.name.clone(),
                    reason,
                });
            }
        };

        match fetch::evaluate(response.status, &response.headers, self.inputs, &engine.policy) {
            FetchDecision::Restart | FetchDecision::Exhausted => {
                self.mark_saint();
                Err(Fault::Upstream {
                    backend: backend.name.clone(),
                    status: response.status,
                })
            }
            FetchDecision::Pass { reason } => {
                tracing::debug!(
                    correlation_id = %self.request.correlation_id,
                    backend = %backend.name,
                    reason,
                    "response not cacheable, passing"
                );
                Ok(EdgeResponse::passed(
                    response.status,
                    response.headers,
                    response.body,
                    self.backend,
                ))
            }
            FetchDecision::Store {
                fresh_for,
                grace_for,
                origin_age,
                vary,
            } => {
                engine.cache.declare_vary(&self.base, &vary);
                let key = Fingerprint::compute(&self.base, &vary, &self.client_headers);
                let now = Instant::now();
                let cached = engine.cache.store(
                    key,
                    Arc::new(CacheObject {
                        base: self.base.clone(),
                        status: response.status,
                        headers: response.headers,
                        body: response.body,
                        stored_at: now,
                        fresh_for,
                        grace_for,
                        origin_age,
                        backend: self.backend,
                    }),
                );
                tracing::debug!(
                    correlation_id = %self.request.correlation_id,
                    key = ?key,
                    fresh_secs = fresh_for.as_secs(),
                    grace_secs = grace_for.as_secs(),
                    "stored object"
                );

                let hits = cached.hits();
                if let Some(guard) = self.guard {
                    guard.complete(FlightOutcome::Stored(cached.clone()));
                }
                Ok(EdgeResponse::from_cache(&cached, hits, CacheOutcome::Miss, now))
            }
        }
    }

    fn mark_saint(&self) {
        if !self.inputs.cacheable_method {
            return;
        }
        let engine = &self.engine;
        engine.saints.mark(self.backend, self.fingerprint, Instant::now());
        tracing::warn!(
            correlation_id = %self.request.correlation_id,
            backend = %engine.registry.get(self.backend).name,
            key = ?self.fingerprint,
            period_ms = u64::try_from(engine.saints.period().as_millis()).unwrap_or(u64::MAX),
            "backend in saint mode for object"
        );
    }
}
