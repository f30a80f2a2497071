//! Request classification, re-run on every restart.

use std::time::Duration;

use super::context::RequestContext;
use super::Fault;
use crate::backend::Registry;
use crate::engine::Policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Try the cache first; fetch and maybe store on a miss.
    Lookup,
    /// Go straight to the backend and never store.
    Pass,
    /// Authorized cache invalidation.
    Purge,
}

/// Classify the request and pick the backend for this attempt.
///
/// Credentials (cookies, `Authorization`) do not bypass the cache;
/// freshness and `Vary` rules decide what is shared.
pub fn recv(ctx: &mut RequestContext, registry: &Registry, policy: &Policy) -> Result<Verdict, Fault> {
    if ctx.method == policy.purge_method {
        if !policy.purge_allow.contains(&ctx.purge_ip) {
            return Err(Fault::Forbidden);
        }
        return Ok(Verdict::Purge);
    }

    if policy.require_secure && !ctx.secure {
        return Err(Fault::InsecureTransport);
    }

    ctx.grace = policy.grace;
    ctx.backend = Some(registry.select(ctx.restarts()));
    // fallbacks never serve stale
    if ctx.restarts() >= 2 {
        ctx.grace = Duration::ZERO;
    }

    if ctx.is_cacheable_method() {
        Ok(Verdict::Lookup)
    } else {
        Ok(Verdict::Pass)
    }
}
