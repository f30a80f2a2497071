//! Response freshness directives.
//!
//! Parses the parts of `Cache-Control`, `Age`, `Vary` and `Set-Cookie`
//! that decide whether and for how long a backend response may be kept.

use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub max_age: Option<u64>,
    pub s_maxage: Option<u64>,
    pub private: bool,
    pub no_store: bool,
    pub no_cache: bool,
    pub stale_while_revalidate: Option<u64>,
    pub stale_if_error: Option<u64>,
}

impl CacheDirectives {
    #[must_use]
    pub fn parse(headers: &HeaderMap) -> Self {
        let mut d = Self::default();
        for value in headers.get_all(header::CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for token in value.split(',') {
                let token = token.trim();
                let (name, arg) = match token.split_once('=') {
                    Some((n, a)) => (n.trim(), Some(a.trim().trim_matches('"'))),
                    None => (token, None),
                };
                let secs = arg.and_then(|a| a.parse::<u64>().ok());
                match name.to_ascii_lowercase().as_str() {
                    "max-age" => d.max_age = secs.or(d.max_age),
                    "s-maxage" => d.s_maxage = secs.or(d.s_maxage),
                    // `private="set-cookie"` still makes the whole response private
                    "private" => d.private = true,
                    "no-store" => d.no_store = true,
                    "no-cache" => d.no_cache = true,
                    "stale-while-revalidate" => d.stale_while_revalidate = secs,
                    "stale-if-error" => d.stale_if_error = secs,
                    _ => {}
                }
            }
        }
        d
    }

    /// Whether the response must not enter the shared store.
    #[must_use]
    pub const fn forbids_storage(&self) -> bool {
        self.private || self.no_store || self.no_cache
    }

    /// Shared-cache lifetime as declared by the origin, if any.
    #[must_use]
    pub fn lifetime(&self) -> Option<u64> {
        self.s_maxage.or(self.max_age)
    }

    /// Stale window the origin itself allows.
    #[must_use]
    pub fn origin_grace(&self) -> Duration {
        let secs = self
            .stale_if_error
            .into_iter()
            .chain(self.stale_while_revalidate)
            .max()
            .unwrap_or(0);
        Duration::from_secs(secs)
    }
}

/// The `Age` the origin reported, in whole seconds.
#[must_use]
pub fn origin_age(headers: &HeaderMap) -> u64 {
    headers
        .get(header::AGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vary {
    /// `Vary: *` never matches a later request.
    Any,
    Headers(Vec<HeaderName>),
}

/// Request headers the response varies on, sorted and deduplicated.
#[must_use]
pub fn vary(headers: &HeaderMap) -> Vary {
    let mut names = Vec::new();
    for value in headers.get_all(header::VARY) {
        let Ok(value) = value.to_str() else { continue };
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "*" {
                return Vary::Any;
            }
            if let Ok(name) = token.to_ascii_lowercase().parse::<HeaderName>() {
                names.push(name);
            }
        }
    }
    names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    names.dedup();
    Vary::Headers(names)
}

#[must_use]
pub fn sets_cookie(headers: &HeaderMap) -> bool {
    headers.contains_key(header::SET_COOKIE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(name: HeaderName, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(name, value.parse().unwrap());
        map
    }

    #[test]
    fn parses_max_age_and_flags() {
        let d = CacheDirectives::parse(&with(header::CACHE_CONTROL, "max-age=1800, public"));
        assert_eq!(d.max_age, Some(1800));
        assert!(!d.forbids_storage());

        let d = CacheDirectives::parse(&with(header::CACHE_CONTROL, "private, max-age=60"));
        assert!(d.forbids_storage());

        let d = CacheDirectives::parse(&with(header::CACHE_CONTROL, "No-Store"));
        assert!(d.no_store);
    }

    #[test]
    fn s_maxage_wins_over_max_age() {
        let d = CacheDirectives::parse(&with(header::CACHE_CONTROL, "max-age=10, s-maxage=300"));
        assert_eq!(d.lifetime(), Some(300));
    }

    #[test]
    fn origin_grace_takes_the_longer_window() {
        let d = CacheDirectives::parse(&with(
            header::CACHE_CONTROL,
            "max-age=10, stale-while-revalidate=30, stale-if-error=600",
        ));
        assert_eq!(d.origin_grace(), Duration::from_secs(600));
        assert_eq!(CacheDirectives::default().origin_grace(), Duration::ZERO);
    }

    #[test]
    fn age_header() {
        assert_eq!(origin_age(&with(header::AGE, "100")), 100);
        assert_eq!(origin_age(&with(header::AGE, "soon")), 0);
        assert_eq!(origin_age(&HeaderMap::new()), 0);
    }

    #[test]
    fn vary_is_normalized() {
        assert_eq!(
            vary(&with(header::VARY, "Accept-Encoding, accept-language, Accept-Encoding")),
            Vary::Headers(vec![header::ACCEPT_ENCODING, header::ACCEPT_LANGUAGE])
        );
        assert_eq!(vary(&with(header::VARY, "Accept, *")), Vary::Any);
        assert_eq!(vary(&HeaderMap::new()), Vary::Headers(vec![]));
    }
}
