//! Request fingerprints.
//!
//! A [`BaseKey`] names a resource (method, lowercased host, path and
//! query). A [`Fingerprint`] names one stored variant of it: the base key
//! plus the values of every request header the response declared in
//! `Vary`. Fingerprints are SHA-256 digests so they are fixed-size and
//! cheap to copy into the saint ledger and single-flight table.

use std::fmt;

use axum::http::{header, HeaderMap, HeaderName, Method, Uri};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseKey(String);

impl BaseKey {
    #[must_use]
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| uri.authority().map(|a| a.as_str()))
            .unwrap_or("")
            .trim_end_matches('.')
            .to_ascii_lowercase();
        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        Self(format!("{method} {host}{path}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    #[must_use]
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Fingerprint of `base` as varied by `vary` request headers.
    #[must_use]
    pub fn compute(base: &BaseKey, vary: &[HeaderName], headers: &HeaderMap) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(base.as_str().as_bytes());
        for name in vary {
            hasher.update(b"\n");
            hasher.update(name.as_str().as_bytes());
            let mut values = headers.get_all(name).iter().peekable();
            if values.peek().is_none() {
                // absent differs from present-but-empty
                hasher.update(b"\x00");
                continue;
            }
            hasher.update(b":");
            for (i, value) in values.enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hasher.update(value.as_bytes());
            }
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
