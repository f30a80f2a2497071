//! Shared response cache.
//!
//! - [`fingerprint`]: base keys and `Vary`-aware fingerprints
//! - [`directives`]: `Cache-Control`, `Age` and `Vary` parsing
//! - [`store`]: objects, freshness windows and hit counts
//! - [`flight`]: coalescing of concurrent misses

pub mod directives;
pub mod fingerprint;
pub mod flight;
pub mod store;

pub use fingerprint::{BaseKey, Fingerprint};
pub use flight::{Flight, FlightOutcome, FlightTable};
pub use store::{CacheObject, CacheStore, CachedRef, Lookup};
