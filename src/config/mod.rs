//! Configuration loading and validation.
//!
//! Defines the [`ConfigSource`] trait for pluggable config formats and
//! the [`ConfigVersion`] enum reported on the status endpoint.
//! Submodules provide the data model, validation logic, and concrete
//! file sources. The backend registry built from a loaded config is
//! immutable, so there is no hot reload.

pub mod model;
pub mod sources;
pub mod validation;

use async_trait::async_trait;

use crate::error::EdgewardError;
use model::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigVersion {
    Hash(String),
}

impl ConfigVersion {
    /// First eight characters of the digest.
    #[must_use]
    pub fn short(&self) -> &str {
        match self {
            Self::Hash(h) => h.get(..8).unwrap_or(h),
        }
    }
}

// async_trait is required here because ConfigSource is used as Box<dyn ConfigSource>.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self) -> Result<(Config, ConfigVersion), EdgewardError>;
}
