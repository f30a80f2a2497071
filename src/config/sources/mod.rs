//! Concrete [`ConfigSource`](super::ConfigSource) implementations.
//!
//! Provides a file-based source (YAML, JSON, TOML gated by feature flags),
//! [`create_file_source`] for extension-based selection, and the
//! [`parse_config_str`] helper for format-specific deserialization.

pub mod file_source;

use std::path::Path;

use sha2::{Digest, Sha256};

use super::ConfigSource;
use file_source::{FileFormat, FileSource};
use crate::config::model::Config;
use crate::error::EdgewardError;

/// Parse a config string based on file extension.
pub fn parse_config_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<Config, EdgewardError> {
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| EdgewardError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| EdgewardError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| EdgewardError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        other => Err(EdgewardError::UnsupportedFormat(other.to_string())),
    }
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Pick the file source matching the path's extension.
pub fn create_file_source(path: &Path) -> Result<Box<dyn ConfigSource>, EdgewardError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => Ok(Box::new(FileSource::new(
            path.to_path_buf(),
            FileFormat::Yaml,
        ))),

        #[cfg(feature = "json")]
        "json" => Ok(Box::new(FileSource::new(
            path.to_path_buf(),
            FileFormat::Json,
        ))),

        #[cfg(feature = "toml")]
        "toml" => Ok(Box::new(FileSource::new(
            path.to_path_buf(),
            FileFormat::Toml,
        ))),

        other => Err(EdgewardError::UnsupportedFormat(other.to_string())),
    }
}
