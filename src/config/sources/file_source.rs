//! Async file-based config source with SHA-256 versioning.
//!
//! [`FileSource`] implements [`ConfigSource`] for every supported file
//! format; the format picks the deserializer. The file is read through
//! Tokio, validated, and hashed so the status endpoint can report which
//! revision of the file is running.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{parse_config_str, sha256_hex};
use crate::config::model::Config;
use crate::config::validation::validate;
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::EdgewardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    #[cfg(feature = "yaml")]
    Yaml,
    #[cfg(feature = "json")]
    Json,
    #[cfg(feature = "toml")]
    Toml,
}

impl FileFormat {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "yaml")]
            Self::Yaml => "yaml",
            #[cfg(feature = "json")]
            Self::Json => "json",
            #[cfg(feature = "toml")]
            Self::Toml => "toml",
        }
    }
}

#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    format: FileFormat,
}

impl FileSource {
    #[must_use]
    pub const fn new(path: PathBuf, format: FileFormat) -> Self {
        Self { path, format }
    }

    async fn read_content(&self) -> Result<String, EdgewardError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                EdgewardError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                EdgewardError::Io(e)
            }
        })
    }

    fn parse(&self, content: &str) -> Result<Config, EdgewardError> {
        parse_config_str(
            self.format.name(),
            content,
            &self.path.display().to_string(),
        )
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.format.name()
    }

    async fn load(&self) -> Result<(Config, ConfigVersion), EdgewardError> {
        let content = self.read_content().await?;
        let config = self.parse(&content)?;

        if let Err(errors) = validate(&config) {
            return Err(EdgewardError::ConfigValidation { errors });
        }

        let hash = sha256_hex(content.as_bytes());
        Ok((config, ConfigVersion::Hash(hash)))
    }
}
