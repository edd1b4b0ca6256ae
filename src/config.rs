//! Engine configuration, read from TOML
//!
//! ```toml
//! [storage]
//! path = "/var/lib/doc-workflow"
//! flush_every_ms = 500
//!
//! [numbering]
//! sequence_width = 4
//! ```
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::ConfigError;
use super::numbering::MIN_SEQUENCE_WIDTH;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub numbering: NumberingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Database directory; ignored when `temporary` is set
    pub path: Option<PathBuf>,
    pub temporary: bool,
    /// sled background flush interval, sled's default when unset
    pub flush_every_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NumberingConfig {
    pub sequence_width: usize,
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            sequence_width: MIN_SEQUENCE_WIDTH,
        }
    }
}

impl EngineConfig {
    /// In-memory database, removed on drop
    pub fn temporary() -> Self {
        Self {
            storage: StorageConfig {
                temporary: true,
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                path: Some(path.into()),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.numbering.sequence_width < MIN_SEQUENCE_WIDTH {
            return Err(ConfigError::SequenceWidth(self.numbering.sequence_width));
        }
        if !self.storage.temporary && self.storage.path.is_none() {
            return Err(ConfigError::MissingPath);
        }
        Ok(())
    }

    pub fn open_db(&self) -> Result<sled::Db, super::error::WorkflowError> {
        self.validate()?;
        let mut sled_config = sled::Config::new().temporary(self.storage.temporary);
        match &self.storage.path {
            Some(path) if !self.storage.temporary => sled_config = sled_config.path(path),
            _ => {}
        }
        if self.storage.flush_every_ms.is_some() {
            sled_config = sled_config.flush_every_ms(self.storage.flush_every_ms);
        }
        Ok(sled_config.open()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_needs_a_path() {
        assert!(matches!(
            EngineConfig::from_toml_str(""),
            Err(ConfigError::MissingPath)
        ));
    }

    #[test]
    fn parses_all_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [storage]
            path = "/tmp/docs"
            flush_every_ms = 250

            [numbering]
            sequence_width = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.path, Some(PathBuf::from("/tmp/docs")));
        assert_eq!(config.storage.flush_every_ms, Some(250));
        assert_eq!(config.numbering.sequence_width, 5);
    }

    #[test]
    fn width_below_three_is_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [storage]
            temporary = true

            [numbering]
            sequence_width = 2
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SequenceWidth(2)));
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        let err = EngineConfig::from_toml_str("[storage]\ntemporary = true\ncolour = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn temporary_config_opens() {
        let db = EngineConfig::temporary().open_db().unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("engine.toml");
        std::fs::write(&file, "[storage]\ntemporary = true\n").unwrap();

        let config = EngineConfig::load(&file).unwrap();
        assert!(config.storage.temporary);
        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
