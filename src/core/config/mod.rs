//! core::config
//!
//! Configuration schema and loading.
//!
//! # Overview
//!
//! There are two configuration scopes:
//! - **Global**: User-level settings
//! - **Channel**: Per-channel overrides and host binding
//!
//! # Precedence
//!
//! Configuration values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Channel config file
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$SITESTAGE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/sitestage/config.toml`
//! 3. `~/.sitestage/config.toml` (canonical write location)
//!
//! # Channel Config Locations
//!
//! Searched in order:
//! 1. `<channel_dir>/.sitestage/channel.toml` (canonical)
//! 2. `<channel_dir>/.sitestage.toml` (compatibility, warns)
//!
//! # Example
//!
//! ```no_run
//! use sitestage::core::config::Config;
//! use std::path::Path;
//!
//! let result = Config::load(Some(Path::new("/srv/channels/intranet"))).unwrap();
//! let config = result.config;
//!
//! println!("Max suffix: {}", config.max_suffix());
//! println!("Denormalize shared containers: {}", config.denormalize_shared());
//! ```

pub mod schema;

pub use schema::{ChannelConfig, GlobalConfig};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::types::{NodeKind, RelPath, WORKSPACE};

/// Default highest collision suffix.
pub const DEFAULT_MAX_SUFFIX: u32 = 10_000;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("home directory not found")]
    NoHomeDir,
}

/// Warnings generated during config loading.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    /// The warning message.
    pub message: String,
    /// The path that triggered the warning.
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    /// The loaded configuration.
    pub config: Config,
    /// Any warnings generated during loading.
    pub warnings: Vec<ConfigWarning>,
}

/// Merged configuration from all sources.
///
/// Accessor methods apply precedence rules automatically. Channel config
/// overrides global config.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Global configuration
    pub global: GlobalConfig,
    /// Channel configuration (if loaded for a channel)
    pub channel: Option<ChannelConfig>,
    global_path: Option<PathBuf>,
    channel_path: Option<PathBuf>,
}

impl Config {
    /// Build a config from in-memory parts, without touching the filesystem.
    pub fn from_parts(global: GlobalConfig, channel: Option<ChannelConfig>) -> Self {
        Self {
            global,
            channel,
            global_path: None,
            channel_path: None,
        }
    }

    /// Load configuration from default locations.
    ///
    /// If `channel_dir` is provided, also loads channel-specific config.
    ///
    /// # Errors
    ///
    /// Returns an error if config files exist but cannot be parsed or fail
    /// validation. Missing config files are not an error (defaults are used).
    pub fn load(channel_dir: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let mut warnings = Vec::new();

        let (global, global_path) = Self::load_global()?;

        let (channel, channel_path) = if let Some(dir) = channel_dir {
            Self::load_channel(dir, &mut warnings)?
        } else {
            (None, None)
        };

        global.validate()?;
        if let Some(ref c) = channel {
            c.validate()?;
        }

        for warning in &warnings {
            tracing::warn!(path = %warning.path.display(), "{}", warning.message);
        }

        Ok(ConfigLoadResult {
            config: Config {
                global,
                channel,
                global_path,
                channel_path,
            },
            warnings,
        })
    }

    /// Load global configuration from standard locations.
    fn load_global() -> Result<(GlobalConfig, Option<PathBuf>), ConfigError> {
        if let Ok(path) = std::env::var("SITESTAGE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("sitestage/config.toml");
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        if let Some(home) = dirs::home_dir() {
            let path = home.join(".sitestage/config.toml");
            if path.exists() {
                let config = Self::read_config(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((GlobalConfig::default(), None))
    }

    /// Load channel configuration from standard locations.
    fn load_channel(
        channel_dir: &Path,
        warnings: &mut Vec<ConfigWarning>,
    ) -> Result<(Option<ChannelConfig>, Option<PathBuf>), ConfigError> {
        let canonical = Self::channel_config_path(channel_dir);
        if canonical.exists() {
            let config = Self::read_config(&canonical)?;
            return Ok((Some(config), Some(canonical)));
        }

        let compat = channel_dir.join(".sitestage.toml");
        if compat.exists() {
            warnings.push(ConfigWarning {
                message: format!(
                    "Using deprecated config location. Please move to '{}'",
                    canonical.display()
                ),
                path: compat.clone(),
            });
            let config = Self::read_config(&compat)?;
            return Ok((Some(config), Some(compat)));
        }

        Ok((None, None))
    }

    /// Read and parse a TOML config file.
    fn read_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Get the canonical path for global config.
    ///
    /// Returns `~/.sitestage/config.toml`.
    pub fn global_config_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".sitestage/config.toml"))
    }

    /// Get the canonical path for channel config.
    pub fn channel_config_path(channel_dir: &Path) -> PathBuf {
        channel_dir.join(".sitestage/channel.toml")
    }

    /// Write global config atomically.
    pub fn write_global(config: &GlobalConfig) -> Result<PathBuf, ConfigError> {
        let path = Self::global_config_path()?;
        Self::write_config_atomic(&path, config)?;
        Ok(path)
    }

    /// Write channel config atomically.
    pub fn write_channel(channel_dir: &Path, config: &ChannelConfig) -> Result<PathBuf, ConfigError> {
        config.validate()?;
        let path = Self::channel_config_path(channel_dir);
        Self::write_config_atomic(&path, config)?;
        Ok(path)
    }

    /// Write a config file atomically (temp file + rename).
    fn write_config_atomic<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: path.to_path_buf(),
                source: e,
            })?;
        }

        let contents =
            toml::to_string_pretty(config).map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        file.write_all(contents.as_bytes())
            .map_err(|e| ConfigError::WriteError {
                path: temp_path.clone(),
                source: e,
            })?;

        file.sync_all().map_err(|e| ConfigError::WriteError {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(())
    }

    // =========================================================================
    // Accessor methods with precedence
    // =========================================================================

    /// Highest collision suffix tried by name searches.
    ///
    /// Defaults to [`DEFAULT_MAX_SUFFIX`].
    pub fn max_suffix(&self) -> u32 {
        self.channel
            .as_ref()
            .and_then(|c| c.naming.as_ref())
            .and_then(|n| n.max_suffix)
            .or_else(|| self.global.naming.as_ref().and_then(|n| n.max_suffix))
            .unwrap_or(DEFAULT_MAX_SUFFIX)
    }

    /// Check if cross-channel copy inlines shared containers.
    ///
    /// Defaults to `true`.
    pub fn denormalize_shared(&self) -> bool {
        self.global
            .copy
            .as_ref()
            .and_then(|c| c.denormalize_shared)
            .unwrap_or(true)
    }

    /// Host the channel is bound to, if configured.
    pub fn host(&self) -> Option<&str> {
        self.channel.as_ref().and_then(|c| c.host.as_deref())
    }

    /// Mount path of the channel.
    ///
    /// Defaults to `/`.
    pub fn mount(&self) -> &str {
        self.channel
            .as_ref()
            .and_then(|c| c.mount.as_deref())
            .unwrap_or("/")
    }

    /// Default parent path for new nodes of `kind`.
    ///
    /// A channel override wins; otherwise `workspace/<collection>`. Kinds
    /// without a collection (folders, container items) have no default.
    pub fn default_parent(&self, kind: NodeKind) -> Option<RelPath> {
        let overridden = self
            .channel
            .as_ref()
            .and_then(|c| c.collections.as_ref())
            .and_then(|m| m.get(kind.as_str()))
            .and_then(|p| RelPath::parse(p).ok());
        if overridden.is_some() {
            return overridden;
        }
        kind.default_collection()
            .and_then(|c| RelPath::parse(&format!("{}/{}", WORKSPACE, c)).ok())
    }

    /// Get the path to the loaded global config file.
    pub fn global_config_loaded_from(&self) -> Option<&Path> {
        self.global_path.as_deref()
    }

    /// Get the path to the loaded channel config file.
    pub fn channel_config_loaded_from(&self) -> Option<&Path> {
        self.channel_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.max_suffix(), DEFAULT_MAX_SUFFIX);
        assert!(config.denormalize_shared());
        assert_eq!(config.mount(), "/");
        assert!(config.host().is_none());
    }

    #[test]
    fn default_parent_per_kind() {
        let config = Config::default();
        assert_eq!(
            config.default_parent(NodeKind::SitemapItem).unwrap().to_string(),
            "workspace/sitemap"
        );
        assert_eq!(
            config.default_parent(NodeKind::Page).unwrap().to_string(),
            "workspace/pages"
        );
        assert!(config.default_parent(NodeKind::ContainerItem).is_none());
    }

    #[test]
    fn channel_collection_override() {
        let mut collections = BTreeMap::new();
        collections.insert("page".to_string(), "workspace/pages/main".to_string());
        let config = Config::from_parts(
            GlobalConfig::default(),
            Some(ChannelConfig {
                collections: Some(collections),
                ..Default::default()
            }),
        );
        assert_eq!(
            config.default_parent(NodeKind::Page).unwrap().to_string(),
            "workspace/pages/main"
        );
    }

    #[test]
    fn channel_overrides_global_max_suffix() {
        let config = Config::from_parts(
            GlobalConfig {
                naming: Some(schema::NamingConfig {
                    max_suffix: Some(100),
                }),
                ..Default::default()
            },
            Some(ChannelConfig {
                naming: Some(schema::NamingConfig { max_suffix: Some(5) }),
                ..Default::default()
            }),
        );
        assert_eq!(config.max_suffix(), 5);
    }

    #[test]
    fn load_channel_config() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".sitestage");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("channel.toml"),
            r#"
            host = "intranet.example.org"
            mount = "/"
            "#,
        )
        .unwrap();

        let result = Config::load(Some(temp.path())).unwrap();
        assert_eq!(result.config.host(), Some("intranet.example.org"));
        assert!(result.warnings.is_empty());
        assert!(result.config.channel_config_loaded_from().is_some());
    }

    #[test]
    fn load_channel_compat_warns() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".sitestage.toml"), "mount = \"/docs\"").unwrap();

        let result = Config::load(Some(temp.path())).unwrap();
        assert_eq!(result.config.mount(), "/docs");
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].message.contains("deprecated"));
    }

    #[test]
    fn write_channel_config_atomic() {
        let temp = TempDir::new().unwrap();
        let config = ChannelConfig {
            host: Some("www.example.org".to_string()),
            ..Default::default()
        };

        let path = Config::write_channel(temp.path(), &config).unwrap();
        assert!(path.exists());

        let loaded = Config::load(Some(temp.path())).unwrap();
        assert_eq!(loaded.config.host(), Some("www.example.org"));
    }

    #[test]
    fn invalid_channel_config_rejected() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".sitestage");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("channel.toml"), "mount = \"relative\"").unwrap();

        assert!(Config::load(Some(temp.path())).is_err());
    }
}
