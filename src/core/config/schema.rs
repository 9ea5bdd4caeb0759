//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Global Config
//!
//! Located at (in order of precedence):
//! 1. `$SITESTAGE_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/sitestage/config.toml`
//! 3. `~/.sitestage/config.toml` (canonical write location)
//!
//! # Channel Config
//!
//! Located at `<channel_dir>/.sitestage/channel.toml` (canonical).
//!
//! # Validation
//!
//! Config values are validated after parsing to ensure they conform to
//! expected formats (e.g., collection overrides must be workspace paths).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::{NodeKind, RelPath};

/// Global configuration (user scope).
///
/// # Example
///
/// ```toml
/// [naming]
/// max_suffix = 500
///
/// [copy]
/// denormalize_shared = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Name collision settings
    pub naming: Option<NamingConfig>,

    /// Cross-channel copy settings
    pub copy: Option<CopyConfig>,
}

impl GlobalConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(naming) = &self.naming {
            naming.validate()?;
        }
        Ok(())
    }
}

/// Channel configuration.
///
/// # Example
///
/// ```toml
/// host = "www.example.org"
/// mount = "/"
///
/// [naming]
/// max_suffix = 50
///
/// [collections]
/// sitemap-item = "workspace/sitemap"
/// page = "workspace/pages/main"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Host the channel is bound to
    pub host: Option<String>,

    /// Mount path on the host
    pub mount: Option<String>,

    /// Channel-level naming overrides
    pub naming: Option<NamingConfig>,

    /// Default parent per node kind, keyed by kind tag
    pub collections: Option<BTreeMap<String, String>>,
}

impl ChannelConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                return Err(ConfigError::InvalidValue("host cannot be empty".to_string()));
            }
        }

        if let Some(mount) = &self.mount {
            if !mount.starts_with('/') {
                return Err(ConfigError::InvalidValue(format!(
                    "mount '{}' must start with '/'",
                    mount
                )));
            }
        }

        if let Some(naming) = &self.naming {
            naming.validate()?;
        }

        for (kind, path) in self.collections.iter().flatten() {
            kind.parse::<NodeKind>()
                .map_err(|e| ConfigError::InvalidValue(format!("collections: {}", e)))?;
            let path = RelPath::parse(path)
                .map_err(|e| ConfigError::InvalidValue(format!("collections.{}: {}", kind, e)))?;
            if !path.is_workspace() {
                return Err(ConfigError::InvalidValue(format!(
                    "collections.{} must point into the workspace, got '{}'",
                    kind, path
                )));
            }
        }

        Ok(())
    }
}

/// Name collision settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConfig {
    /// Highest `-N` suffix tried before giving up
    pub max_suffix: Option<u32>,
}

impl NamingConfig {
    /// Validate the naming configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_suffix == Some(0) {
            return Err(ConfigError::InvalidValue(
                "naming.max_suffix must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cross-channel copy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CopyConfig {
    /// Replace shared-container references with inline copies
    pub denormalize_shared: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_global_config() {
        let toml = r#"
            [naming]
            max_suffix = 20

            [copy]
            denormalize_shared = false
        "#;

        let config: GlobalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.naming.unwrap().max_suffix, Some(20));
        assert_eq!(config.copy.unwrap().denormalize_shared, Some(false));
    }

    #[test]
    fn parse_channel_config() {
        let toml = r#"
            host = "www.example.org"
            mount = "/intranet"

            [collections]
            page = "workspace/pages/main"
        "#;

        let config: ChannelConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.host.as_deref(), Some("www.example.org"));
        assert_eq!(
            config.collections.unwrap().get("page").map(String::as_str),
            Some("workspace/pages/main")
        );
    }

    #[test]
    fn zero_max_suffix_rejected() {
        let config = GlobalConfig {
            naming: Some(NamingConfig {
                max_suffix: Some(0),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn collection_outside_workspace_rejected() {
        let mut collections = BTreeMap::new();
        collections.insert("page".to_string(), "pages".to_string());
        let config = ChannelConfig {
            collections: Some(collections),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut collections = BTreeMap::new();
        collections.insert("widget".to_string(), "workspace/widgets".to_string());
        let config = ChannelConfig {
            collections: Some(collections),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn relative_mount_rejected() {
        let config = ChannelConfig {
            mount: Some("intranet".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_fields_rejected() {
        let toml = r#"
            [naming]
            max_suffix = 20
            gap_fill = true
        "#;
        let result: Result<GlobalConfig, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
