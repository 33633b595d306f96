//! Configuration management for the Schema Registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (PROTOREG__*, e.g. PROTOREG__VALIDATION__DEFAULT_PROFILE)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! data_dir = "./registries"
//!
//! [[registries]]
//! name = "main"
//! storage = "git"
//! remote = "git@example.com:schemas/main.git"
//!
//! [[registries]]
//! name = "staging"
//! storage = "git"
//! path = "/var/lib/registry/staging"
//! shadow_of = "main"
//! profile = "allow-all"
//!
//! [validation]
//! default_profile = "avro-evolve"
//! allow_deprecated_removal = true
//!
//! [lint]
//! disabled = ["MESSAGE_DOCUMENTED"]
//!
//! [lint.severity]
//! ENUM_VALUE_PREFIX = "error"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::lint::LintConfig;
use crate::profile::{ProfileOptions, Profiles};
use crate::registry::RegistrySettings;

/// Main configuration for the schema registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base directory for git registries without an explicit path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Registries to open
    #[serde(default = "default_registries")]
    pub registries: Vec<RegistryDefinition>,

    /// Compatibility profile settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Lint rule tuning, shared by all registries
    #[serde(default)]
    pub lint: LintConfig,
}

/// One `[[registries]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDefinition {
    pub name: String,

    #[serde(default)]
    pub storage: StorageKind,

    /// Git working tree; defaults to `<data_dir>/<name>`
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Git remote the working tree is cloned from and pushed to
    #[serde(default)]
    pub remote: Option<String>,

    /// Upstream registry this one shadows
    #[serde(default)]
    pub shadow_of: Option<String>,

    /// Overrides `validation.default_profile`
    #[serde(default)]
    pub profile: Option<String>,
}

impl RegistryDefinition {
    pub fn new(name: impl Into<String>, storage: StorageKind) -> Self {
        Self {
            name: name.into(),
            storage,
            path: None,
            remote: None,
            shadow_of: None,
            profile: None,
        }
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Git,
    Memory,
}

/// Validation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Profile used when neither the request nor the registry names one
    #[serde(default = "default_profile")]
    pub default_profile: String,

    /// Removing a deprecated field is a warning
    #[serde(default)]
    pub allow_deprecated_removal: bool,

    /// Removing a field whose number is reserved is a warning
    #[serde(default)]
    pub allow_reserved_removal: bool,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("registries")
}

fn default_profile() -> String {
    Profiles::DEFAULT.to_string()
}

fn default_registries() -> Vec<RegistryDefinition> {
    vec![RegistryDefinition::new("default", StorageKind::Git)]
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile(),
            allow_deprecated_removal: false,
            allow_reserved_removal: false,
        }
    }
}

impl ValidationConfig {
    pub fn profile_options(&self) -> ProfileOptions {
        ProfileOptions {
            allow_deprecated_removal: self.allow_deprecated_removal,
            allow_reserved_removal: self.allow_reserved_removal,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            registries: default_registries(),
            validation: ValidationConfig::default(),
            lint: LintConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["registry.toml", ".registry.toml", "config/registry.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "protoreg", "registry") {
            let xdg_config = config_dir.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (PROTOREG__*)
        builder = builder.add_source(
            Environment::with_prefix("PROTOREG")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn definition(&self, name: &str) -> Option<&RegistryDefinition> {
        self.registries.iter().find(|r| r.name == name)
    }

    /// Git working tree of a registry (resolves relative paths)
    pub fn registry_path(&self, definition: &RegistryDefinition) -> PathBuf {
        let path = definition
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(&definition.name));
        if path.is_absolute() {
            path
        } else {
            std::env::current_dir().unwrap_or_default().join(path)
        }
    }

    /// Validation policy of a registry
    pub fn settings_for(&self, definition: &RegistryDefinition) -> RegistrySettings {
        RegistrySettings {
            profile: definition
                .profile
                .clone()
                .unwrap_or_else(|| self.validation.default_profile.clone()),
            profile_options: self.validation.profile_options(),
            lint: self.lint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Severity;

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.registries.len(), 1);
        assert_eq!(config.registries[0].storage, StorageKind::Git);
        assert_eq!(config.validation.default_profile, "avro-evolve");
        assert!(config.registry_path(&config.registries[0]).ends_with("registries/default"));
    }

    #[test]
    fn test_parse_config_file() {
        let toml_str = r#"
            [[registries]]
            name = "main"
            remote = "/srv/git/schemas.git"

            [[registries]]
            name = "staging"
            storage = "memory"
            shadow_of = "main"
            profile = "allow-all"

            [validation]
            allow_deprecated_removal = true

            [lint]
            disabled = ["MESSAGE_DOCUMENTED"]

            [lint.severity]
            ENUM_VALUE_PREFIX = "error"
        "#;
        let config: RegistryConfig = toml::from_str(toml_str).unwrap();

        let staging = config.definition("staging").unwrap();
        assert_eq!(staging.storage, StorageKind::Memory);
        assert_eq!(staging.shadow_of.as_deref(), Some("main"));
        assert!(staging.remote.is_none());
        assert_eq!(
            config.definition("main").unwrap().remote.as_deref(),
            Some("/srv/git/schemas.git")
        );

        let settings = config.settings_for(staging);
        assert_eq!(settings.profile, "allow-all");
        assert!(settings.profile_options.allow_deprecated_removal);
        assert_eq!(
            settings.lint.severity.get("ENUM_VALUE_PREFIX"),
            Some(&Severity::Error)
        );
        assert_eq!(config.settings_for(config.definition("main").unwrap()).profile, "avro-evolve");
    }

    #[test]
    fn test_serialize_config() {
        let config = RegistryConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[[registries]]"));
        assert!(toml_str.contains("[validation]"));
    }
}
