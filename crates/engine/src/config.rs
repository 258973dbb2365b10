//! Store and container configuration via `txstore.toml`
//!
//! A [`StoreConfig`] holds the settings handed to a store at
//! creation time. A [`ContainerConfig`] carries the defaults for every
//! store plus named overrides, and is usually loaded from a TOML file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use txstore_core::{DirtyCheck, Result, StoreError};

/// Config file name used by applications keeping the config next to their data
pub const CONFIG_FILE_NAME: &str = "txstore.toml";

/// Settings of one store
///
/// # Example
///
/// ```toml
/// track_original_value = true
/// dirty_check = "object_based"
/// check_views_after_commit = false
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Keep a clone of the committed value for every touched key.
    /// Needed by object-based dirty checking, listeners and tracked views.
    pub track_original_value: bool,
    /// How touched entries are selected for merge at commit
    pub dirty_check: DirtyCheck,
    /// Validate every tracked view against a full scan after each commit
    pub check_views_after_commit: bool,
    /// Fail store creation if the value type has no read-only mode
    pub strict_read_only: bool,
    /// Reject commits of entries that were committed concurrently
    pub stale_check: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            track_original_value: true,
            dirty_check: DirtyCheck::Explicit,
            check_views_after_commit: false,
            strict_read_only: false,
            stale_check: false,
        }
    }
}

impl StoreConfig {
    /// Enable or disable original-value tracking
    pub fn with_tracking(mut self, enabled: bool) -> Self {
        self.track_original_value = enabled;
        self
    }

    /// Set the dirty-check policy
    pub fn with_dirty_check(mut self, dirty_check: DirtyCheck) -> Self {
        self.dirty_check = dirty_check;
        self
    }

    /// Enable or disable the post-commit view consistency check
    pub fn with_view_checks(mut self, enabled: bool) -> Self {
        self.check_views_after_commit = enabled;
        self
    }

    /// Enable or disable strict read-only checking
    pub fn with_strict_read_only(mut self, enabled: bool) -> Self {
        self.strict_read_only = enabled;
        self
    }

    /// Enable or disable the stale-entry check
    pub fn with_stale_check(mut self, enabled: bool) -> Self {
        self.stale_check = enabled;
        self
    }

    /// Reject combinations that cannot work
    ///
    /// # Errors
    ///
    /// [`StoreError::TrackingDisabled`] if object-based dirty checking or the
    /// view consistency check is requested without original-value tracking.
    pub fn validate(&self, store: &str) -> Result<()> {
        if self.track_original_value {
            return Ok(());
        }
        let feature = if self.dirty_check == DirtyCheck::ObjectBased {
            "object-based dirty check"
        } else if self.check_views_after_commit {
            "view consistency check"
        } else {
            return Ok(());
        };
        Err(StoreError::TrackingDisabled {
            store: store.to_string(),
            feature,
        })
    }
}

/// Container-wide configuration
///
/// # Example
///
/// ```toml
/// [default_store]
/// dirty_check = "explicit"
///
/// [stores.accounts]
/// dirty_check = "object_based"
/// check_views_after_commit = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Configuration of stores without a named entry
    #[serde(default)]
    pub default_store: StoreConfig,
    /// Per-store overrides, by store name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stores: BTreeMap<String, StoreConfig>,
}

impl ContainerConfig {
    /// Configuration for the store with the given name
    pub fn store_config(&self, name: &str) -> StoreConfig {
        self.stores
            .get(name)
            .copied()
            .unwrap_or(self.default_store)
    }

    /// Add or replace a named store configuration
    pub fn with_store(mut self, name: impl Into<String>, config: StoreConfig) -> Self {
        self.stores.insert(name.into(), config);
        self
    }

    /// Validate every store configuration
    pub fn validate(&self) -> Result<()> {
        self.default_store.validate("<default>")?;
        for (name, config) in &self.stores {
            config.validate(name)?;
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# txstore container configuration
#
# Settings applied to every store without its own [stores.<name>] table.
[default_store]
# Keep a clone of the committed value for every key a transaction touches.
# Required for object-based dirty checks, modification listeners and
# tracked views.
track_original_value = true

# "explicit" (default): only update/remove mark an entry for merge
# "object_based": every touched entry is compared with its original value
dirty_check = "explicit"

# Validate all tracked views against a full scan after every commit
check_views_after_commit = false

# Refuse to create stores whose value type has no read-only mode
strict_read_only = false

# Reject commits of entries another transaction committed in the meantime
# (default is last-writer-wins)
stale_check = false

# Per-store overrides:
# [stores.accounts]
# dirty_check = "object_based"
"#
    }

    /// Parse config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the string cannot be parsed, and the
    /// validation error of the first invalid store configuration.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ContainerConfig = toml::from_str(content)
            .map_err(|e| StoreError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            StoreError::Config(msg) => {
                StoreError::Config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                StoreError::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| StoreError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            StoreError::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
