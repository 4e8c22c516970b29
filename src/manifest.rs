//! Configuration and manifest files
//!
//! Both are TOML with the same layout: a `[config]` table for settings of
//! this tool and a `[target]` table declaring the desired state of one jail.
//! Command-line flags override the manifest field by field.

use crate::error::{Error, Result};
use crate::iocage::runner::DEFAULT_IOCAGE_PATH;
use crate::iocage::split_words;
use crate::jail::PropertyValue;
use crate::planner::{DEFAULT_USER, DesiredState, Verb};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "iocage-reconcile.toml";

/// Load a manifest from a file
pub fn load(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let manifest: Manifest = toml::from_str(&content)?;
    manifest.validate()?;

    Ok(manifest)
}

/// Load the configuration file
///
/// An explicit path must exist; the default path may be missing.
pub fn load_config(path: Option<&Path>) -> Result<Manifest> {
    match path {
        Some(path) => load(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.exists() {
                load(default)
            } else {
                Ok(Manifest::default())
            }
        }
    }
}

/// Root of a configuration or manifest file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Tool settings
    pub config: Option<GlobalConfig>,

    /// Desired state
    pub target: Option<TargetDef>,
}

impl Manifest {
    /// Validate the manifest
    pub fn validate(&self) -> Result<()> {
        if let Some(config) = &self.config
            && config.default_user.trim().is_empty()
        {
            return Err(Error::Configuration("default_user must not be empty".into()));
        }

        if let Some(target) = &self.target {
            target.validate()?;
        }

        Ok(())
    }

    /// Settings from `self`, falling back to `base`
    pub fn settings(&self, base: &Manifest) -> GlobalConfig {
        self.config
            .clone()
            .or_else(|| base.config.clone())
            .unwrap_or_default()
    }
}

/// Global configuration settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Path of the iocage executable
    #[serde(default = "default_iocage_path")]
    pub iocage_path: PathBuf,

    /// User for `exec` when the target names none
    #[serde(default = "default_user")]
    pub default_user: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            iocage_path: default_iocage_path(),
            default_user: default_user(),
        }
    }
}

fn default_iocage_path() -> PathBuf {
    PathBuf::from(DEFAULT_IOCAGE_PATH)
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

/// Desired state of one jail (or `ALL`)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDef {
    pub state: Option<Verb>,
    pub name: Option<String>,
    pub release: Option<String>,
    pub clone_from: Option<String>,
    pub plugin: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
    pub cmd: Option<String>,
    pub user: Option<String>,
    pub pkglist: Option<String>,
    pub update: Option<bool>,
    /// Extra iocage arguments as one string
    pub args: Option<String>,
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub properties: toml::Table,
}

impl TargetDef {
    /// Reject names iocage cannot take as a single argument
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("name", &self.name), ("clone_from", &self.clone_from)] {
            if let Some(value) = value
                && (value.is_empty() || value.chars().any(char::is_whitespace))
            {
                return Err(Error::Configuration(format!(
                    "Invalid {} '{}': must be non-empty without whitespace",
                    field, value
                )));
            }
        }
        Ok(())
    }

    /// Merge `other` over `self`; `other`'s set fields win
    pub fn merge(self, other: TargetDef) -> TargetDef {
        let mut properties = self.properties;
        properties.extend(other.properties);

        TargetDef {
            state: other.state.or(self.state),
            name: other.name.or(self.name),
            release: other.release.or(self.release),
            clone_from: other.clone_from.or(self.clone_from),
            plugin: other.plugin.or(self.plugin),
            components: if other.components.is_empty() {
                self.components
            } else {
                other.components
            },
            cmd: other.cmd.or(self.cmd),
            user: other.user.or(self.user),
            pkglist: other.pkglist.or(self.pkglist),
            update: other.update.or(self.update),
            args: other.args.or(self.args),
            dry_run: other.dry_run.or(self.dry_run),
            properties,
        }
    }

    /// Build the desired state, converting every property value
    pub fn into_desired(self, config: &GlobalConfig) -> Result<DesiredState> {
        self.validate()?;

        let jail = self.name.clone().unwrap_or_default();
        let properties = self
            .properties
            .iter()
            .map(|(key, value)| Ok((key.clone(), PropertyValue::from_toml(value, key, &jail)?)))
            .collect::<Result<Vec<_>>>()?;

        let args = match self.args.as_deref() {
            Some(args) => split_words(args)?,
            None => Vec::new(),
        };

        Ok(DesiredState {
            state: self.state.unwrap_or_default(),
            name: self.name,
            properties,
            clone_from: self.clone_from,
            release: self.release,
            plugin: self.plugin,
            components: self.components,
            cmd: self.cmd,
            user: self.user.unwrap_or_else(|| config.default_user.clone()),
            pkglist: self.pkglist,
            update: self.update.unwrap_or(false),
            args,
            dry_run: self.dry_run.unwrap_or(false),
        })
    }
}
