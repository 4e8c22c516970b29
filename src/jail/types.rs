//! Jail record and property value types

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Value iocage reports for a property that was never set
pub const UNSET: &str = "-";

/// Raw property map as reported by `iocage get all`
pub type Properties = BTreeMap<String, String>;

/// Collections iocage can list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Jails,
    Templates,
    Plugins,
    Releases,
}

impl ResourceKind {
    /// Arguments of the `iocage list` invocation for this collection
    pub fn list_args(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Jails => &["list", "-hl"],
            ResourceKind::Templates => &["list", "-hlt"],
            ResourceKind::Plugins => &["list", "-hP"],
            ResourceKind::Releases => &["list", "-hr"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Jails => "jails",
            ResourceKind::Templates => "templates",
            ResourceKind::Plugins => "plugins",
            ResourceKind::Releases => "releases",
        };
        write!(f, "{}", s)
    }
}

/// Observed run state of a jail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Up,
    Down,
}

impl RunState {
    /// Parse the listing token; anything but `up`/`down` is unknown
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(RunState::Up),
            "down" => Some(RunState::Down),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Up => write!(f, "up"),
            RunState::Down => write!(f, "down"),
        }
    }
}

/// A jail or template as reported by `list -hl` / `list -hlt`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JailRecord {
    pub jid: String,
    pub name: String,
    pub boot: String,
    pub state: RunState,
    #[serde(rename = "type")]
    pub jail_type: String,
    pub release: String,
    pub ip4: String,
    pub ip6: String,
    pub template: String,
    /// Only present in the 10-column listing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basejail: Option<String>,
    pub properties: Properties,
}

impl JailRecord {
    pub fn is_up(&self) -> bool {
        self.state == RunState::Up
    }
}

/// An installed plugin as reported by `list -hP`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginRecord {
    pub jid: String,
    pub name: String,
    pub boot: String,
    pub state: RunState,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub release: String,
    pub ip4: String,
    pub ip6: String,
    pub template: String,
    pub portal: String,
    pub doc_url: String,
}

/// A desired property value
///
/// Values arrive as strings (CLI) or TOML scalars (manifest) and are
/// normalized here once, so the write and compare rules stay in one place.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean-like, written as `0`/`1`
    Bool(bool),
    /// Free text
    Text(String),
    /// Empty value, written as `none`
    Sentinel,
    /// Other scalar (numbers, `-`), written as-is
    Raw(String),
}

impl PropertyValue {
    /// Classify a string value
    ///
    /// Boolean words are matched exactly; `Yes` or `OFF` stay text.
    pub fn parse(s: &str) -> Self {
        match s {
            "1" | "yes" | "on" | "true" => PropertyValue::Bool(true),
            "0" | "no" | "off" | "false" => PropertyValue::Bool(false),
            "" => PropertyValue::Sentinel,
            UNSET => PropertyValue::Raw(UNSET.to_string()),
            _ => PropertyValue::Text(s.to_string()),
        }
    }

    /// Whether the value means "leave unset" (empty, or iocage's own `-`)
    pub fn is_unset(&self) -> bool {
        match self {
            PropertyValue::Sentinel => true,
            PropertyValue::Raw(s) => s == UNSET,
            _ => false,
        }
    }

    /// Whether the value counts as "nothing" when the jail has it unset
    pub fn is_falsy(&self) -> bool {
        self.is_unset() || *self == PropertyValue::Bool(false)
    }

    /// The string iocage receives and reports back for this value
    pub fn wire(&self) -> String {
        match self {
            PropertyValue::Bool(true) => "1".to_string(),
            PropertyValue::Bool(false) => "0".to_string(),
            PropertyValue::Text(s) | PropertyValue::Raw(s) => s.clone(),
            PropertyValue::Sentinel => "none".to_string(),
        }
    }

    /// Human-readable `key=value` rendering, text quoted
    pub fn render(&self, key: &str) -> String {
        match self {
            PropertyValue::Text(s) => format!("{}=\"{}\"", key, s),
            other => format!("{}={}", key, other.wire()),
        }
    }

    /// Convert a manifest value, naming the property and jail on failure
    pub fn from_toml(value: &toml::Value, property: &str, jail: &str) -> Result<Self> {
        match value {
            toml::Value::Boolean(b) => Ok(PropertyValue::Bool(*b)),
            toml::Value::Integer(0) => Ok(PropertyValue::Bool(false)),
            toml::Value::Integer(1) => Ok(PropertyValue::Bool(true)),
            toml::Value::Integer(i) => Ok(PropertyValue::Raw(i.to_string())),
            toml::Value::Float(f) => Ok(PropertyValue::Raw(f.to_string())),
            toml::Value::String(s) => Ok(PropertyValue::parse(s)),
            other => Err(Error::Configuration(format!(
                "Unable to set attribute {} to {} for jail {}",
                property, other, jail
            ))),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire())
    }
}

/// Desired properties in caller order
pub type DesiredProperties = Vec<(String, PropertyValue)>;
