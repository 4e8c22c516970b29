//! Property diffing and the restart policy
//!
//! The differ turns desired properties into the smallest set of
//! `iocage set` assignments. The restart policy decides whether those
//! assignments only take effect after the jail is brought down and up again.

use crate::error::{Error, Result};
use crate::iocage::properties::{is_placeholder, placeholder};
use crate::jail::{DesiredProperties, Properties, PropertyValue, UNSET};

/// Properties iocage only applies when the jail starts
pub const RESTART_KEYS: &[&str] = &[
    "ip4_addr",
    "ip6_addr",
    "template",
    "interfaces",
    "vnet",
    "host_hostname",
];

/// Ordered property assignments
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    changes: Vec<(String, PropertyValue)>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an assignment, keeping the original position on replace
    pub fn insert(&mut self, key: &str, value: PropertyValue) {
        match self.changes.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.changes.push((key.to_string(), value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.changes.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// `key=value` arguments as passed to iocage
    pub fn args(&self) -> Vec<String> {
        self.changes
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.wire()))
            .collect()
    }

    /// Human-readable assignments, text values quoted
    pub fn rendered(&self) -> Vec<String> {
        self.changes.iter().map(|(k, v)| v.render(k)).collect()
    }

    /// Whether applying this changeset needs a stop/start bracket
    pub fn requires_restart(&self) -> bool {
        requires_restart(self.keys())
    }
}

/// True when any changed key only takes effect on the next start
pub fn requires_restart<'a>(keys: impl IntoIterator<Item = &'a str>) -> bool {
    keys.into_iter().any(|k| RESTART_KEYS.contains(&k))
}

/// Compute the assignments that move `existing` to `desired`
///
/// A placeholder `existing` map stands for a jail that does not exist yet:
/// every representable desired value is then part of the changeset.
pub fn diff(jail: &str, existing: &Properties, desired: &DesiredProperties) -> Result<Changeset> {
    let new_jail = is_placeholder(existing);
    let mut changes = Changeset::new();

    for (key, value) in desired {
        if key.is_empty() {
            return Err(Error::Configuration(format!(
                "Unable to set attribute with an empty name to {} for jail {}",
                value, jail
            )));
        }

        if key == "template" {
            continue;
        }

        let current = existing.get(key).map(String::as_str);

        if new_jail {
            if !value.is_unset() {
                changes.insert(key, value.clone());
            }
            continue;
        }

        let Some(current) = current else {
            continue;
        };

        if current == UNSET && value.is_falsy() {
            continue;
        }

        if current != value.wire() {
            changes.insert(key, value.clone());
        }
    }

    Ok(changes)
}

/// Properties passed to `iocage create` for a new jail
pub fn initial_properties(jail: &str, desired: &DesiredProperties) -> Result<Changeset> {
    diff(jail, &placeholder(), desired)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn existing(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn desired(pairs: &[(&str, &str)]) -> DesiredProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PropertyValue::parse(v)))
            .collect()
    }

    #[test]
    fn test_equal_after_coercion_is_noop() {
        let e = existing(&[("boot", "1"), ("notes", "web")]);
        let d = desired(&[("boot", "yes"), ("notes", "web")]);
        assert!(diff("www", &e, &d).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let e = existing(&[("boot", "0")]);
        let d = desired(&[("no_such_property", "1")]);
        assert!(diff("www", &e, &d).unwrap().is_empty());
    }

    #[test]
    fn test_template_is_never_diffed() {
        let e = existing(&[("template", "0")]);
        let d = desired(&[("template", "1")]);
        assert!(diff("www", &e, &d).unwrap().is_empty());
    }

    #[test]
    fn test_unset_stays_unset_for_falsy_values() {
        let e = existing(&[("ip6_addr", "-"), ("vnet", "-")]);
        let d = desired(&[("ip6_addr", "-"), ("vnet", "off")]);
        assert!(diff("www", &e, &d).unwrap().is_empty());
    }

    #[test]
    fn test_changed_values_keep_caller_order() {
        let e = existing(&[("boot", "0"), ("ip4_addr", "-"), ("notes", "none")]);
        let d = desired(&[("notes", "db"), ("boot", "on"), ("ip4_addr", "lo1|10.1.0.6")]);

        let changes = diff("db", &e, &d).unwrap();
        assert_eq!(changes.keys(), vec!["notes", "boot", "ip4_addr"]);
        assert_eq!(
            changes.args(),
            vec!["notes=db", "boot=1", "ip4_addr=lo1|10.1.0.6"]
        );
        assert_eq!(changes.rendered()[0], "notes=\"db\"");
    }

    #[test]
    fn test_sentinel_clears_existing_text() {
        let e = existing(&[("notes", "old")]);
        let d = desired(&[("notes", "")]);
        assert_eq!(diff("www", &e, &d).unwrap().args(), vec!["notes=none"]);
    }

    #[test]
    fn test_dash_is_written_literally() {
        let e = existing(&[("notes", "old"), ("ip6_addr", "-")]);
        let d = desired(&[("notes", "-"), ("ip6_addr", "-")]);
        assert_eq!(diff("www", &e, &d).unwrap().args(), vec!["notes=-"]);
    }

    #[test]
    fn test_capitalised_words_are_text() {
        let e = existing(&[("notes", "none")]);
        let d = desired(&[("notes", "Yes")]);
        assert_eq!(diff("www", &e, &d).unwrap().args(), vec!["notes=Yes"]);
    }

    #[test]
    fn test_new_jail_takes_every_value() {
        let d = desired(&[("boot", "on"), ("notes", "-"), ("template", "1"), ("ip4_addr", "lo1|10.1.0.9")]);
        let changes = initial_properties("new", &d).unwrap();
        assert_eq!(changes.args(), vec!["boot=1", "ip4_addr=lo1|10.1.0.9"]);
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let d = desired(&[("", "1")]);
        let err = diff("www", &existing(&[("boot", "0")]), &d).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_restart_policy() {
        assert!(requires_restart(["boot", "ip4_addr"]));
        assert!(requires_restart(["host_hostname"]));
        assert!(!requires_restart(["boot", "notes"]));
        assert!(!requires_restart(Vec::<&str>::new()));
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut changes = Changeset::new();
        changes.insert("boot", PropertyValue::Bool(true));
        changes.insert("notes", PropertyValue::Text("x".to_string()));
        changes.insert("boot", PropertyValue::Bool(false));
        assert_eq!(changes.args(), vec!["boot=0", "notes=x"]);
        assert_eq!(changes.keys().len(), 2);
    }
}
