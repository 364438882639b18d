//! Metadata options: the table mapping option names to keys, and how deep
//! each option's directory is expanded.

use std::collections::HashMap;
use std::fmt;

use crate::metadata::{Child, MetadataKey};

/// Name of the user-data option, which lives beside the `meta-data/` tree.
pub const USER_DATA: &str = "user-data";

/// Directory levels expanded when no override applies.
pub const DEFAULT_EXPANSION_DEPTH: usize = 4;

/// Where an option's value is fetched from, relative to the version prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// `/<version>/meta-data/<key>`
    MetaData,
    /// `/<version>/dynamic/<key>`
    Dynamic,
    /// `/<version>/user-data`
    UserData,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::MetaData => write!(f, "meta-data"),
            Source::Dynamic => write!(f, "dynamic"),
            Source::UserData => write!(f, "user-data"),
        }
    }
}

/// One selectable metadata option.
///
/// Top-level options are named after their key. Nested leaves are also
/// reachable under their own last path component, so `availability-zone`
/// selects `placement/availability-zone`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataOption {
    name: String,
    pub key: MetadataKey,
    pub source: Source,
    /// The key is a directory and resolves by expansion.
    pub expandable: bool,
}

impl MetadataOption {
    pub fn new(name: impl Into<String>, key: MetadataKey, source: Source, expandable: bool) -> Self {
        Self {
            name: name.into(),
            key,
            source,
            expandable,
        }
    }

    /// Option name as typed on the command line.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path below the version prefix.
    pub fn path(&self) -> String {
        match self.source {
            Source::UserData => USER_DATA.to_string(),
            source if self.expandable => format!("{}/{}/", source, self.key),
            source => format!("{}/{}", source, self.key),
        }
    }
}

/// Option table for one API version, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionTable {
    options: Vec<MetadataOption>,
}

impl OptionTable {
    /// Build from the top-level `meta-data/` listing, followed by `user-data`.
    pub fn from_listing(children: &[Child]) -> Self {
        let mut options: Vec<MetadataOption> = children
            .iter()
            .map(|child| {
                MetadataOption::new(
                    child.name.as_str(),
                    MetadataKey::new(&child.name),
                    Source::MetaData,
                    child.expandable,
                )
            })
            .collect();
        options.push(MetadataOption::new(
            USER_DATA,
            MetadataKey::new(USER_DATA),
            Source::UserData,
            false,
        ));
        Self { options }
    }

    /// Add a nested leaf under its last path component. The first option
    /// registered under a name keeps it.
    pub fn add_leaf(&mut self, key: MetadataKey, source: Source) -> bool {
        let name = key.as_str().rsplit('/').next().unwrap_or_default().to_string();
        if name.is_empty() || self.get(&name).is_some() {
            return false;
        }
        self.options
            .push(MetadataOption::new(name, key, source, false));
        true
    }

    /// Look up an option by name. A leading `--` is ignored, so both
    /// `instance-id` and `--instance-id` select the same option.
    pub fn get(&self, name: &str) -> Option<&MetadataOption> {
        let name = name.trim_start_matches("--").trim_matches('/');
        self.options.iter().find(|option| option.name() == name)
    }

    /// Look up an option by its full key path within `source`.
    pub fn get_key(&self, key: &MetadataKey, source: Source) -> Option<&MetadataOption> {
        self.options
            .iter()
            .find(|option| option.source == source && &option.key == key)
    }

    /// All options, in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &MetadataOption> {
        self.options.iter()
    }

    /// The options shown when none are requested: every top-level
    /// `meta-data/` key.
    pub fn defaults(&self) -> impl Iterator<Item = &MetadataOption> {
        self.options
            .iter()
            .filter(|option| option.source == Source::MetaData && option.name() == option.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// How many directory levels to expand below each top-level key.
///
/// A depth of `n` expands the requested key and up to `n - 1` levels of
/// nested directories. Directories past the limit surface their child names
/// as a newline-joined value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionPolicy {
    default_depth: usize,
    overrides: HashMap<String, usize>,
}

impl ExpansionPolicy {
    /// A policy with no per-key overrides.
    pub fn uniform(depth: usize) -> Self {
        Self {
            default_depth: depth,
            overrides: HashMap::new(),
        }
    }

    /// Override the depth for one top-level key.
    pub fn with_depth(mut self, key: &str, depth: usize) -> Self {
        self.overrides
            .insert(MetadataKey::new(key).as_str().to_string(), depth);
        self
    }

    /// Depth applying to `key`, looked up by its first path component.
    pub fn depth_for(&self, key: &MetadataKey) -> usize {
        let top = key.as_str().split('/').next().unwrap_or_default();
        self.overrides
            .get(top)
            .copied()
            .unwrap_or(self.default_depth)
    }
}

impl Default for ExpansionPolicy {
    fn default() -> Self {
        Self::uniform(DEFAULT_EXPANSION_DEPTH)
            .with_depth("public-keys", 2)
            .with_depth("block-device-mapping", 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> OptionTable {
        let children: Vec<Child> = ["ami-id", "block-device-mapping/", "instance-id", "public-keys/"]
            .into_iter()
            .map(Child::parse)
            .collect();
        OptionTable::from_listing(&children)
    }

    #[test]
    fn test_table_keeps_discovery_order() {
        let table = table();
        let names: Vec<&str> = table.iter().map(MetadataOption::name).collect();
        assert_eq!(
            names,
            [
                "ami-id",
                "block-device-mapping",
                "instance-id",
                "public-keys",
                "user-data"
            ]
        );
    }

    #[test]
    fn test_defaults_exclude_user_data() {
        let table = table();
        assert_eq!(table.len(), 5);
        assert!(table.defaults().all(|option| option.name() != USER_DATA));
        assert_eq!(table.defaults().count(), 4);
    }

    #[test]
    fn test_lookup_accepts_flag_form() {
        let table = table();
        assert_eq!(table.get("--instance-id").map(MetadataOption::name), Some("instance-id"));
        assert_eq!(table.get("public-keys").map(MetadataOption::name), Some("public-keys"));
        assert!(table.get("--bogus").is_none());
    }

    #[test]
    fn test_option_paths() {
        let table = table();
        assert_eq!(table.get("ami-id").unwrap().path(), "meta-data/ami-id");
        assert_eq!(
            table.get("public-keys").unwrap().path(),
            "meta-data/public-keys/"
        );
        assert_eq!(table.get("user-data").unwrap().path(), "user-data");
    }

    #[test]
    fn test_default_policy_overrides() {
        let policy = ExpansionPolicy::default();
        assert_eq!(policy.depth_for(&MetadataKey::new("public-keys")), 2);
        assert_eq!(policy.depth_for(&MetadataKey::new("public-keys/0")), 2);
        assert_eq!(policy.depth_for(&MetadataKey::new("block-device-mapping")), 1);
        assert_eq!(
            policy.depth_for(&MetadataKey::new("network")),
            DEFAULT_EXPANSION_DEPTH
        );
    }

    #[test]
    fn test_nested_leaves_become_aliases() {
        let mut table = table();
        assert!(table.add_leaf(MetadataKey::new("placement/availability-zone"), Source::MetaData));
        assert!(table.add_leaf(
            MetadataKey::new("instance-identity/document"),
            Source::Dynamic
        ));
        // an existing name is never shadowed
        assert!(!table.add_leaf(MetadataKey::new("foo/ami-id"), Source::MetaData));

        let zone = table.get("--availability-zone").unwrap();
        assert_eq!(zone.key.as_str(), "placement/availability-zone");
        assert_eq!(zone.path(), "meta-data/placement/availability-zone");

        let document = table.get("document").unwrap();
        assert_eq!(document.path(), "dynamic/instance-identity/document");
        assert_eq!(
            table.get_key(&MetadataKey::new("instance-identity/document"), Source::Dynamic),
            Some(document)
        );

        assert_eq!(table.get("ami-id").unwrap().path(), "meta-data/ami-id");
        assert_eq!(table.defaults().count(), 4);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(Source::MetaData.to_string(), "meta-data");
        assert_eq!(Source::Dynamic.to_string(), "dynamic");
        assert_eq!(Source::UserData.to_string(), "user-data");
    }
}
