//! Metadata tree data model.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// One revision of the metadata schema, e.g. `2016-09-02`.
///
/// Versions order lexicographically, which for date stamps is chronological.
/// The `latest` alias sorts after every dated version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion(String);

impl ApiVersion {
    /// Create a version token from its string form.
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a root listing into a sorted, deduplicated version sequence.
    pub fn parse_listing(body: &str) -> Vec<ApiVersion> {
        let mut versions: Vec<ApiVersion> = body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ApiVersion::new)
            .collect();
        versions.sort();
        versions.dedup();
        versions
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApiVersion {
    fn from(version: &str) -> Self {
        Self::new(version)
    }
}

/// Slash-delimited path of a node in the metadata tree, such as
/// `public-keys/0/openssh-key`. Never carries leading or trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetadataKey(String);

impl MetadataKey {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(path.as_ref().trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of a child node below this one.
    pub fn join(&self, child: &str) -> MetadataKey {
        MetadataKey::new(format!("{}/{}", self.0, child.trim_matches('/')))
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A name found in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Child {
    pub name: String,
    /// The child is itself a directory.
    pub expandable: bool,
}

impl Child {
    /// Parse one listing line.
    ///
    /// `name/` is a directory. `index=label` (as used by `public-keys`) is an
    /// indexed directory addressed by `index`. Anything else is a leaf.
    pub fn parse(line: &str) -> Self {
        if let Some(name) = line.strip_suffix('/') {
            return Self {
                name: name.to_string(),
                expandable: true,
            };
        }
        if let Some((index, _label)) = line.split_once('=') {
            return Self {
                name: index.to_string(),
                expandable: true,
            };
        }
        Self {
            name: line.to_string(),
            expandable: false,
        }
    }

    /// Parse a whole directory listing, skipping blank lines.
    pub fn parse_listing(body: &str) -> Vec<Child> {
        body.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Child::parse)
            .collect()
    }
}

/// A fetched node, classified once so callers never re-inspect raw bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataNode {
    Leaf(String),
    Directory(Vec<Child>),
}

impl MetadataNode {
    /// Classify the body fetched from `path`. Directory paths end in `/`,
    /// following the service's own listing convention.
    pub fn parse(path: &str, body: &str) -> Self {
        if path.ends_with('/') {
            MetadataNode::Directory(Child::parse_listing(body))
        } else {
            MetadataNode::Leaf(body.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

/// Value of a resolved key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Scalar(String),
    /// Expanded directory; children keep discovery order.
    Directory(Vec<MetadataEntry>),
}

/// A resolved `(key, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub key: MetadataKey,
    pub value: MetadataValue,
}

impl MetadataEntry {
    pub fn scalar(key: MetadataKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: MetadataValue::Scalar(value.into()),
        }
    }

    /// Flatten into `(key, value)` leaves in order.
    pub fn leaves(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<(&'a str, &'a str)>) {
        match &self.value {
            MetadataValue::Scalar(value) => out.push((self.key.as_str(), value.as_str())),
            MetadataValue::Directory(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }
}

/// Ordered view over the leaves of several entries, serialized as one map.
pub struct Leaves<'a>(pub &'a [MetadataEntry]);

impl Serialize for Leaves<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let leaves: Vec<(&str, &str)> = self.0.iter().flat_map(MetadataEntry::leaves).collect();
        let mut map = serializer.serialize_map(Some(leaves.len()))?;
        for (key, value) in leaves {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_listing_sorted_and_deduplicated() {
        let versions = ApiVersion::parse_listing("2016-09-02\n1.0\n2007-01-19\n\n2016-09-02\nlatest\n");
        let names: Vec<&str> = versions.iter().map(ApiVersion::as_str).collect();
        assert_eq!(names, ["1.0", "2007-01-19", "2016-09-02", "latest"]);
    }

    #[test]
    fn test_latest_alias_sorts_last() {
        assert!(ApiVersion::from("latest") > ApiVersion::from("2024-04-11"));
        assert!(ApiVersion::from("2016-09-02") > ApiVersion::from("2007-01-19"));
    }

    #[test]
    fn test_key_strips_slashes() {
        assert_eq!(MetadataKey::new("/placement/").as_str(), "placement");
        assert_eq!(
            MetadataKey::new("public-keys").join("0/").as_str(),
            "public-keys/0"
        );
    }

    #[test]
    fn test_child_parse() {
        assert_eq!(
            Child::parse("placement/"),
            Child {
                name: "placement".to_string(),
                expandable: true
            }
        );
        assert_eq!(
            Child::parse("0=my-key"),
            Child {
                name: "0".to_string(),
                expandable: true
            }
        );
        assert_eq!(
            Child::parse("ami-id"),
            Child {
                name: "ami-id".to_string(),
                expandable: false
            }
        );
    }

    #[test]
    fn test_node_parse() {
        assert_eq!(
            MetadataNode::parse("meta-data/instance-id", "i-0abc\n"),
            MetadataNode::Leaf("i-0abc".to_string())
        );
        match MetadataNode::parse("meta-data/block-device-mapping/", "ami\n\nroot\n") {
            MetadataNode::Directory(children) => {
                let names: Vec<&str> = children.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, ["ami", "root"]);
            }
            other => panic!("expected directory, got {other:?}"),
        }
    }

    #[test]
    fn test_leaves_flatten_in_order() {
        let root = MetadataKey::new("block-device-mapping");
        let entry = MetadataEntry {
            key: root.clone(),
            value: MetadataValue::Directory(vec![
                MetadataEntry::scalar(root.join("ami"), "sda1"),
                MetadataEntry::scalar(root.join("root"), "/dev/sda1"),
            ]),
        };
        assert_eq!(
            entry.leaves(),
            [
                ("block-device-mapping/ami", "sda1"),
                ("block-device-mapping/root", "/dev/sda1"),
            ]
        );
    }

    #[test]
    fn test_leaves_serialize_as_ordered_map() {
        let entries = [
            MetadataEntry::scalar(MetadataKey::new("local-ipv4"), "10.0.0.1"),
            MetadataEntry::scalar(MetadataKey::new("ami-id"), "ami-123"),
        ];
        let json = serde_json::to_string(&Leaves(&entries)).unwrap();
        assert_eq!(json, r#"{"local-ipv4":"10.0.0.1","ami-id":"ami-123"}"#);
    }
}
