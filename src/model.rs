use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Attribute id of isDeleted in replication metadata.
pub const IS_DELETED_ATTRIBUTE_ID: u32 = 131120;

/// Expected originating change time of isDeleted on the Deleted Objects
/// container: 9999-12-29 23:59:59 UTC, per MS-ADTS 7.1.1.4.2.
pub const DELETED_OBJECTS_CHANGE_TIME: i64 = 2_650_466_015_990_000_000;

/// Binary prefix carried by well-known references to the Deleted Objects container.
pub const DELETED_OBJECTS_BINARY_PREFIX: &str = "B:32:18E2EA80684F11D2B9AA00C04F79F805:";

pub const DELETED_OBJECTS_GUID: &str = "18e2ea80-684f-11d2-b9aa-00c04f79f805";

/// Escaped RDN marker present in the DN of every tombstoned object.
pub const DELETED_DN_MARKER: &str = "\\0ADEL:";

/// RMD_FLAGS bit marking a link value as deactivated.
pub const RMD_FLAG_DEACTIVATED: u64 = 1;

/// Canonical (lowercased) name of the replication metadata attribute.
pub const REPL_METADATA_ATTR: &str = "replpropertymetadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntaxKind {
    String,
    Integer,
    Boolean,
    Binary,
    Dn,
    BinaryDn,
    StringDn,
    OrName,
}

impl SyntaxKind {
    pub fn is_dn_reference(self) -> bool {
        matches!(
            self,
            Self::Dn | Self::BinaryDn | Self::StringDn | Self::OrName
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReplicationFlags {
    #[serde(default)]
    pub not_replicated: bool,
    #[serde(default)]
    pub constructed: bool,
}

/// One directory object as returned by a search.
///
/// Attribute names keep the case the store returned them with; callers that
/// need case-insensitive access go through the `_ci` helpers, and the object
/// checker canonicalises names once at its boundary.
#[derive(Debug, Clone)]
pub struct DirectoryObject {
    pub dn: String,
    /// Durable object identity, populated when fetched with the extended-DN control.
    pub guid: Option<String>,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryObject {
    pub fn extended_dn(&self) -> String {
        match &self.guid {
            Some(guid) => format!("<GUID={guid}>;{}", self.dn),
            None => self.dn.clone(),
        }
    }

    pub fn values_ci(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    pub fn first_ci(&self, name: &str) -> Option<&str> {
        self.values_ci(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn has_attribute_ci(&self, name: &str) -> bool {
        self.values_ci(name).is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.first_ci("isDeleted")
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn rdn(&self) -> &str {
        self.dn.split(',').next().unwrap_or(&self.dn)
    }
}

/// A parsed DN-style attribute value: optional binary prefix, ordered
/// extended components, and the DN path of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceValue {
    pub binary_prefix: Option<String>,
    pub components: Vec<(String, String)>,
    pub dn_path: String,
}

impl ReferenceValue {
    pub fn parse(raw: &str, syntax: SyntaxKind) -> Result<Self> {
        let prefix_pattern = Regex::new(r"^([BS]):(\d+):([0-9A-Fa-f]*):")
            .context("failed to compile binary-prefix pattern")?;
        let component_pattern = Regex::new(r"^<([A-Za-z_]+)=([^>]*)>;?")
            .context("failed to compile extended-component pattern")?;

        let mut rest = raw;
        let mut binary_prefix = None;
        if matches!(syntax, SyntaxKind::BinaryDn | SyntaxKind::StringDn) {
            if let Some(found) = prefix_pattern.find(rest) {
                binary_prefix = Some(found.as_str().to_string());
                rest = &rest[found.end()..];
            }
        }

        let mut components = Vec::new();
        while let Some(captures) = component_pattern.captures(rest) {
            let matched = captures.get(0).map(|m| m.end()).unwrap_or(0);
            components.push((captures[1].to_string(), captures[2].to_string()));
            rest = &rest[matched..];
        }

        Ok(Self {
            binary_prefix,
            components,
            dn_path: rest.to_string(),
        })
    }

    pub fn component(&self, key: &str) -> Option<&str> {
        self.components
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn guid(&self) -> Option<&str> {
        self.component("GUID")
    }

    pub fn rmd_flags(&self) -> Option<u64> {
        self.component("RMD_FLAGS")
            .and_then(|value| value.parse().ok())
    }

    /// Canonical comparison form: the GUID component plus the DN path,
    /// excluding any binary prefix and replication-internal components.
    pub fn extended_dn_str(&self) -> String {
        match self.guid() {
            Some(guid) => format!("<GUID={guid}>;{}", self.dn_path),
            None => self.dn_path.clone(),
        }
    }

    /// Rebuild the raw value around a freshly resolved target, keeping the
    /// binary prefix (the payload half of a binary DN) intact.
    pub fn with_target(&self, target_extended_dn: &str) -> String {
        match &self.binary_prefix {
            Some(prefix) => format!("{prefix}{target_extended_dn}"),
            None => target_extended_dn.to_string(),
        }
    }

    pub fn is_deleted_objects_reference(&self) -> bool {
        if let Some(prefix) = &self.binary_prefix {
            if prefix.eq_ignore_ascii_case(DELETED_OBJECTS_BINARY_PREFIX) {
                return true;
            }
        }
        self.guid()
            .map(|guid| guid.eq_ignore_ascii_case(DELETED_OBJECTS_GUID))
            .unwrap_or(false)
    }

    /// Tombstoned targets carry the escaped DEL marker in their DN.
    pub fn has_deletion_marker(&self) -> bool {
        self.dn_path.contains(DELETED_DN_MARKER)
    }
}

impl fmt::Display for ReferenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.binary_prefix {
            write!(f, "{prefix}")?;
        }
        for (key, value) in &self.components {
            write!(f, "<{key}={value}>;")?;
        }
        write!(f, "{}", self.dn_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub attribute_id: u32,
    pub originating_change_time: i64,
}

/// Per-object replication bookkeeping: one entry per replicated attribute
/// ever set, in blob order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationMetadata {
    pub entries: Vec<MetadataEntry>,
}

impl ReplicationMetadata {
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed to decode replication metadata blob")
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode replication metadata blob")
    }

    pub fn originating_change_time(&self, attribute_id: u32) -> Option<i64> {
        self.entries
            .iter()
            .find(|entry| entry.attribute_id == attribute_id)
            .map(|entry| entry.originating_change_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_value_parses_guid_and_dn_path() {
        let raw = "<GUID=4a1b0fcb-a2b5-46c1-b36e-7622578b3dd4>;CN=Foo,DC=example,DC=com";
        let value = ReferenceValue::parse(raw, SyntaxKind::Dn).expect("value should parse");
        assert_eq!(value.guid(), Some("4a1b0fcb-a2b5-46c1-b36e-7622578b3dd4"));
        assert_eq!(value.dn_path, "CN=Foo,DC=example,DC=com");
        assert_eq!(value.to_string(), raw);
    }

    #[test]
    fn reference_value_without_components_is_plain_dn() {
        let value = ReferenceValue::parse("CN=Bar,DC=example,DC=com", SyntaxKind::Dn)
            .expect("value should parse");
        assert!(value.guid().is_none());
        assert_eq!(value.extended_dn_str(), "CN=Bar,DC=example,DC=com");
    }

    #[test]
    fn reference_value_keeps_binary_prefix_on_rewrite() {
        let raw = format!("{DELETED_OBJECTS_BINARY_PREFIX}CN=Deleted Objects,DC=example,DC=com");
        let value = ReferenceValue::parse(&raw, SyntaxKind::BinaryDn).expect("value should parse");
        assert!(value.is_deleted_objects_reference());
        assert_eq!(
            value.with_target("<GUID=abc>;CN=Deleted Objects,DC=example,DC=com"),
            format!(
                "{DELETED_OBJECTS_BINARY_PREFIX}<GUID=abc>;CN=Deleted Objects,DC=example,DC=com"
            )
        );
    }

    #[test]
    fn reference_value_reads_rmd_flags_component() {
        let raw = "<GUID=abc>;<RMD_FLAGS=1>;CN=Foo,DC=example,DC=com";
        let value = ReferenceValue::parse(raw, SyntaxKind::Dn).expect("value should parse");
        assert_eq!(value.rmd_flags(), Some(1));
        assert_eq!(
            value.extended_dn_str(),
            "<GUID=abc>;CN=Foo,DC=example,DC=com"
        );
    }

    #[test]
    fn deletion_marker_is_detected_in_tombstone_dns() {
        let raw = "<GUID=abc>;CN=Foo\\0ADEL:abc,CN=Deleted Objects,DC=example,DC=com";
        let value = ReferenceValue::parse(raw, SyntaxKind::Dn).expect("value should parse");
        assert!(value.has_deletion_marker());
    }

    #[test]
    fn replication_metadata_round_trips_and_looks_up_by_id() {
        let metadata = ReplicationMetadata {
            entries: vec![
                MetadataEntry {
                    attribute_id: 3,
                    originating_change_time: 42,
                },
                MetadataEntry {
                    attribute_id: IS_DELETED_ATTRIBUTE_ID,
                    originating_change_time: DELETED_OBJECTS_CHANGE_TIME,
                },
            ],
        };
        let encoded = metadata.encode().expect("metadata should encode");
        let decoded = ReplicationMetadata::decode(&encoded).expect("metadata should decode");
        assert_eq!(
            decoded.originating_change_time(IS_DELETED_ATTRIBUTE_ID),
            Some(DELETED_OBJECTS_CHANGE_TIME)
        );
        assert_eq!(decoded.originating_change_time(99), None);
    }
}
