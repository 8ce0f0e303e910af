use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    DirectoryObject, MetadataEntry, ReferenceValue, ReplicationMetadata, SyntaxKind,
    DELETED_OBJECTS_CHANGE_TIME, IS_DELETED_ATTRIBUTE_ID, REPL_METADATA_ATTR,
    RMD_FLAG_DEACTIVATED,
};
use crate::schema::MemorySchema;
use crate::util::write_json_pretty;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    ShowDeleted,
    ShowRecycled,
    ExtendedDn,
    Relax,
    RevealInternals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

#[derive(Debug, Clone)]
pub struct AttributeMod {
    pub attribute: String,
    pub op: ModOp,
    pub values: Vec<String>,
}

/// An explicit, ordered list of typed modification records against one object.
#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub dn: String,
    pub mods: Vec<AttributeMod>,
}

impl ModifyRequest {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            mods: Vec::new(),
        }
    }

    pub fn with(mut self, attribute: impl Into<String>, op: ModOp, values: Vec<String>) -> Self {
        self.mods.push(AttributeMod {
            attribute: attribute.into(),
            op,
            values,
        });
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no such object: {0}")]
    NoSuchObject(String),
    #[error("modify rejected for {dn}: {reason}")]
    Rejected { dn: String, reason: String },
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

/// Directory database facade consumed by the checker.
pub trait DirectoryStore {
    fn search(
        &self,
        base: Option<&str>,
        scope: SearchScope,
        attrs: &[&str],
        controls: &[Control],
    ) -> Result<Vec<DirectoryObject>, StoreError>;

    fn modify(
        &mut self,
        request: &ModifyRequest,
        controls: &[Control],
        validate: bool,
    ) -> Result<(), StoreError>;

    fn domain_dn(&self) -> String;
    fn config_dn(&self) -> String;
    fn schema_dn(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    pub dn: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl StoredObject {
    fn key_ci(&self, name: &str) -> Option<String> {
        self.attributes
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn values_ci(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    fn first_ci(&self, name: &str) -> Option<&str> {
        self.values_ci(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    fn guid(&self) -> Option<String> {
        self.first_ci("objectGUID").map(str::to_string)
    }

    fn is_deleted(&self) -> bool {
        self.first_ci("isDeleted")
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    fn extended_dn(&self) -> String {
        match self.guid() {
            Some(guid) => format!("<GUID={guid}>;{}", self.dn),
            None => self.dn.clone(),
        }
    }
}

/// On-disk snapshot of a directory tree plus its schema, the whole state the
/// in-memory store operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub domain_dn: String,
    pub config_dn: String,
    pub schema_dn: String,
    pub schema: MemorySchema,
    pub objects: Vec<StoredObject>,
}

/// In-memory directory store backed by a JSON snapshot file.
///
/// Honors the five access controls and maintains forward/back-link symmetry
/// the way the real server would, so repairs issued by the checker converge.
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    snapshot: DirectorySnapshot,
    modify_count: usize,
    dirty: bool,
}

impl MemoryDirectory {
    pub fn new(snapshot: DirectorySnapshot) -> Self {
        Self {
            snapshot,
            modify_count: 0,
            dirty: false,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let snapshot: DirectorySnapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Self::new(snapshot))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, &self.snapshot)
    }

    pub fn schema(&self) -> &MemorySchema {
        &self.snapshot.schema
    }

    pub fn modify_count(&self) -> usize {
        self.modify_count
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn index_by_dn(&self, dn: &str) -> Option<usize> {
        self.snapshot
            .objects
            .iter()
            .position(|object| object.dn.eq_ignore_ascii_case(dn))
    }

    fn index_by_guid(&self, guid: &str) -> Option<usize> {
        self.snapshot.objects.iter().position(|object| {
            object
                .guid()
                .map(|own| own.eq_ignore_ascii_case(guid))
                .unwrap_or(false)
        })
    }

    fn syntax_of(&self, attribute: &str) -> Option<SyntaxKind> {
        self.snapshot
            .schema
            .attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, descriptor)| descriptor.syntax)
    }

    fn forward_link_of(&self, attribute: &str) -> Option<(SyntaxKind, String)> {
        self.snapshot
            .schema
            .attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .filter(|(_, descriptor)| {
                descriptor.link_id != 0 && descriptor.link_id % 2 == 0
            })
            .and_then(|(_, descriptor)| {
                descriptor
                    .backlink
                    .clone()
                    .map(|backlink| (descriptor.syntax, backlink))
            })
    }

    fn matching_indices(&self, base: Option<&str>, scope: SearchScope) -> Vec<usize> {
        let Some(base) = base else {
            // whole-tree enumeration skips special objects
            return (0..self.snapshot.objects.len())
                .filter(|index| !self.snapshot.objects[*index].dn.starts_with('@'))
                .collect();
        };

        if let Ok(parsed) = ReferenceValue::parse(base, SyntaxKind::Dn) {
            if let Some(guid) = parsed.guid() {
                return self.index_by_guid(guid).into_iter().collect();
            }
        }

        if base.starts_with('@') {
            return self.index_by_dn(base).into_iter().collect();
        }

        let suffix = format!(",{}", base.to_ascii_lowercase());
        self.snapshot
            .objects
            .iter()
            .enumerate()
            .filter(|(_, object)| {
                if object.dn.starts_with('@') {
                    return false;
                }
                let dn = object.dn.to_ascii_lowercase();
                match scope {
                    SearchScope::Base => dn == base.to_ascii_lowercase(),
                    SearchScope::OneLevel => object
                        .dn
                        .split_once(',')
                        .map(|(_, parent)| parent.eq_ignore_ascii_case(base))
                        .unwrap_or(false),
                    SearchScope::Subtree => {
                        dn == base.to_ascii_lowercase() || dn.ends_with(&suffix)
                    }
                }
            })
            .map(|(index, _)| index)
            .collect()
    }

    fn render_object(
        &self,
        stored: &StoredObject,
        attrs: &[&str],
        extended: bool,
        reveal: bool,
    ) -> DirectoryObject {
        let all = attrs.is_empty() || attrs.iter().any(|attr| *attr == "*");
        let mut attributes = BTreeMap::new();

        for (name, values) in &stored.attributes {
            if !all && !attrs.iter().any(|attr| attr.eq_ignore_ascii_case(name)) {
                continue;
            }

            let syntax = self.syntax_of(name);
            let rendered = if reveal || !syntax.map(SyntaxKind::is_dn_reference).unwrap_or(false) {
                values.clone()
            } else {
                values
                    .iter()
                    .filter_map(|value| self.conceal_internals(value, syntax))
                    .collect()
            };

            if !rendered.is_empty() || values.is_empty() {
                attributes.insert(name.clone(), rendered);
            }
        }

        DirectoryObject {
            dn: stored.dn.clone(),
            guid: if extended { stored.guid() } else { None },
            attributes,
        }
    }

    /// Without reveal-internals, deactivated link values are invisible and
    /// RMD components are stripped from the rest.
    fn conceal_internals(&self, value: &str, syntax: Option<SyntaxKind>) -> Option<String> {
        let syntax = syntax.unwrap_or(SyntaxKind::Dn);
        let Ok(mut parsed) = ReferenceValue::parse(value, syntax) else {
            return Some(value.to_string());
        };
        if parsed.rmd_flags().unwrap_or(0) & RMD_FLAG_DEACTIVATED != 0 {
            return None;
        }
        parsed
            .components
            .retain(|(key, _)| !key.to_ascii_uppercase().starts_with("RMD_"));
        Some(parsed.to_string())
    }

    fn value_matches(syntax: Option<SyntaxKind>, stored: &str, requested: &str) -> bool {
        if stored == requested {
            return true;
        }
        let Some(syntax) = syntax.filter(|kind| kind.is_dn_reference()) else {
            return false;
        };
        match (
            ReferenceValue::parse(stored, syntax),
            ReferenceValue::parse(requested, syntax),
        ) {
            (Ok(left), Ok(right)) => match (left.guid(), right.guid()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => left.dn_path.eq_ignore_ascii_case(&right.dn_path),
            },
            _ => false,
        }
    }

    fn target_index_for_value(&self, value: &str, syntax: SyntaxKind) -> Option<usize> {
        let parsed = ReferenceValue::parse(value, syntax).ok()?;
        if let Some(guid) = parsed.guid() {
            if let Some(index) = self.index_by_guid(guid) {
                return Some(index);
            }
        }
        self.index_by_dn(&parsed.dn_path)
    }

    fn unlink_backlink(&mut self, target: usize, backlink: &str, source_extended_dn: &str) {
        let object = &mut self.snapshot.objects[target];
        let Some(key) = object.key_ci(backlink) else {
            return;
        };
        if let Some(values) = object.attributes.get_mut(&key) {
            values.retain(|value| !value.eq_ignore_ascii_case(source_extended_dn));
            if values.is_empty() {
                object.attributes.remove(&key);
            }
        }
    }

    fn link_backlink(&mut self, target: usize, backlink: &str, source_extended_dn: &str) {
        let object = &mut self.snapshot.objects[target];
        let key = object.key_ci(backlink).unwrap_or_else(|| backlink.to_string());
        let values = object.attributes.entry(key).or_default();
        if !values
            .iter()
            .any(|value| value.eq_ignore_ascii_case(source_extended_dn))
        {
            values.push(source_extended_dn.to_string());
        }
    }

    fn deactivated_form(value: &str, syntax: SyntaxKind) -> String {
        let Ok(mut parsed) = ReferenceValue::parse(value, syntax) else {
            return value.to_string();
        };
        if let Some(slot) = parsed
            .components
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case("RMD_FLAGS"))
        {
            slot.1 = RMD_FLAG_DEACTIVATED.to_string();
        } else {
            parsed
                .components
                .push(("RMD_FLAGS".to_string(), RMD_FLAG_DEACTIVATED.to_string()));
        }
        parsed.to_string()
    }

    /// Upsert the replication metadata entry for a changed attribute, the
    /// way the server would on any originating write. The isDeleted time of
    /// the Deleted Objects container is pinned per MS-ADTS 7.1.1.4.2.
    fn refresh_metadata(&mut self, source: usize, attribute: &str) {
        if attribute.eq_ignore_ascii_case(REPL_METADATA_ATTR) {
            return;
        }
        let Some(attribute_id) = self
            .snapshot
            .schema
            .attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .and_then(|(_, descriptor)| descriptor.attribute_id)
        else {
            return;
        };

        let pinned = self.snapshot.objects[source]
            .dn
            .split(',')
            .next()
            .map(|rdn| rdn.eq_ignore_ascii_case("CN=Deleted Objects"))
            .unwrap_or(false)
            && attribute_id == IS_DELETED_ATTRIBUTE_ID;
        let change_time = if pinned {
            DELETED_OBJECTS_CHANGE_TIME
        } else {
            chrono::Utc::now().timestamp()
        };

        let object = &mut self.snapshot.objects[source];
        let Some(key) = object.key_ci(REPL_METADATA_ATTR) else {
            return;
        };
        let Some(blob) = object
            .attributes
            .get_mut(&key)
            .and_then(|values| values.first_mut())
        else {
            return;
        };
        let Ok(mut metadata) = ReplicationMetadata::decode(blob) else {
            return;
        };

        match metadata
            .entries
            .iter_mut()
            .find(|entry| entry.attribute_id == attribute_id)
        {
            Some(entry) => entry.originating_change_time = change_time,
            None => metadata.entries.push(MetadataEntry {
                attribute_id,
                originating_change_time: change_time,
            }),
        }
        if let Ok(encoded) = metadata.encode() {
            *blob = encoded;
        }
    }

    fn apply_forward_link_effects(
        &mut self,
        source: usize,
        attribute: &str,
        removed: &[String],
        added: &[String],
        reveal: bool,
    ) {
        let Some((syntax, backlink)) = self.forward_link_of(attribute) else {
            return;
        };
        let source_extended_dn = self.snapshot.objects[source].extended_dn();
        let source_deleted = self.snapshot.objects[source].is_deleted();

        for value in removed {
            if let Some(target) = self.target_index_for_value(value, syntax) {
                self.unlink_backlink(target, &backlink, &source_extended_dn);
            }
            // a revealed delete on a deleted source re-applies the value with
            // recalculated metadata, mirroring server-side link maintenance
            if reveal && source_deleted {
                let reapplied = Self::deactivated_form(value, syntax);
                let object = &mut self.snapshot.objects[source];
                let key = object
                    .key_ci(attribute)
                    .unwrap_or_else(|| attribute.to_string());
                object.attributes.entry(key).or_default().push(reapplied);
            }
        }

        for value in added {
            let deactivated = ReferenceValue::parse(value, syntax)
                .map(|parsed| parsed.rmd_flags().unwrap_or(0) & RMD_FLAG_DEACTIVATED != 0)
                .unwrap_or(false);
            if source_deleted || deactivated {
                continue;
            }
            if let Some(target) = self.target_index_for_value(value, syntax) {
                self.link_backlink(target, &backlink, &source_extended_dn);
            }
        }
    }
}

impl DirectoryStore for MemoryDirectory {
    fn search(
        &self,
        base: Option<&str>,
        scope: SearchScope,
        attrs: &[&str],
        controls: &[Control],
    ) -> Result<Vec<DirectoryObject>, StoreError> {
        let show_deleted = controls.contains(&Control::ShowDeleted)
            || controls.contains(&Control::ShowRecycled);
        let extended = controls.contains(&Control::ExtendedDn);
        let reveal = controls.contains(&Control::RevealInternals);

        let results = self
            .matching_indices(base, scope)
            .into_iter()
            .map(|index| &self.snapshot.objects[index])
            .filter(|object| show_deleted || !object.is_deleted())
            .map(|object| self.render_object(object, attrs, extended, reveal))
            .collect::<Vec<DirectoryObject>>();

        if results.is_empty() && scope == SearchScope::Base {
            return Err(StoreError::NoSuchObject(
                base.unwrap_or("<root>").to_string(),
            ));
        }

        Ok(results)
    }

    fn modify(
        &mut self,
        request: &ModifyRequest,
        controls: &[Control],
        validate: bool,
    ) -> Result<(), StoreError> {
        let reveal = controls.contains(&Control::RevealInternals);
        let source = self
            .index_by_dn(&request.dn)
            .ok_or_else(|| StoreError::NoSuchObject(request.dn.clone()))?;

        for change in &request.mods {
            if validate && self.syntax_of(&change.attribute).is_none() {
                return Err(StoreError::Rejected {
                    dn: request.dn.clone(),
                    reason: format!("attribute '{}' is not in the schema", change.attribute),
                });
            }

            let syntax = self.syntax_of(&change.attribute);
            let mut removed = Vec::new();
            let mut added = Vec::new();

            {
                let object = &mut self.snapshot.objects[source];
                let key = object.key_ci(&change.attribute);

                match change.op {
                    ModOp::Delete if change.values.is_empty() => {
                        let key = key.ok_or_else(|| StoreError::Rejected {
                            dn: request.dn.clone(),
                            reason: format!("no such attribute: {}", change.attribute),
                        })?;
                        removed = object.attributes.remove(&key).unwrap_or_default();
                    }
                    ModOp::Delete => {
                        let key = key.ok_or_else(|| StoreError::Rejected {
                            dn: request.dn.clone(),
                            reason: format!("no such attribute: {}", change.attribute),
                        })?;
                        let values =
                            object
                                .attributes
                                .get_mut(&key)
                                .ok_or_else(|| StoreError::Rejected {
                                    dn: request.dn.clone(),
                                    reason: format!("no such attribute: {}", change.attribute),
                                })?;
                        for requested in &change.values {
                            let position = values
                                .iter()
                                .position(|stored| Self::value_matches(syntax, stored, requested));
                            match position {
                                Some(position) => removed.push(values.remove(position)),
                                None => {
                                    return Err(StoreError::Rejected {
                                        dn: request.dn.clone(),
                                        reason: format!(
                                            "no such value on {}: {requested}",
                                            change.attribute
                                        ),
                                    });
                                }
                            }
                        }
                        if values.is_empty() {
                            object.attributes.remove(&key);
                        }
                    }
                    ModOp::Add => {
                        let key = key.unwrap_or_else(|| change.attribute.clone());
                        let values = object.attributes.entry(key).or_default();
                        for value in &change.values {
                            if values.contains(value) {
                                return Err(StoreError::Rejected {
                                    dn: request.dn.clone(),
                                    reason: format!(
                                        "value already exists on {}: {value}",
                                        change.attribute
                                    ),
                                });
                            }
                            values.push(value.clone());
                            added.push(value.clone());
                        }
                    }
                    ModOp::Replace => {
                        if let Some(key) = key {
                            removed = object.attributes.remove(&key).unwrap_or_default();
                        }
                        if !change.values.is_empty() {
                            object
                                .attributes
                                .insert(change.attribute.clone(), change.values.clone());
                            added = change.values.clone();
                        }
                    }
                }
            }

            self.apply_forward_link_effects(source, &change.attribute, &removed, &added, reveal);
            self.refresh_metadata(source, &change.attribute);
        }

        self.modify_count += 1;
        self.dirty = true;
        Ok(())
    }

    fn domain_dn(&self) -> String {
        self.snapshot.domain_dn.clone()
    }

    fn config_dn(&self) -> String {
        self.snapshot.config_dn.clone()
    }

    fn schema_dn(&self) -> String {
        self.snapshot.schema_dn.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, NormaliseRule};

    fn link_attribute(link_id: i32, backlink: Option<&str>) -> AttributeSchema {
        AttributeSchema {
            syntax: SyntaxKind::Dn,
            link_id,
            backlink: backlink.map(str::to_string),
            not_replicated: false,
            constructed: false,
            attribute_id: None,
            normalise: NormaliseRule::Identity,
        }
    }

    fn plain_attribute(syntax: SyntaxKind) -> AttributeSchema {
        AttributeSchema {
            syntax,
            link_id: 0,
            backlink: None,
            not_replicated: false,
            constructed: false,
            attribute_id: None,
            normalise: NormaliseRule::Identity,
        }
    }

    fn object(dn: &str, guid: &str, pairs: &[(&str, &[&str])]) -> StoredObject {
        let mut attributes = BTreeMap::new();
        attributes.insert("objectGUID".to_string(), vec![guid.to_string()]);
        for (name, values) in pairs {
            attributes.insert(
                name.to_string(),
                values.iter().map(|value| value.to_string()).collect(),
            );
        }
        StoredObject {
            dn: dn.to_string(),
            attributes,
        }
    }

    fn store_with(objects: Vec<StoredObject>) -> MemoryDirectory {
        let mut schema = MemorySchema::default();
        schema
            .attributes
            .insert("objectGUID".to_string(), plain_attribute(SyntaxKind::String));
        schema
            .attributes
            .insert("isDeleted".to_string(), plain_attribute(SyntaxKind::Boolean));
        schema
            .attributes
            .insert("member".to_string(), link_attribute(2, Some("memberOf")));
        schema
            .attributes
            .insert("memberOf".to_string(), link_attribute(3, Some("member")));
        MemoryDirectory::new(DirectorySnapshot {
            domain_dn: "DC=example,DC=com".to_string(),
            config_dn: "CN=Configuration,DC=example,DC=com".to_string(),
            schema_dn: "CN=Schema,CN=Configuration,DC=example,DC=com".to_string(),
            schema,
            objects,
        })
    }

    #[test]
    fn deleted_objects_are_hidden_without_show_controls() {
        let store = store_with(vec![object(
            "CN=Gone,DC=example,DC=com",
            "g1",
            &[("isDeleted", &["TRUE"])],
        )]);

        let error = store
            .search(
                Some("CN=Gone,DC=example,DC=com"),
                SearchScope::Base,
                &["*"],
                &[],
            )
            .expect_err("tombstone should be invisible");
        assert!(matches!(error, StoreError::NoSuchObject(_)));

        let visible = store
            .search(
                Some("CN=Gone,DC=example,DC=com"),
                SearchScope::Base,
                &["*"],
                &[Control::ShowRecycled],
            )
            .expect("tombstone should be visible with show-recycled");
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_deleted());
    }

    #[test]
    fn guid_base_resolves_and_extended_dn_control_populates_guid() {
        let store = store_with(vec![object("CN=A,DC=example,DC=com", "abc", &[])]);
        let results = store
            .search(
                Some("<GUID=abc>"),
                SearchScope::Base,
                &["*"],
                &[Control::ExtendedDn],
            )
            .expect("guid lookup should succeed");
        assert_eq!(results[0].extended_dn(), "<GUID=abc>;CN=A,DC=example,DC=com");
    }

    #[test]
    fn reveal_internals_controls_rmd_component_visibility() {
        let store = store_with(vec![object(
            "CN=Group,DC=example,DC=com",
            "grp",
            &[(
                "member",
                &["<GUID=usr>;<RMD_FLAGS=0>;CN=User,DC=example,DC=com"],
            )],
        )]);

        let plain = store
            .search(
                Some("CN=Group,DC=example,DC=com"),
                SearchScope::Base,
                &["*"],
                &[],
            )
            .expect("search should succeed");
        assert_eq!(
            plain[0].first_ci("member"),
            Some("<GUID=usr>;CN=User,DC=example,DC=com")
        );

        let revealed = store
            .search(
                Some("CN=Group,DC=example,DC=com"),
                SearchScope::Base,
                &["*"],
                &[Control::RevealInternals],
            )
            .expect("search should succeed");
        assert_eq!(
            revealed[0].first_ci("member"),
            Some("<GUID=usr>;<RMD_FLAGS=0>;CN=User,DC=example,DC=com")
        );
    }

    #[test]
    fn adding_a_forward_link_projects_the_backlink() {
        let mut store = store_with(vec![
            object("CN=Group,DC=example,DC=com", "grp", &[]),
            object("CN=User,DC=example,DC=com", "usr", &[]),
        ]);

        let request = ModifyRequest::new("CN=Group,DC=example,DC=com").with(
            "member",
            ModOp::Add,
            vec!["<GUID=usr>;CN=User,DC=example,DC=com".to_string()],
        );
        store
            .modify(&request, &[], false)
            .expect("modify should succeed");

        let user = store
            .search(
                Some("CN=User,DC=example,DC=com"),
                SearchScope::Base,
                &["*"],
                &[],
            )
            .expect("search should succeed");
        assert_eq!(
            user[0].first_ci("memberOf"),
            Some("<GUID=grp>;CN=Group,DC=example,DC=com")
        );
    }

    #[test]
    fn deleting_a_forward_link_removes_the_backlink() {
        let mut store = store_with(vec![
            object(
                "CN=Group,DC=example,DC=com",
                "grp",
                &[("member", &["<GUID=usr>;CN=User,DC=example,DC=com"])],
            ),
            object(
                "CN=User,DC=example,DC=com",
                "usr",
                &[("memberOf", &["<GUID=grp>;CN=Group,DC=example,DC=com"])],
            ),
        ]);

        let request = ModifyRequest::new("CN=Group,DC=example,DC=com").with(
            "member",
            ModOp::Delete,
            vec!["<GUID=usr>;CN=User,DC=example,DC=com".to_string()],
        );
        store
            .modify(&request, &[], false)
            .expect("modify should succeed");

        let user = store
            .search(
                Some("CN=User,DC=example,DC=com"),
                SearchScope::Base,
                &["*"],
                &[],
            )
            .expect("search should succeed");
        assert!(!user[0].has_attribute_ci("memberOf"));
    }

    #[test]
    fn deleting_a_missing_value_is_rejected() {
        let mut store = store_with(vec![object("CN=Group,DC=example,DC=com", "grp", &[])]);
        let request = ModifyRequest::new("CN=Group,DC=example,DC=com").with(
            "member",
            ModOp::Delete,
            vec!["CN=Nobody,DC=example,DC=com".to_string()],
        );
        let error = store
            .modify(&request, &[], false)
            .expect_err("delete of absent attribute should fail");
        assert!(matches!(error, StoreError::Rejected { .. }));
    }

    #[test]
    fn special_objects_are_excluded_from_whole_tree_enumeration() {
        let store = store_with(vec![
            object("@ROOTDSE", "root", &[]),
            object("DC=example,DC=com", "dom", &[]),
        ]);
        let all = store
            .search(None, SearchScope::Subtree, &["dn"], &[])
            .expect("enumeration should succeed");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].dn, "DC=example,DC=com");
    }
}
