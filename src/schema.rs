use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ReplicationFlags, SyntaxKind};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("attribute '{0}' is not defined in the schema")]
    UnknownAttribute(String),
    #[error("cannot normalise value '{value}' for attribute '{attribute}'")]
    InvalidValue { attribute: String, value: String },
}

/// Schema service consumed by the checker. Implementations map attribute
/// names to syntax kinds, link topology, and canonical value forms.
pub trait SchemaInfo {
    fn syntax_kind_of(&self, attribute: &str) -> Result<SyntaxKind, SchemaError>;

    /// Even link ids are forward links, odd ids are back links, zero means
    /// the attribute is not a link at all.
    fn link_id_of(&self, attribute: &str) -> i32;

    fn backlink_name_of(&self, attribute: &str) -> Option<String>;

    fn replication_flags_of(&self, attribute: &str) -> ReplicationFlags;

    fn attribute_id_of(&self, attribute: &str) -> Option<u32>;

    fn attribute_name_by_id(&self, attribute_id: u32) -> Option<String>;

    fn normalise(&self, attribute: &str, values: &[String]) -> Result<Vec<String>, SchemaError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormaliseRule {
    #[default]
    Identity,
    Lowercase,
    Integer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSchema {
    pub syntax: SyntaxKind,
    #[serde(default)]
    pub link_id: i32,
    #[serde(default)]
    pub backlink: Option<String>,
    #[serde(default)]
    pub not_replicated: bool,
    #[serde(default)]
    pub constructed: bool,
    #[serde(default)]
    pub attribute_id: Option<u32>,
    #[serde(default)]
    pub normalise: NormaliseRule,
}

/// Schema section of the directory snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySchema {
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Canonical ordering for objectClass value lists.
    #[serde(default)]
    pub object_class_order: Vec<String>,
}

impl MemorySchema {
    fn descriptor(&self, attribute: &str) -> Option<&AttributeSchema> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, descriptor)| descriptor)
    }

    fn canonical_class_order(&self, values: &[String]) -> Vec<String> {
        let position = |value: &String| {
            self.object_class_order
                .iter()
                .position(|class| class.eq_ignore_ascii_case(value))
                .unwrap_or(usize::MAX)
        };
        let mut ordered = values.to_vec();
        ordered.sort_by_key(position);
        ordered
    }
}

impl SchemaInfo for MemorySchema {
    fn syntax_kind_of(&self, attribute: &str) -> Result<SyntaxKind, SchemaError> {
        self.descriptor(attribute)
            .map(|descriptor| descriptor.syntax)
            .ok_or_else(|| SchemaError::UnknownAttribute(attribute.to_string()))
    }

    fn link_id_of(&self, attribute: &str) -> i32 {
        self.descriptor(attribute)
            .map(|descriptor| descriptor.link_id)
            .unwrap_or(0)
    }

    fn backlink_name_of(&self, attribute: &str) -> Option<String> {
        self.descriptor(attribute)
            .and_then(|descriptor| descriptor.backlink.clone())
    }

    fn replication_flags_of(&self, attribute: &str) -> ReplicationFlags {
        self.descriptor(attribute)
            .map(|descriptor| ReplicationFlags {
                not_replicated: descriptor.not_replicated,
                constructed: descriptor.constructed,
            })
            .unwrap_or_default()
    }

    fn attribute_id_of(&self, attribute: &str) -> Option<u32> {
        self.descriptor(attribute)
            .and_then(|descriptor| descriptor.attribute_id)
    }

    fn attribute_name_by_id(&self, attribute_id: u32) -> Option<String> {
        self.attributes
            .iter()
            .find(|(_, descriptor)| descriptor.attribute_id == Some(attribute_id))
            .map(|(name, _)| name.clone())
    }

    fn normalise(&self, attribute: &str, values: &[String]) -> Result<Vec<String>, SchemaError> {
        let descriptor = self
            .descriptor(attribute)
            .ok_or_else(|| SchemaError::UnknownAttribute(attribute.to_string()))?;

        if attribute.eq_ignore_ascii_case("objectClass") && !self.object_class_order.is_empty() {
            return Ok(self.canonical_class_order(values));
        }

        values
            .iter()
            .map(|value| match descriptor.normalise {
                NormaliseRule::Identity => Ok(value.clone()),
                NormaliseRule::Lowercase => Ok(value.to_ascii_lowercase()),
                NormaliseRule::Integer => value
                    .trim()
                    .parse::<i64>()
                    .map(|parsed| parsed.to_string())
                    .map_err(|_| SchemaError::InvalidValue {
                        attribute: attribute.to_string(),
                        value: value.clone(),
                    }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_with(attribute: &str, descriptor: AttributeSchema) -> MemorySchema {
        let mut attributes = BTreeMap::new();
        attributes.insert(attribute.to_string(), descriptor);
        MemorySchema {
            attributes,
            object_class_order: vec![
                "top".to_string(),
                "person".to_string(),
                "organizationalPerson".to_string(),
                "user".to_string(),
            ],
        }
    }

    #[test]
    fn unknown_attribute_is_an_explicit_error() {
        let schema = MemorySchema::default();
        let error = schema
            .syntax_kind_of("noSuchAttr")
            .expect_err("lookup should fail");
        assert!(matches!(error, SchemaError::UnknownAttribute(_)));
    }

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        let schema = schema_with(
            "sAMAccountName",
            AttributeSchema {
                syntax: SyntaxKind::String,
                link_id: 0,
                backlink: None,
                not_replicated: false,
                constructed: false,
                attribute_id: Some(590045),
                normalise: NormaliseRule::Identity,
            },
        );
        assert_eq!(
            schema
                .syntax_kind_of("samaccountname")
                .expect("lookup should succeed"),
            SyntaxKind::String
        );
        assert_eq!(schema.attribute_name_by_id(590045).as_deref(), Some("sAMAccountName"));
    }

    #[test]
    fn object_class_values_are_reordered_canonically() {
        let schema = schema_with(
            "objectClass",
            AttributeSchema {
                syntax: SyntaxKind::String,
                link_id: 0,
                backlink: None,
                not_replicated: false,
                constructed: false,
                attribute_id: Some(0),
                normalise: NormaliseRule::Identity,
            },
        );
        let normalised = schema
            .normalise(
                "objectClass",
                &["user".to_string(), "top".to_string(), "person".to_string()],
            )
            .expect("normalise should succeed");
        assert_eq!(normalised, vec!["top", "person", "user"]);
    }

    #[test]
    fn integer_rule_canonicalises_and_rejects_garbage() {
        let schema = schema_with(
            "userAccountControl",
            AttributeSchema {
                syntax: SyntaxKind::Integer,
                link_id: 0,
                backlink: None,
                not_replicated: false,
                constructed: false,
                attribute_id: Some(589832),
                normalise: NormaliseRule::Integer,
            },
        );
        let normalised = schema
            .normalise("userAccountControl", &[" 0512 ".to_string()])
            .expect("numeric value should normalise");
        assert_eq!(normalised, vec!["512"]);

        let error = schema
            .normalise("userAccountControl", &["not-a-number".to_string()])
            .expect_err("garbage value should fail");
        assert!(matches!(error, SchemaError::InvalidValue { .. }));
    }
}
