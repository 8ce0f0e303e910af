use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model::{
    ReplicationMetadata, DELETED_OBJECTS_CHANGE_TIME, IS_DELETED_ATTRIBUTE_ID, REPL_METADATA_ATTR,
};
use crate::store::{SearchScope, StoreError};

use super::{Checker, OBJECT_FETCH_CONTROLS};

impl Checker<'_> {
    /// Check a single object, returning the number of defects found.
    pub(super) fn check_object(&mut self, dn: &str) -> Result<usize> {
        if self.options.verbose {
            info!(dn = %dn, "checking object");
        }

        let object = match self
            .store
            .search(Some(dn), SearchScope::Base, &["*"], OBJECT_FETCH_CONTROLS)
        {
            Ok(mut results) if !results.is_empty() => results.remove(0),
            Ok(_) | Err(StoreError::NoSuchObject(_)) => {
                if self.options.in_transaction {
                    warn!(dn = %dn, "object disappeared during transactional check");
                    return Ok(1);
                }
                info!(dn = %dn, "object vanished before checking, ignoring");
                return Ok(0);
            }
            Err(err) => return Err(err).with_context(|| format!("failed to load {dn}")),
        };

        let mut error_count = 0;
        let mut metadata: Option<ReplicationMetadata> = None;
        // replicated attributes present on the object, for the metadata cross-check
        let mut seen: Vec<(String, String, Vec<String>)> = Vec::new();

        for (name, values) in &object.attributes {
            let attribute = name.to_ascii_lowercase();
            if attribute == "dn" || attribute == "distinguishedname" {
                continue;
            }

            if attribute == REPL_METADATA_ATTR {
                match values.first().map(|raw| ReplicationMetadata::decode(raw)) {
                    Some(Ok(decoded)) => metadata = Some(decoded),
                    Some(Err(err)) => {
                        warn!(dn = %dn, error = %err, "undecodable replication metadata");
                        error_count += 1;
                    }
                    None => {}
                }
                continue;
            }

            if attribute == "objectclass" {
                match self.schema.normalise(name, values) {
                    Ok(normalised) if normalised != *values => {
                        error_count += 1;
                        self.err_normalise_mismatch_replace(dn, name, normalised);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(dn = %dn, error = %err, "cannot normalise objectClass");
                        error_count += 1;
                    }
                }
                continue;
            }

            if values.iter().any(String::is_empty) {
                error_count += 1;
                self.err_empty_attribute(dn, name);
                continue;
            }

            let Ok(syntax) = self.schema.syntax_kind_of(name) else {
                error_count += 1;
                self.err_unknown_attribute(dn, name);
                continue;
            };

            let flags = self.schema.replication_flags_of(name);
            if !flags.not_replicated
                && !flags.constructed
                && !syntax.is_dn_reference()
                && self.schema.attribute_id_of(name).is_some()
            {
                seen.push((attribute.clone(), name.clone(), values.clone()));
            }

            if syntax.is_dn_reference() {
                for value in values {
                    error_count += self.check_dn(&object, name, value, syntax)?;
                }
                continue;
            }

            for stored in values {
                match self.schema.normalise(name, std::slice::from_ref(stored)) {
                    Ok(normalised) => {
                        let canonical = normalised.into_iter().next().unwrap_or_default();
                        if *stored != canonical {
                            error_count += 1;
                            self.err_normalise_mismatch(dn, name, stored, &canonical);
                        }
                    }
                    Err(_) => {
                        error_count += 1;
                        self.err_invalid_value(dn, name, stored);
                    }
                }
            }
        }

        if let Some(metadata) = &metadata {
            if object.rdn().eq_ignore_ascii_case("CN=Deleted Objects") {
                let recorded = metadata.originating_change_time(IS_DELETED_ATTRIBUTE_ID);
                if recorded != Some(DELETED_OBJECTS_CHANGE_TIME) {
                    error_count += 1;
                    self.err_deleted_objects_change_time(dn);
                }
            }

            let tracked = self.tracked_attribute_names(metadata);
            for (attribute, name, values) in seen {
                if !tracked.contains(&attribute) {
                    error_count += 1;
                    self.err_missing_metadata(dn, &name, values);
                }
            }
        }

        if self.is_fsmo_role(&object.dn) && object.first_ci("fSMORoleOwner").is_none() {
            error_count += 1;
            self.err_no_fsmo_role_owner(dn);
        }

        Ok(error_count)
    }

    /// Lowercased names of the attributes the metadata blob tracks; entries
    /// whose attribute id the schema does not know are skipped.
    fn tracked_attribute_names(&self, metadata: &ReplicationMetadata) -> BTreeSet<String> {
        metadata
            .entries
            .iter()
            .filter_map(|entry| self.schema.attribute_name_by_id(entry.attribute_id))
            .map(|name| name.to_ascii_lowercase())
            .collect()
    }
}
