use anyhow::{Context, Result};
use tracing::warn;

use crate::model::{DirectoryObject, ReferenceValue, SyntaxKind, RMD_FLAG_DEACTIVATED};
use crate::store::{Control, SearchScope, StoreError};

use super::Checker;

impl Checker<'_> {
    /// Check one value of a DN-reference attribute, returning the number of
    /// defects found (at most one per value).
    pub(super) fn check_dn(
        &mut self,
        source: &DirectoryObject,
        attribute: &str,
        raw: &str,
        syntax: SyntaxKind,
    ) -> Result<usize> {
        let reference = ReferenceValue::parse(raw, syntax)
            .with_context(|| format!("failed to parse reference value on {}", source.dn))?;
        let link_id = self.schema.link_id_of(attribute);
        let reverse = self.schema.backlink_name_of(attribute);

        let Some(guid) = reference.guid().map(str::to_string) else {
            return self.err_missing_dn_guid(&source.dn, attribute, raw, &reference, link_id);
        };

        let mut wanted: Vec<&str> = vec!["isDeleted"];
        if let Some(reverse) = reverse.as_deref() {
            wanted.push(reverse);
        }
        let resolved = match self.store.search(
            Some(&format!("<GUID={guid}>")),
            SearchScope::Base,
            &wanted,
            &[Control::ExtendedDn, Control::ShowRecycled],
        ) {
            Ok(mut results) if !results.is_empty() => results.remove(0),
            Ok(_) | Err(StoreError::NoSuchObject(_)) => {
                warn!(
                    dn = %source.dn,
                    attribute = %attribute,
                    guid = %guid,
                    "reference GUID does not resolve"
                );
                if link_id % 2 == 0 && !reference.has_deletion_marker() {
                    warn!(
                        dn = %source.dn,
                        attribute = %attribute,
                        target = %reference.dn_path,
                        "dangling reference, not removing"
                    );
                    return Ok(1);
                }
                self.err_deleted_dn(&source.dn, attribute, raw, &reference.dn_path);
                return Ok(1);
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to resolve reference GUID {guid}"))
            }
        };

        let source_deleted = source.is_deleted();
        let target_deleted = resolved.is_deleted();

        if target_deleted && !source_deleted && !reference.is_deleted_objects_reference() {
            self.err_deleted_dn(&source.dn, attribute, raw, &resolved.dn);
            return Ok(1);
        }

        let target_extended = resolved.extended_dn();
        if !reference
            .extended_dn_str()
            .eq_ignore_ascii_case(&target_extended)
        {
            self.err_dn_target_mismatch(&source.dn, attribute, raw, &reference, &guid, &resolved.dn);
            return Ok(1);
        }

        if source_deleted && !target_deleted {
            // Link values on a tombstoned source must be marked deactivated.
            // The plain fetch hides correctly deactivated values, so any
            // value visible here carries the wrong RMD_FLAGS.
            if reverse.is_some() {
                if let Some(revealed) =
                    self.find_revealed_link(&source.dn, attribute, &guid, syntax)?
                {
                    let flags = ReferenceValue::parse(&revealed, syntax)
                        .ok()
                        .and_then(|parsed| parsed.rmd_flags())
                        .unwrap_or(0);
                    if flags & RMD_FLAG_DEACTIVATED == 0 {
                        self.err_incorrect_rmd_flags(&source.dn, attribute, &revealed);
                        return Ok(1);
                    }
                }
            }
            return Ok(0);
        }

        if let Some(reverse) = reverse.as_deref() {
            let source_extended = source.extended_dn();
            let match_count = resolved
                .values_ci(reverse)
                .map(|values| {
                    values
                        .iter()
                        .filter(|value| value.eq_ignore_ascii_case(&source_extended))
                        .count()
                })
                .unwrap_or(0);
            if match_count != 1 {
                warn!(
                    dn = %source.dn,
                    attribute = %attribute,
                    reverse = %reverse,
                    matches = match_count,
                    "link and backlink disagree"
                );
                if link_id % 2 == 0 {
                    self.err_missing_backlink(&source.dn, attribute, raw);
                } else {
                    self.err_orphaned_backlink(&source.dn, attribute, raw);
                }
                return Ok(1);
            }
        }

        Ok(0)
    }

    /// Fetch the reveal-internals rendition of a link value, matched by the
    /// target GUID.
    fn find_revealed_link(
        &self,
        dn: &str,
        attribute: &str,
        guid: &str,
        syntax: SyntaxKind,
    ) -> Result<Option<String>> {
        let results = match self.store.search(
            Some(dn),
            SearchScope::Base,
            &[attribute],
            &[
                Control::ShowDeleted,
                Control::ExtendedDn,
                Control::RevealInternals,
            ],
        ) {
            Ok(results) => results,
            Err(StoreError::NoSuchObject(_)) => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to load revealed links of {dn}"))
            }
        };

        let Some(values) = results.first().and_then(|object| object.values_ci(attribute)) else {
            return Ok(None);
        };
        for value in values {
            let Ok(parsed) = ReferenceValue::parse(value, syntax) else {
                continue;
            };
            let matches = parsed
                .guid()
                .map(|own| own.eq_ignore_ascii_case(guid))
                .unwrap_or(false);
            if matches {
                return Ok(Some(value.clone()));
            }
        }
        Ok(None)
    }
}
