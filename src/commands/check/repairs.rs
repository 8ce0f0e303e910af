use anyhow::Context;
use tracing::{info, warn};

use crate::model::{ReferenceValue, RMD_FLAG_DEACTIVATED};
use crate::store::{Control, ModOp, ModifyRequest, SearchScope, StoreError};

use super::confirm::FixCategory;
use super::Checker;

impl Checker<'_> {
    /// Apply a modify request to the store, counting it on success. Returns
    /// whether the modification went through.
    pub(super) fn apply(
        &mut self,
        request: ModifyRequest,
        controls: &[Control],
        validate: bool,
        failure_message: &str,
    ) -> bool {
        if self.options.verbose {
            for modification in &request.mods {
                info!(
                    dn = %request.dn,
                    attribute = %modification.attribute,
                    op = ?modification.op,
                    values = modification.values.len(),
                    "applying modification"
                );
            }
        }
        match self.store.modify(&request, controls, validate) {
            Ok(()) => {
                self.repairs_applied += 1;
                true
            }
            Err(err) => {
                warn!(dn = %request.dn, error = %err, "{failure_message}");
                false
            }
        }
    }

    /// An attribute carries zero values; the whole attribute is removed.
    pub(super) fn err_empty_attribute(&mut self, dn: &str, attribute: &str) {
        warn!(dn = %dn, attribute = %attribute, "empty attribute");
        if !self.confirm_all(
            &format!("Remove empty attribute {attribute} from {dn}?"),
            FixCategory::RemoveEmptyAttributes,
        ) {
            info!(attribute = %attribute, "not removing empty attribute");
            return;
        }
        let request =
            ModifyRequest::new(dn).with(attribute, ModOp::Delete, Vec::new());
        if self.apply(
            request,
            &[Control::Relax, Control::ShowRecycled],
            false,
            "failed to remove empty attribute",
        ) {
            info!(dn = %dn, attribute = %attribute, "removed empty attribute");
        }
    }

    /// An attribute the schema knows nothing about.
    pub(super) fn err_unknown_attribute(&mut self, dn: &str, attribute: &str) {
        warn!(dn = %dn, attribute = %attribute, "unknown attribute");
        if !self.confirm_all(
            &format!("Remove unknown attribute {attribute} from {dn}?"),
            FixCategory::RemoveUnknownAttributes,
        ) {
            info!(attribute = %attribute, "not removing unknown attribute");
            return;
        }
        let request =
            ModifyRequest::new(dn).with(attribute, ModOp::Delete, Vec::new());
        if self.apply(
            request,
            &[Control::Relax, Control::ShowRecycled],
            false,
            "failed to remove unknown attribute",
        ) {
            info!(dn = %dn, attribute = %attribute, "removed unknown attribute");
        }
    }

    /// A single value is not in the schema's normal form; replace it.
    pub(super) fn err_normalise_mismatch(
        &mut self,
        dn: &str,
        attribute: &str,
        stored: &str,
        normalised: &str,
    ) {
        warn!(dn = %dn, attribute = %attribute, "value not in normal form");
        if !self.confirm_all(
            &format!("Fix normalisation of {attribute} on {dn}?"),
            FixCategory::FixNormalisation,
        ) {
            info!(attribute = %attribute, "not fixing attribute normalisation");
            return;
        }
        let request = ModifyRequest::new(dn)
            .with(attribute, ModOp::Delete, vec![stored.to_string()])
            .with(attribute, ModOp::Add, vec![normalised.to_string()]);
        if self.apply(
            request,
            &[Control::Relax, Control::ShowRecycled],
            false,
            "failed to normalise attribute value",
        ) {
            info!(dn = %dn, attribute = %attribute, "normalised attribute value");
        }
    }

    /// The whole attribute needs replacing with its normal form, preserving
    /// value order (used for objectClass ordering).
    pub(super) fn err_normalise_mismatch_replace(
        &mut self,
        dn: &str,
        attribute: &str,
        normalised: Vec<String>,
    ) {
        warn!(dn = %dn, attribute = %attribute, "attribute not in normal order");
        if !self.confirm_all(
            &format!("Fix normalisation of {attribute} on {dn}?"),
            FixCategory::FixNormalisation,
        ) {
            info!(attribute = %attribute, "not fixing attribute normalisation");
            return;
        }
        let request = ModifyRequest::new(dn).with(attribute, ModOp::Replace, normalised);
        if self.apply(
            request,
            &[Control::Relax, Control::ShowRecycled],
            false,
            "failed to normalise attribute",
        ) {
            info!(dn = %dn, attribute = %attribute, "normalised attribute");
        }
    }

    /// A DN reference points at a deleted object; the link value is removed.
    pub(super) fn err_deleted_dn(
        &mut self,
        dn: &str,
        attribute: &str,
        stored: &str,
        target_dn: &str,
    ) {
        warn!(dn = %dn, attribute = %attribute, target = %target_dn, "reference to deleted object");
        if !self.confirm_all(
            &format!("Remove deleted DN link {attribute} on {dn}?"),
            FixCategory::RemoveDeletedDnLinks,
        ) {
            info!(attribute = %attribute, "not removing link to deleted object");
            return;
        }
        let request =
            ModifyRequest::new(dn).with(attribute, ModOp::Delete, vec![stored.to_string()]);
        if self.apply(
            request,
            &[Control::ShowRecycled, Control::Relax],
            false,
            "failed to remove link to deleted object",
        ) {
            info!(dn = %dn, attribute = %attribute, "removed link to deleted object");
        }
    }

    /// A DN reference carries no GUID; rewrite it in extended form if the
    /// target can still be resolved by name. Returns the defect count.
    pub(super) fn err_missing_dn_guid(
        &mut self,
        dn: &str,
        attribute: &str,
        stored: &str,
        reference: &ReferenceValue,
        link_id: i32,
    ) -> anyhow::Result<usize> {
        let resolved = match self.store.search(
            Some(&reference.dn_path),
            SearchScope::Base,
            &["objectGUID"],
            &[Control::ExtendedDn, Control::ShowRecycled],
        ) {
            Ok(results) => results,
            Err(StoreError::NoSuchObject(_)) => Vec::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to resolve {}", reference.dn_path))
            }
        };

        let Some(target) = resolved.first() else {
            // The target no longer exists. Dangling values without a deletion
            // marker are reported but never auto-removed unless the attribute
            // is a backlink (odd link id).
            if link_id % 2 == 0 && !reference.has_deletion_marker() {
                warn!(
                    dn = %dn,
                    attribute = %attribute,
                    target = %reference.dn_path,
                    "dangling reference, not removing"
                );
                return Ok(1);
            }
            self.err_deleted_dn(dn, attribute, stored, &reference.dn_path);
            return Ok(1);
        };

        let Some(guid) = target.first_ci("objectGUID").map(str::to_string) else {
            warn!(dn = %dn, attribute = %attribute, "reference target has no objectGUID");
            return Ok(1);
        };

        warn!(dn = %dn, attribute = %attribute, "reference missing GUID component");
        if !self.confirm_all(
            &format!("Add GUID to reference {attribute} on {dn}?"),
            FixCategory::FixDnGuids,
        ) {
            info!(attribute = %attribute, "not fixing GUID-less reference");
            return Ok(1);
        }

        let fixed = reference.with_target(&format!("<GUID={guid}>;{}", reference.dn_path));
        let request = ModifyRequest::new(dn)
            .with(attribute, ModOp::Delete, vec![stored.to_string()])
            .with(attribute, ModOp::Add, vec![fixed]);
        if self.apply(
            request,
            &[Control::ShowRecycled],
            true,
            "failed to add GUID to reference",
        ) {
            info!(dn = %dn, attribute = %attribute, "added GUID to reference");
        }
        Ok(1)
    }

    /// GUID resolves but the stored DN string disagrees with the target's
    /// current name; rewrite the value with the correct name.
    pub(super) fn err_dn_target_mismatch(
        &mut self,
        dn: &str,
        attribute: &str,
        stored: &str,
        reference: &ReferenceValue,
        target_guid: &str,
        target_dn: &str,
    ) {
        warn!(
            dn = %dn,
            attribute = %attribute,
            stored = %reference.dn_path,
            actual = %target_dn,
            "reference DN does not match target name"
        );
        if !self.confirm_all(
            &format!("Fix DN string in reference {attribute} on {dn}?"),
            FixCategory::FixTargetMismatch,
        ) {
            info!(attribute = %attribute, "not fixing reference DN string");
            return;
        }
        let fixed = reference.with_target(&format!("<GUID={target_guid}>;{target_dn}"));
        let request = ModifyRequest::new(dn)
            .with(attribute, ModOp::Delete, vec![stored.to_string()])
            .with(attribute, ModOp::Add, vec![fixed]);
        if self.apply(
            request,
            &[Control::ShowRecycled],
            true,
            "failed to fix DN string in reference",
        ) {
            info!(dn = %dn, attribute = %attribute, "fixed DN string in reference");
        }
    }

    /// A forward link whose target lacks the matching backlink; deleting and
    /// re-adding the source value makes the store regenerate the backlink.
    pub(super) fn err_missing_backlink(&mut self, dn: &str, attribute: &str, stored: &str) {
        warn!(dn = %dn, attribute = %attribute, "missing backlink on target");
        if !self.confirm_all(
            &format!("Fix missing backlink for {attribute} on {dn}?"),
            FixCategory::FixMissingBacklinks,
        ) {
            info!(attribute = %attribute, "not fixing missing backlink");
            return;
        }
        let request = ModifyRequest::new(dn)
            .with(attribute, ModOp::Delete, vec![stored.to_string()])
            .with(attribute, ModOp::Add, vec![stored.to_string()]);
        if self.apply(
            request,
            &[Control::ShowRecycled],
            true,
            "failed to fix missing backlink",
        ) {
            info!(dn = %dn, attribute = %attribute, "fixed missing backlink");
        }
    }

    /// A backlink value whose target carries no matching forward link; the
    /// orphaned backlink value is removed from the source.
    pub(super) fn err_orphaned_backlink(&mut self, dn: &str, attribute: &str, stored: &str) {
        warn!(dn = %dn, attribute = %attribute, "orphaned backlink");
        if !self.confirm_all(
            &format!("Remove orphaned backlink {attribute} on {dn}?"),
            FixCategory::FixOrphanedBacklinks,
        ) {
            info!(attribute = %attribute, "not removing orphaned backlink");
            return;
        }
        let request =
            ModifyRequest::new(dn).with(attribute, ModOp::Delete, vec![stored.to_string()]);
        if self.apply(
            request,
            &[Control::ShowRecycled, Control::Relax],
            true,
            "failed to remove orphaned backlink",
        ) {
            info!(dn = %dn, attribute = %attribute, "removed orphaned backlink");
        }
    }

    /// A link value that should be marked deactivated but carries the wrong
    /// RMD_FLAGS; delete and re-add against the revealed value so the store
    /// rewrites the flags.
    pub(super) fn err_incorrect_rmd_flags(
        &mut self,
        dn: &str,
        attribute: &str,
        revealed: &str,
    ) {
        warn!(
            dn = %dn,
            attribute = %attribute,
            expected_flags = RMD_FLAG_DEACTIVATED,
            "link value has incorrect RMD_FLAGS"
        );
        if !self.confirm_all(
            &format!("Fix RMD_FLAGS of {attribute} on {dn}?"),
            FixCategory::FixRmdFlags,
        ) {
            info!(attribute = %attribute, "not fixing RMD_FLAGS");
            return;
        }
        let request =
            ModifyRequest::new(dn).with(attribute, ModOp::Delete, vec![revealed.to_string()]);
        if self.apply(
            request,
            &[
                Control::ShowRecycled,
                Control::RevealInternals,
                Control::ShowDeleted,
            ],
            true,
            "failed to fix RMD_FLAGS",
        ) {
            info!(dn = %dn, attribute = %attribute, "fixed RMD_FLAGS");
        }
    }

    /// An FSMO role object without a valid fSMORoleOwner; optionally seize
    /// the role for the local server.
    pub(super) fn err_no_fsmo_role_owner(&mut self, dn: &str) {
        warn!(dn = %dn, "no valid fSMORoleOwner");
        if !self.options.seize_fsmo_role {
            info!(dn = %dn, "re-run with --seize-fsmo-role to seize the role");
            return;
        }
        if !self.confirm_all(
            &format!("Seize FSMO role on {dn}?"),
            FixCategory::SeizeFsmoRole,
        ) {
            info!(dn = %dn, "not seizing FSMO role");
            return;
        }

        let service_name = match self.store.search(
            Some("@ROOTDSE"),
            SearchScope::Base,
            &["dsServiceName"],
            &[],
        ) {
            Ok(results) => results
                .first()
                .and_then(|object| object.first_ci("dsServiceName"))
                .map(str::to_string),
            Err(err) => {
                warn!(error = %err, "failed to determine local dsServiceName");
                None
            }
        };
        let Some(service_dn) = service_name else {
            warn!(dn = %dn, "cannot seize role, local dsServiceName unknown");
            return;
        };

        // store the full extended DN of the settings object as the owner
        let owner = match self.store.search(
            Some(&service_dn),
            SearchScope::Base,
            &["objectGUID"],
            &[Control::ExtendedDn, Control::ShowRecycled],
        ) {
            Ok(results) => results.first().map(|object| object.extended_dn()),
            Err(err) => {
                warn!(error = %err, "failed to resolve local settings object");
                None
            }
        };
        let Some(owner) = owner else {
            warn!(dn = %dn, "cannot seize role, settings object unresolvable");
            return;
        };

        let request =
            ModifyRequest::new(dn).with("fSMORoleOwner", ModOp::Replace, vec![owner]);
        if self.apply(request, &[], false, "failed to seize FSMO role") {
            info!(dn = %dn, "seized FSMO role");
        }
    }

    /// A value the schema cannot bring into normal form; it is removed with
    /// no replacement.
    pub(super) fn err_invalid_value(&mut self, dn: &str, attribute: &str, stored: &str) {
        warn!(dn = %dn, attribute = %attribute, "value cannot be normalised");
        if !self.confirm_all(
            &format!("Remove unnormalisable value of {attribute} on {dn}?"),
            FixCategory::FixNormalisation,
        ) {
            info!(attribute = %attribute, "not removing unnormalisable value");
            return;
        }
        let request =
            ModifyRequest::new(dn).with(attribute, ModOp::Delete, vec![stored.to_string()]);
        if self.apply(
            request,
            &[Control::Relax, Control::ShowRecycled],
            false,
            "failed to remove unnormalisable value",
        ) {
            info!(dn = %dn, attribute = %attribute, "removed unnormalisable value");
        }
    }

    /// The Deleted Objects container's isDeleted metadata must carry the
    /// pinned originating change time; re-submitting isDeleted makes the
    /// store recompute it.
    pub(super) fn err_deleted_objects_change_time(&mut self, dn: &str) {
        warn!(dn = %dn, "wrong isDeleted change time on Deleted Objects container");
        if !self.confirm_all(
            &format!("Fix isDeleted replication metadata on {dn}?"),
            FixCategory::FixTimeMetadata,
        ) {
            info!(dn = %dn, "not fixing isDeleted replication metadata");
            return;
        }
        let request = ModifyRequest::new(dn).with(
            "isDeleted",
            ModOp::Replace,
            vec!["TRUE".to_string()],
        );
        if self.apply(
            request,
            &[Control::Relax, Control::ShowRecycled],
            false,
            "failed to fix isDeleted replication metadata",
        ) {
            info!(dn = %dn, "fixed isDeleted replication metadata");
        }
    }

    /// A replicated attribute with no metadata entry; re-submitting its
    /// current values makes the store regenerate the entry.
    pub(super) fn err_missing_metadata(&mut self, dn: &str, attribute: &str, values: Vec<String>) {
        warn!(dn = %dn, attribute = %attribute, "attribute missing from replication metadata");
        if !self.confirm_all(
            &format!("Regenerate replication metadata for {attribute} on {dn}?"),
            FixCategory::FixMetadata,
        ) {
            info!(attribute = %attribute, "not regenerating replication metadata");
            return;
        }
        let request = ModifyRequest::new(dn).with(attribute, ModOp::Replace, values);
        if self.apply(
            request,
            &[Control::Relax, Control::ShowRecycled],
            false,
            "failed to regenerate replication metadata",
        ) {
            info!(dn = %dn, attribute = %attribute, "regenerated replication metadata");
        }
    }
}
