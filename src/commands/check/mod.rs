use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{CheckArgs, ScopeArg};
use crate::schema::SchemaInfo;
use crate::store::{
    Control, DirectoryStore, MemoryDirectory, ModOp, ModifyRequest, SearchScope, StoreError,
};
use crate::util::{now_utc_string, write_json_pretty};

mod confirm;
mod dn_refs;
mod object;
mod repairs;

pub use confirm::{ConfirmOptions, ConfirmationState, FixCategory, Prompter};

use confirm::ConsolePrompter;

#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    pub fix: bool,
    pub yes: bool,
    pub quiet: bool,
    pub verbose: bool,
    pub seize_fsmo_role: bool,
    /// Whether the check runs nested inside a caller-owned transaction;
    /// only affects the vanished-object race policy.
    pub in_transaction: bool,
}

impl CheckOptions {
    fn confirm_options(self) -> ConfirmOptions {
        ConfirmOptions {
            fix: self.fix,
            yes: self.yes,
            quiet: self.quiet,
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    generated_at: String,
    db_path: String,
    base_dn: Option<String>,
    scope: &'static str,
    fix_mode: bool,
    objects_checked: usize,
    defects_found: usize,
    repairs_applied: usize,
}

/// Directory consistency checker: walks objects, validates DN references,
/// replication metadata, and link symmetry, and applies confirmed repairs.
pub struct Checker<'a> {
    store: &'a mut dyn DirectoryStore,
    schema: &'a dyn SchemaInfo,
    prompter: &'a mut dyn Prompter,
    options: CheckOptions,
    confirm: ConfirmationState,
    fsmo_role_dns: Vec<String>,
    objects_checked: usize,
    repairs_applied: usize,
}

impl<'a> Checker<'a> {
    pub fn new(
        store: &'a mut dyn DirectoryStore,
        schema: &'a dyn SchemaInfo,
        prompter: &'a mut dyn Prompter,
        options: CheckOptions,
    ) -> Self {
        let domain_dn = store.domain_dn();
        let fsmo_role_dns = vec![
            domain_dn.clone(),
            format!("CN=Infrastructure,{domain_dn}"),
            format!("CN=Partitions,{}", store.config_dn()),
            store.schema_dn(),
            format!("CN=RID Manager$,CN=System,{domain_dn}"),
        ];

        Self {
            store,
            schema,
            prompter,
            options,
            confirm: ConfirmationState::default(),
            fsmo_role_dns,
            objects_checked: 0,
            repairs_applied: 0,
        }
    }

    pub fn objects_checked(&self) -> usize {
        self.objects_checked
    }

    pub fn repairs_applied(&self) -> usize {
        self.repairs_applied
    }

    /// Check every object under `base` (the whole database when `None`),
    /// returning the number of defects found.
    pub fn check_database(&mut self, base: Option<&str>, scope: SearchScope) -> Result<usize> {
        let enumerated = self
            .store
            .search(
                base,
                scope,
                &["dn"],
                &[Control::ShowDeleted, Control::ShowRecycled],
            )
            .context("failed to enumerate objects for checking")?;
        let dns = enumerated
            .into_iter()
            .map(|object| object.dn)
            .collect::<Vec<String>>();

        info!(objects = dns.len(), "checking objects");

        let mut error_count = 0;
        for dn in &dns {
            error_count += self.check_object(dn)?;
        }
        self.objects_checked = dns.len();

        if base.is_none() {
            error_count += self.check_rootdse()?;
        }

        if error_count != 0 && !self.options.fix {
            info!("re-run with --fix to repair the reported defects");
        }
        info!(
            objects = dns.len(),
            errors = error_count,
            "checked objects"
        );

        Ok(error_count)
    }

    /// Check the special @ROOTDSE object: dsServiceName must be present and
    /// in GUID-reference form.
    pub fn check_rootdse(&mut self) -> Result<usize> {
        if self.options.verbose {
            info!("checking object @ROOTDSE");
        }

        let rootdse = match self
            .store
            .search(Some("@ROOTDSE"), SearchScope::Base, &["*"], &[])
        {
            Ok(mut results) if !results.is_empty() => results.remove(0),
            Ok(_) | Err(StoreError::NoSuchObject(_)) => {
                warn!("object @ROOTDSE disappeared during check");
                return Ok(1);
            }
            Err(err) => return Err(err).context("failed to load @ROOTDSE"),
        };

        let Some(service_name) = rootdse.first_ci("dsServiceName").map(str::to_string) else {
            warn!("dsServiceName missing in @ROOTDSE");
            return Ok(1);
        };

        if service_name.starts_with("<GUID=") {
            return Ok(0);
        }

        warn!(value = %service_name, "dsServiceName not in GUID form in @ROOTDSE");
        let error_count = 1;

        if !self.confirm_once("Change dsServiceName to GUID form?") {
            return Ok(error_count);
        }

        let resolved = self
            .store
            .search(
                Some(&service_name),
                SearchScope::Base,
                &["objectGUID"],
                &[],
            )
            .context("failed to resolve dsServiceName target")?;
        let Some(guid) = resolved
            .first()
            .and_then(|object| object.first_ci("objectGUID"))
            .map(str::to_string)
        else {
            warn!(dn = %service_name, "dsServiceName target has no objectGUID");
            return Ok(error_count);
        };

        let request = ModifyRequest::new("@ROOTDSE").with(
            "dsServiceName",
            ModOp::Replace,
            vec![format!("<GUID={guid}>")],
        );
        if self.apply(
            request,
            &[],
            false,
            "failed to change dsServiceName to GUID form",
        ) {
            info!("changed dsServiceName to GUID form");
        }

        Ok(error_count)
    }

    fn is_fsmo_role(&self, dn: &str) -> bool {
        self.fsmo_role_dns
            .iter()
            .any(|role_dn| role_dn.eq_ignore_ascii_case(dn))
    }

    fn confirm_all(&mut self, prompt: &str, category: FixCategory) -> bool {
        self.confirm
            .decide(self.options.confirm_options(), self.prompter, prompt, category)
    }

    fn confirm_once(&mut self, prompt: &str) -> bool {
        self.confirm
            .decide_once(self.options.confirm_options(), self.prompter, prompt)
    }
}

pub fn run(args: CheckArgs) -> Result<()> {
    let mut store = MemoryDirectory::load(&args.db_path)?;
    let schema = store.schema().clone();
    let mut prompter = ConsolePrompter;

    let options = CheckOptions {
        fix: args.fix,
        yes: args.yes,
        quiet: args.quiet,
        verbose: args.verbose,
        seize_fsmo_role: args.seize_fsmo_role,
        in_transaction: false,
    };
    let scope = match args.scope {
        ScopeArg::Base => SearchScope::Base,
        ScopeArg::One => SearchScope::OneLevel,
        ScopeArg::Sub => SearchScope::Subtree,
    };

    let (defects_found, objects_checked, repairs_applied) = {
        let mut checker = Checker::new(&mut store, &schema, &mut prompter, options);
        let defects = checker.check_database(args.base_dn.as_deref(), scope)?;
        (
            defects,
            checker.objects_checked(),
            checker.repairs_applied(),
        )
    };

    if store.is_dirty() {
        store.save(&args.db_path)?;
        info!(path = %args.db_path.display(), "wrote repaired snapshot");
    }

    if let Some(report_path) = &args.report_path {
        let report = CheckReport {
            generated_at: now_utc_string(),
            db_path: args.db_path.display().to_string(),
            base_dn: args.base_dn.clone(),
            scope: args.scope.as_str(),
            fix_mode: args.fix,
            objects_checked,
            defects_found,
            repairs_applied,
        };
        write_json_pretty(report_path, &report)?;
        info!(path = %report_path.display(), "wrote check report");
    }

    info!(
        objects = objects_checked,
        defects = defects_found,
        repairs = repairs_applied,
        "check completed"
    );

    Ok(())
}

/// Controls used when loading an object for checking: tombstones and
/// recycled objects stay visible and DNs come back GUID-qualified.
const OBJECT_FETCH_CONTROLS: &[Control] = &[
    Control::ExtendedDn,
    Control::ShowRecycled,
    Control::ShowDeleted,
];
