//! Subentry and administrative point maintenance.
//!
//! Every structural operation is classified by its target: an
//! administrative point (carries `administrativeRole`), a subentry (carries
//! the `subentry` object class) or an ordinary entry. Operations on the
//! first two update the AP caches and the subentry registry; operations on
//! any entry may change which subentries select it, so the references in the
//! `*Subentries` operational attributes are repaired through secondary
//! modifications that bypass this interceptor.
//!
//! Locking: one `RwLock` guards the caches and the registry. AP and
//! subentry mutations hold the write lock across the partition call and the
//! repair; ordinary mutations and search filtering hold the read lock.
//!
//! A subentry S with administrative point A selects a candidate E in a
//! family exactly when S serves the family, A is on E's governing chain for
//! it (the nearest AP at or above E, then enclosing APs while the previous
//! one is an inner area) and S's specification evaluates to true for E.
//! Candidates are every non-subentry entry, administrative points included.
//! Each family's `*SeqNumber` on a candidate follows the nearest AP while
//! the candidate holds references in that family and is removed otherwise.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admin::opattrs;
use crate::admin::role::{claimed_families, expand_roles};
use crate::admin::{
    AdminPointCaches, AdministrativePoint, AdministrativeRole, AreaKind, RoleFamily, Subentry,
    SeqNumberAllocator, SubentryRegistry, UNINITIALIZED_SEQ_NUMBER,
};
use crate::backend::SearchScope;
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::dn::Dn;
use crate::entry::{Attribute, Entry, Modification, Value};
use crate::error::{DirError, Result, ResultCode};
use crate::filter::Filter;
use crate::interceptor::{
    Interceptor, InterceptorChain, Next, OperationContext, OperationKind, Request, Response,
    SUBENTRY,
};
use crate::schema::{oids, SchemaRegistry};
use crate::session::Session;
use crate::subtree::{SubtreeEvaluator, SubtreeSpecification, SubtreeSpecificationParser};

/// Subentries selecting an entry, per family.
type Selection = BTreeMap<RoleFamily, BTreeSet<Dn>>;

/// How the target of an operation takes part in the administrative model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryClass {
    /// Neither an AP nor a subentry.
    Ordinary,
    /// Carries `administrativeRole`.
    AdministrativePoint,
    /// Carries the `subentry` object class.
    Subentry,
}

/// Classify an entry by its attributes. A subentry is never an AP.
pub fn classify(entry: &Entry) -> EntryClass {
    if entry.has_object_class("subentry") || entry.has_object_class(oids::SUBENTRY_OC) {
        EntryClass::Subentry
    } else if entry.get(oids::ADMINISTRATIVE_ROLE).is_some() {
        EntryClass::AdministrativePoint
    } else {
        EntryClass::Ordinary
    }
}

/// Counts from the startup scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Administrative points registered.
    pub administrative_points: usize,
    /// Subentries registered.
    pub subentries: usize,
    /// Subentries left unregistered.
    pub skipped: usize,
}

/// Everything guarded by the interceptor's lock.
#[derive(Clone, Debug, Default)]
pub struct AdminState {
    /// The four AP caches.
    pub caches: AdminPointCaches,
    /// Known subentries.
    pub subentries: SubentryRegistry,
    /// Result of the last startup scan.
    pub report: StartupReport,
}

/// The subentry interceptor.
pub struct SubentryInterceptor {
    state: RwLock<AdminState>,
    schema: Arc<SchemaRegistry>,
    parser: SubtreeSpecificationParser,
    evaluator: SubtreeEvaluator,
    seq: SeqNumberAllocator,
    diagnostics: Arc<Diagnostics>,
    admin_session: Session,
}

fn role_values(entry: &Entry) -> Vec<String> {
    entry
        .get(oids::ADMINISTRATIVE_ROLE)
        .map(|a| {
            a.values()
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn entry_uuid(entry: &Entry) -> String {
    entry
        .get(oids::ENTRY_UUID)
        .and_then(Attribute::first)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn touches(modifications: &[Modification], oid: &str) -> bool {
    modifications.iter().any(|m| {
        m.attribute.oid() == Some(oid)
            || m.attribute.id().eq_ignore_ascii_case(oid)
    })
}

fn require_admin(ctx: &OperationContext, what: &str) -> Result<()> {
    if ctx.session.is_administrator() {
        Ok(())
    } else {
        Err(DirError::InsufficientPrivilege(format!(
            "only the administrator may {} {}",
            what,
            ctx.request.dn()
        )))
    }
}

fn added_entry(ctx: &mut OperationContext) -> Result<&mut Entry> {
    match &mut ctx.request {
        Request::Add { entry } => Ok(entry),
        other => Err(DirError::UnwillingToPerform(format!(
            "expected an add request, got {:?}",
            other.kind()
        ))),
    }
}

fn modifications(ctx: &OperationContext) -> Result<Vec<Modification>> {
    match &ctx.request {
        Request::Modify { modifications, .. } => Ok(modifications.clone()),
        other => Err(DirError::UnwillingToPerform(format!(
            "expected a modify request, got {:?}",
            other.kind()
        ))),
    }
}

impl SubentryInterceptor {
    /// Interceptor whose startup scan and internal searches run as
    /// `admin_session`.
    pub fn new(schema: Arc<SchemaRegistry>, diagnostics: Arc<Diagnostics>, admin_session: Session) -> Self {
        Self {
            state: RwLock::new(AdminState::default()),
            parser: SubtreeSpecificationParser::new(Arc::clone(&schema)),
            evaluator: SubtreeEvaluator::new(Arc::clone(&schema)),
            schema,
            seq: SeqNumberAllocator::default(),
            diagnostics,
            admin_session,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, AdminState>> {
        self.state
            .read()
            .map_err(|e| DirError::LockPoisoned(format!("administrative state: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, AdminState>> {
        self.state
            .write()
            .map_err(|e| DirError::LockPoisoned(format!("administrative state: {}", e)))
    }

    /// Copy of the current caches and registry.
    pub fn snapshot(&self) -> Result<AdminState> {
        Ok(self.read()?.clone())
    }

    /// The AP record for `dn` in `family`.
    pub fn administrative_point(&self, family: RoleFamily, dn: &Dn) -> Result<Option<AdministrativePoint>> {
        Ok(self.read()?.caches.family(family).get(dn).cloned())
    }

    /// Every registered subentry.
    pub fn subentries(&self) -> Result<Vec<Subentry>> {
        Ok(self.read()?.subentries.iter().cloned().collect())
    }

    /// Counts from the startup scan.
    pub fn startup_report(&self) -> Result<StartupReport> {
        Ok(self.read()?.report)
    }

    /// The evaluator used for selection decisions.
    pub fn evaluator(&self) -> &SubtreeEvaluator {
        &self.evaluator
    }

    fn parse_spec(&self, entry: &Entry) -> Result<SubtreeSpecification> {
        let text = entry
            .get(oids::SUBTREE_SPECIFICATION)
            .and_then(Attribute::first)
            .and_then(Value::as_str)
            .ok_or_else(|| DirError::SchemaViolation {
                code: ResultCode::ObjectClassViolation,
                message: format!("subentry {} has no subtreeSpecification", entry.dn()),
            })?;
        self.parser.parse(text)
    }

    /// Roles a subentry serves under `ap_dn`: the families it claims through
    /// its object classes (all of the AP's families when it claims none),
    /// restricted to those the AP actually holds.
    fn effective_roles(&self, state: &AdminState, entry: &Entry, ap_dn: &Dn) -> Result<BTreeSet<RoleFamily>> {
        let available = state.caches.families_at(ap_dn);
        let claimed = claimed_families(entry);
        let roles: BTreeSet<RoleFamily> = if claimed.is_empty() {
            available
        } else {
            claimed.intersection(&available).copied().collect()
        };
        if roles.is_empty() {
            return Err(DirError::PolicyViolation(format!(
                "{} is not an administrative point for any role of subentry {}",
                ap_dn,
                entry.dn()
            )));
        }
        Ok(roles)
    }

    /// True if `sub` selects `entry`, named `dn`, in `family`. Only
    /// subentries anchored on the entry's governing chain for that family
    /// are considered.
    fn selects(&self, state: &AdminState, sub: &Subentry, family: RoleFamily, dn: &Dn, entry: &Entry) -> bool {
        sub.has_role(family)
            && state.caches.family(family).governs(&sub.ap_dn, dn)
            && self.evaluator.evaluate(&sub.spec, &sub.ap_dn, dn, entry)
    }

    /// Subentries that select the entry `entry` when it is named `dn`.
    fn selection(&self, state: &AdminState, dn: &Dn, entry: &Entry) -> Selection {
        let mut out = Selection::new();
        for family in RoleFamily::ALL {
            for ap in state.caches.family(family).governing_chain(dn) {
                for sub in state.subentries.anchored_at(&ap.dn) {
                    if sub.has_role(family) && self.evaluator.evaluate(&sub.spec, &sub.ap_dn, dn, entry) {
                        out.entry(family).or_default().insert(sub.dn.clone());
                    }
                }
            }
        }
        out
    }

    /// The family's sequence number for a candidate at `dn`: the nearest
    /// AP's number while the candidate holds references, cleared otherwise.
    fn seq_update(&self, state: &AdminState, family: RoleFamily, dn: &Dn, referenced: bool) -> Result<Modification> {
        match state.caches.family(family).nearest_at_or_above(dn) {
            Some(ap) if referenced => opattrs::family_seq_number(&self.schema, family, ap.seq_number),
            _ => opattrs::clear_family_seq_number(&self.schema, family),
        }
    }

    /// Changes to one family's references of `candidate`: drop `remove`,
    /// add `add`, and keep the sequence number in step with what is left.
    fn family_change(
        &self,
        state: &AdminState,
        family: RoleFamily,
        candidate: &Entry,
        remove: Option<&Dn>,
        add: Option<&Dn>,
    ) -> Result<Vec<Modification>> {
        let mut held: BTreeSet<String> = candidate
            .get(family.subentries_attribute())
            .map(|a| a.values().iter().filter_map(Value::norm_str).map(str::to_string).collect())
            .unwrap_or_default();
        let mut mods = Vec::new();
        if let Some(sub) = remove {
            if held.remove(sub.norm_name()) {
                mods.push(opattrs::remove_reference(&self.schema, family, sub)?);
            }
        }
        if let Some(sub) = add {
            if held.insert(sub.norm_name().to_string()) {
                mods.push(opattrs::add_reference(&self.schema, family, sub)?);
            }
        }
        if !mods.is_empty() {
            mods.push(self.seq_update(state, family, candidate.dn(), !held.is_empty())?);
        }
        Ok(mods)
    }

    /// Modifications turning the references of `old` into those of `new`.
    fn delta(&self, state: &AdminState, dn: &Dn, old: &Selection, new: &Selection) -> Result<Vec<Modification>> {
        let empty = BTreeSet::new();
        let mut mods = Vec::new();
        for family in RoleFamily::ALL {
            let before = old.get(&family).unwrap_or(&empty);
            let after = new.get(&family).unwrap_or(&empty);
            if before == after {
                continue;
            }
            for sub in before.difference(after) {
                mods.push(opattrs::remove_reference(&self.schema, family, sub)?);
            }
            for sub in after.difference(before) {
                mods.push(opattrs::add_reference(&self.schema, family, sub)?);
            }
            mods.push(self.seq_update(state, family, dn, !after.is_empty())?);
        }
        Ok(mods)
    }

    fn repair(&self, chain: &InterceptorChain, session: &Session, dn: &Dn, mods: Vec<Modification>) -> Result<()> {
        if mods.is_empty() {
            return Ok(());
        }
        debug!(dn = %dn, changes = mods.len(), "repairing operational attributes");
        match chain.modify_internal(session, dn, mods) {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(dn = %dn, error = %e, "consistency repair failed");
                if let Err(d) = self.diagnostics.record(DiagnosticEvent::RepairFailed {
                    dn: dn.up_name().to_string(),
                    reason: e.to_string(),
                }) {
                    warn!(error = %d, "could not record diagnostic");
                }
                Err(DirError::ConsistencyRepair {
                    dn: dn.up_name().to_string(),
                    source: Box::new(e),
                })
            }
        }
    }

    /// Give the AP at `ap_dn` a fresh sequence number in `families` and
    /// persist it on the entry.
    fn bump(
        &self,
        state: &mut AdminState,
        chain: &InterceptorChain,
        session: &Session,
        ap_dn: &Dn,
        families: &BTreeSet<RoleFamily>,
    ) -> Result<i64> {
        let seq = self.seq.next();
        for family in families {
            if let Some(ap) = state.caches.family_mut(*family).get_mut(ap_dn) {
                ap.seq_number = seq;
            }
        }
        debug!(dn = %ap_dn, seq = seq, "administrative point sequence number bumped");
        self.repair(chain, session, ap_dn, vec![opattrs::ap_seq_number(&self.schema, seq)?])?;
        Ok(seq)
    }

    /// Bump the nearest enclosing AP of `dn`, per family.
    fn bump_enclosing(
        &self,
        state: &mut AdminState,
        chain: &InterceptorChain,
        session: &Session,
        dn: &Dn,
        families: &BTreeSet<RoleFamily>,
    ) -> Result<()> {
        let mut by_ap: BTreeMap<Dn, BTreeSet<RoleFamily>> = BTreeMap::new();
        for family in families {
            if let Some(ap) = state.caches.family(*family).nearest_ancestor(dn) {
                by_ap.entry(ap.dn.clone()).or_default().insert(*family);
            }
        }
        for (ap_dn, families) in by_ap {
            self.bump(state, chain, session, &ap_dn, &families)?;
        }
        Ok(())
    }

    /// Non-subentry entries below the effective base of `spec`.
    fn area_candidates(
        &self,
        chain: &InterceptorChain,
        session: &Session,
        ap_dn: &Dn,
        spec: &SubtreeSpecification,
    ) -> Result<Vec<Entry>> {
        let base = ap_dn.join(&spec.base);
        match chain.search_internal(session, &base, SearchScope::Subtree, Filter::present(oids::OBJECT_CLASS)) {
            Ok(entries) => Ok(entries
                .into_iter()
                .filter(|e| classify(e) != EntryClass::Subentry)
                .collect()),
            Err(DirError::NoSuchObject(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn original_entry(&self, ctx: &OperationContext, chain: &InterceptorChain) -> Result<Entry> {
        if let Some(entry) = &ctx.original_entry {
            return Ok(entry.clone());
        }
        let dn = ctx.request.dn();
        chain
            .partition()
            .lookup(dn)?
            .ok_or_else(|| DirError::NoSuchObject(dn.up_name().to_string()))
    }

    fn validate_roles(
        &self,
        state: &AdminState,
        chain: &InterceptorChain,
        entry: &Entry,
    ) -> Result<BTreeSet<AdministrativeRole>> {
        let dn = entry.dn();
        if dn.is_root() || chain.partition().find_suffix(dn).as_ref() == Some(dn) {
            return Err(DirError::PolicyViolation(format!(
                "{} is a naming context root and cannot be an administrative point",
                dn
            )));
        }
        let parent = dn.parent();
        let parent_is_subentry = state.subentries.contains(&parent)
            || chain
                .partition()
                .lookup(&parent)?
                .is_some_and(|p| classify(&p) == EntryClass::Subentry);
        if parent_is_subentry {
            return Err(DirError::PolicyViolation(format!(
                "administrative point {} cannot be placed under a subentry",
                dn
            )));
        }
        let values = role_values(entry);
        let roles = expand_roles(&AdministrativeRole::parse_all(values.iter().map(String::as_str))?)?;
        for role in &roles {
            if role.kind() != AreaKind::Inner {
                continue;
            }
            if let Some(family) = role.family() {
                if !state.caches.family(family).has_element_at_or_above(&parent) {
                    return Err(DirError::PolicyViolation(format!(
                        "{} at {} has no enclosing {} area",
                        role, dn, family
                    )));
                }
            }
        }
        Ok(roles)
    }

    fn register_administrative_point(
        state: &mut AdminState,
        dn: &Dn,
        uuid: &str,
        roles: &BTreeSet<AdministrativeRole>,
        seq: i64,
    ) -> BTreeSet<RoleFamily> {
        let autonomous = roles.contains(&AdministrativeRole::AutonomousArea);
        let mut families = BTreeSet::new();
        for role in roles {
            let Some(family) = role.family() else {
                continue;
            };
            let kind = if autonomous {
                AreaKind::Autonomous
            } else {
                role.kind()
            };
            state
                .caches
                .family_mut(family)
                .insert(AdministrativePoint::new(dn.clone(), uuid.to_string(), kind, family, seq));
            families.insert(family);
        }
        families
    }

    fn link_subentry(state: &mut AdminState, subentry: Subentry) {
        for family in &subentry.roles {
            if let Some(ap) = state.caches.family_mut(*family).get_mut(&subentry.ap_dn) {
                ap.subentries.insert(subentry.dn.clone());
            }
        }
        state.subentries.add(subentry);
    }

    fn unlink_subentry(state: &mut AdminState, dn: &Dn) -> Option<Subentry> {
        let subentry = state.subentries.remove(dn)?;
        for family in &subentry.roles {
            if let Some(ap) = state.caches.family_mut(*family).get_mut(&subentry.ap_dn) {
                ap.subentries.remove(dn);
            }
        }
        Some(subentry)
    }

    fn add(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        let class = classify(added_entry(ctx)?);
        match class {
            EntryClass::AdministrativePoint => self.add_administrative_point(ctx, next),
            EntryClass::Subentry => self.add_subentry(ctx, next),
            EntryClass::Ordinary => self.add_ordinary(ctx, next),
        }
    }

    fn add_administrative_point(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        require_admin(ctx, "add administrative point")?;
        let chain = next.chain();
        let session = ctx.session.clone();
        let mut state = self.write()?;

        let entry = added_entry(ctx)?;
        let roles = self.validate_roles(&state, chain, entry)?;
        let dn = entry.dn().clone();
        let uuid = entry_uuid(entry);

        // The new point governs itself, so it is registered before its own
        // references are computed and withdrawn again if the add fails.
        let families = Self::register_administrative_point(
            &mut state,
            &dn,
            &uuid,
            &roles,
            UNINITIALIZED_SEQ_NUMBER,
        );
        let prepared = self.prepare_administrative_point(&state, entry);
        let response = match prepared.and_then(|()| next.proceed(ctx)) {
            Ok(response) => response,
            Err(e) => {
                state.caches.remove_all(&dn);
                return Err(e);
            }
        };

        info!(dn = %dn, roles = ?roles, "administrative point added");
        self.bump_enclosing(&mut state, chain, &session, &dn, &families)?;
        Ok(response)
    }

    fn prepare_administrative_point(&self, state: &AdminState, entry: &mut Entry) -> Result<()> {
        entry.apply(&opattrs::ap_seq_number(&self.schema, UNINITIALIZED_SEQ_NUMBER)?)?;
        let dn = entry.dn().clone();
        let selection = self.selection(state, &dn, entry);
        let references = self.delta(state, &dn, &Selection::new(), &selection)?;
        entry.apply_all(&references)
    }

    fn add_subentry(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        require_admin(ctx, "add subentry")?;
        let chain = next.chain();
        let session = ctx.session.clone();
        let mut state = self.write()?;

        let entry = added_entry(ctx)?.clone();
        let dn = entry.dn().clone();
        let ap_dn = dn.parent();
        if !state.caches.is_administrative_point(&ap_dn) {
            return Err(DirError::PolicyViolation(format!(
                "parent of subentry {} is not an administrative point",
                dn
            )));
        }
        let roles = self.effective_roles(&state, &entry, &ap_dn)?;
        let spec = self.parse_spec(&entry)?;

        let response = next.proceed(ctx)?;

        let subentry = Subentry {
            dn: dn.clone(),
            ap_dn: ap_dn.clone(),
            uuid: entry_uuid(&entry),
            spec: spec.clone(),
            roles: roles.clone(),
        };
        Self::link_subentry(&mut state, subentry.clone());
        info!(dn = %dn, spec = %spec, roles = ?roles, "subentry added");
        self.bump(&mut state, chain, &session, &ap_dn, &roles)?;

        for candidate in self.area_candidates(chain, &session, &ap_dn, &spec)? {
            let mut mods = Vec::new();
            for family in &roles {
                if self.selects(&state, &subentry, *family, candidate.dn(), &candidate) {
                    mods.extend(self.family_change(&state, *family, &candidate, None, Some(&dn))?);
                }
            }
            self.repair(chain, &session, candidate.dn(), mods)?;
        }
        Ok(response)
    }

    fn add_ordinary(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        let state = self.read()?;
        let entry = added_entry(ctx)?;
        let dn = entry.dn().clone();
        let selection = self.selection(&state, &dn, entry);
        let references = self.delta(&state, &dn, &Selection::new(), &selection)?;
        entry.apply_all(&references)?;
        next.proceed(ctx)
    }

    fn delete(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        let chain = next.chain();
        let original = self.original_entry(ctx, chain)?;
        match classify(&original) {
            EntryClass::Ordinary => next.proceed(ctx),
            EntryClass::AdministrativePoint => {
                require_admin(ctx, "delete administrative point")?;
                let session = ctx.session.clone();
                let mut state = self.write()?;
                let response = next.proceed(ctx)?;
                let dn = original.dn().clone();
                let removed = state.caches.remove_all(&dn);
                let families: BTreeSet<RoleFamily> = removed.iter().map(|ap| ap.family).collect();
                info!(dn = %dn, families = ?families, "administrative point deleted");
                self.bump_enclosing(&mut state, chain, &session, &dn, &families)?;
                Ok(response)
            }
            EntryClass::Subentry => {
                require_admin(ctx, "delete subentry")?;
                let session = ctx.session.clone();
                let mut state = self.write()?;
                let response = next.proceed(ctx)?;
                let dn = original.dn().clone();
                let Some(subentry) = Self::unlink_subentry(&mut state, &dn) else {
                    warn!(dn = %dn, "deleted subentry was not registered");
                    return Ok(response);
                };
                info!(dn = %dn, "subentry deleted");
                self.bump(&mut state, chain, &session, &subentry.ap_dn, &subentry.roles)?;
                for candidate in self.area_candidates(chain, &session, &subentry.ap_dn, &subentry.spec)? {
                    let mut mods = Vec::new();
                    for family in &subentry.roles {
                        mods.extend(self.family_change(&state, *family, &candidate, Some(&dn), None)?);
                    }
                    self.repair(chain, &session, candidate.dn(), mods)?;
                }
                Ok(response)
            }
        }
    }

    fn modify(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        let chain = next.chain();
        let original = self.original_entry(ctx, chain)?;
        let mods = modifications(ctx)?;

        if touches(&mods, oids::ADMINISTRATIVE_ROLE) {
            require_admin(ctx, "change the administrative role of")?;
            return Err(DirError::PolicyViolation(format!(
                "administrativeRole of {} can only be set when the entry is added",
                original.dn()
            )));
        }
        let mut preview = original.clone();
        preview.apply_all(&mods)?;
        let was = classify(&original);
        if (was == EntryClass::Subentry) != (classify(&preview) == EntryClass::Subentry) {
            return Err(DirError::PolicyViolation(format!(
                "the subentry object class of {} cannot be added or removed",
                original.dn()
            )));
        }

        match was {
            EntryClass::Subentry => {
                require_admin(ctx, "modify subentry")?;
                if touches(&mods, oids::SUBTREE_SPECIFICATION) || touches(&mods, oids::OBJECT_CLASS) {
                    self.modify_subentry(ctx, next, &preview)
                } else {
                    next.proceed(ctx)
                }
            }
            EntryClass::AdministrativePoint => {
                require_admin(ctx, "modify administrative point")?;
                self.modify_ordinary(ctx, next, &original)
            }
            EntryClass::Ordinary => self.modify_ordinary(ctx, next, &original),
        }
    }

    fn modify_subentry(&self, ctx: &mut OperationContext, next: Next<'_>, updated: &Entry) -> Result<Response> {
        let chain = next.chain();
        let session = ctx.session.clone();
        let mut state = self.write()?;

        let dn = updated.dn().clone();
        let ap_dn = dn.parent();
        let new_spec = self.parse_spec(updated)?;
        let new_roles = self.effective_roles(&state, updated, &ap_dn)?;
        let old = state.subentries.get(&dn).cloned();

        let response = next.proceed(ctx)?;

        Self::unlink_subentry(&mut state, &dn);
        let subentry = Subentry {
            dn: dn.clone(),
            ap_dn: ap_dn.clone(),
            uuid: old
                .as_ref()
                .map(|s| s.uuid.clone())
                .unwrap_or_else(|| entry_uuid(updated)),
            spec: new_spec.clone(),
            roles: new_roles.clone(),
        };
        Self::link_subentry(&mut state, subentry.clone());
        let old_roles = old.as_ref().map(|s| s.roles.clone()).unwrap_or_default();
        info!(dn = %dn, spec = %new_spec, roles = ?new_roles, "subentry specification changed");
        let touched: BTreeSet<RoleFamily> = old_roles.union(&new_roles).copied().collect();
        self.bump(&mut state, chain, &session, &ap_dn, &touched)?;

        // Candidates of either version, keyed by name.
        let mut candidates: BTreeMap<Dn, Entry> = BTreeMap::new();
        if let Some(old) = &old {
            for c in self.area_candidates(chain, &session, &ap_dn, &old.spec)? {
                candidates.insert(c.dn().clone(), c);
            }
        }
        for c in self.area_candidates(chain, &session, &ap_dn, &new_spec)? {
            candidates.insert(c.dn().clone(), c);
        }

        for (cdn, candidate) in candidates {
            let mut mods = Vec::new();
            for family in RoleFamily::ALL {
                let had = old
                    .as_ref()
                    .is_some_and(|o| self.selects(&state, o, family, &cdn, &candidate));
                let has = self.selects(&state, &subentry, family, &cdn, &candidate);
                if had && !has {
                    mods.extend(self.family_change(&state, family, &candidate, Some(&dn), None)?);
                } else if has && !had {
                    mods.extend(self.family_change(&state, family, &candidate, None, Some(&dn))?);
                }
            }
            self.repair(chain, &session, &cdn, mods)?;
        }
        Ok(response)
    }

    fn modify_ordinary(&self, ctx: &mut OperationContext, next: Next<'_>, original: &Entry) -> Result<Response> {
        let chain = next.chain();
        let session = ctx.session.clone();
        let state = self.read()?;
        let response = next.proceed(ctx)?;
        let Some(altered) = ctx.altered_entry.clone() else {
            return Ok(response);
        };
        let dn = altered.dn().clone();
        let before = self.selection(&state, &dn, original);
        let after = self.selection(&state, &dn, &altered);
        if before != after {
            let mods = self.delta(&state, &dn, &before, &after)?;
            self.repair(chain, &session, &dn, mods)?;
        }
        Ok(response)
    }

    fn relocate(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        let chain = next.chain();
        let original = self.original_entry(ctx, chain)?;
        let old_dn = ctx.request.dn().clone();
        let new_dn = ctx.request.new_dn()?.ok_or_else(|| {
            DirError::UnwillingToPerform(format!("cannot relocate {}", old_dn))
        })?;
        match classify(&original) {
            EntryClass::Subentry => {
                require_admin(ctx, "move subentry")?;
                self.relocate_subentry(ctx, next, &original, &old_dn, &new_dn)
            }
            EntryClass::AdministrativePoint | EntryClass::Ordinary => {
                self.relocate_ordinary(ctx, next, &original, &old_dn, &new_dn)
            }
        }
    }

    fn relocate_subentry(
        &self,
        ctx: &mut OperationContext,
        next: Next<'_>,
        original: &Entry,
        old_dn: &Dn,
        new_dn: &Dn,
    ) -> Result<Response> {
        let chain = next.chain();
        let session = ctx.session.clone();
        let mut state = self.write()?;

        let old_ap = old_dn.parent();
        let new_ap = new_dn.parent();
        let registered = state.subentries.get(old_dn).cloned();
        let new_roles = if old_ap == new_ap {
            None
        } else {
            if !state.caches.is_administrative_point(&new_ap) {
                return Err(DirError::PolicyViolation(format!(
                    "cannot move subentry {} under {}, which is not an administrative point",
                    old_dn, new_ap
                )));
            }
            Some(self.effective_roles(&state, original, &new_ap)?)
        };

        let response = next.proceed(ctx)?;

        let Some(old) = registered else {
            warn!(dn = %old_dn, "relocated subentry was not registered");
            return Ok(response);
        };
        Self::unlink_subentry(&mut state, old_dn);
        let moved = Subentry {
            dn: new_dn.clone(),
            ap_dn: new_ap.clone(),
            uuid: old.uuid.clone(),
            spec: old.spec.clone(),
            roles: new_roles.clone().unwrap_or_else(|| old.roles.clone()),
        };
        Self::link_subentry(&mut state, moved.clone());
        info!(from = %old_dn, to = %new_dn, "subentry relocated");

        if new_roles.is_none() {
            // Same area: the selection is unchanged, only the label moves.
            self.bump(&mut state, chain, &session, &new_ap, &moved.roles)?;
            for candidate in self.area_candidates(chain, &session, &new_ap, &moved.spec)? {
                let mut mods = Vec::new();
                for family in &moved.roles {
                    mods.extend(opattrs::replace_reference(
                        &self.schema,
                        *family,
                        &candidate,
                        old_dn,
                        new_dn,
                    )?);
                }
                self.repair(chain, &session, candidate.dn(), mods)?;
            }
            return Ok(response);
        }

        self.bump(&mut state, chain, &session, &old_ap, &old.roles)?;
        self.bump(&mut state, chain, &session, &new_ap, &moved.roles)?;
        for candidate in self.area_candidates(chain, &session, &old_ap, &old.spec)? {
            let mut mods = Vec::new();
            for family in &old.roles {
                mods.extend(self.family_change(&state, *family, &candidate, Some(old_dn), None)?);
            }
            self.repair(chain, &session, candidate.dn(), mods)?;
        }
        for candidate in self.area_candidates(chain, &session, &new_ap, &moved.spec)? {
            let mut mods = Vec::new();
            for family in &moved.roles {
                if self.selects(&state, &moved, *family, candidate.dn(), &candidate) {
                    mods.extend(self.family_change(&state, *family, &candidate, None, Some(new_dn))?);
                }
            }
            self.repair(chain, &session, candidate.dn(), mods)?;
        }
        Ok(response)
    }

    fn relocate_ordinary(
        &self,
        ctx: &mut OperationContext,
        next: Next<'_>,
        original: &Entry,
        old_dn: &Dn,
        new_dn: &Dn,
    ) -> Result<Response> {
        let chain = next.chain();
        let session = ctx.session.clone();
        let state = self.read()?;

        let has_ap = RoleFamily::ALL
            .iter()
            .any(|f| state.caches.family(*f).iter().any(|ap| ap.dn.is_within(old_dn)));
        if has_ap {
            return Err(DirError::SchemaViolation {
                code: ResultCode::NotAllowedOnRdn,
                message: format!(
                    "cannot move {}: it is or contains an administrative point",
                    old_dn
                ),
            });
        }

        let response = next.proceed(ctx)?;

        let moved = chain.search_internal(
            &session,
            new_dn,
            SearchScope::Subtree,
            Filter::present(oids::OBJECT_CLASS),
        )?;
        for entry in moved {
            if classify(&entry) == EntryClass::Subentry {
                continue;
            }
            let Some(previous_dn) = entry.dn().rebase(new_dn, old_dn) else {
                continue;
            };
            let previous = if entry.dn() == new_dn { original } else { &entry };
            let before = self.selection(&state, &previous_dn, previous);
            let after = self.selection(&state, entry.dn(), &entry);
            let mut mods = self.delta(&state, entry.dn(), &before, &after)?;
            // Same references under a different nearest AP still need that
            // AP's sequence number.
            for (family, subs) in &after {
                let cache = state.caches.family(*family);
                let reseated = cache.nearest_at_or_above(&previous_dn).map(|ap| &ap.dn)
                    != cache.nearest_at_or_above(entry.dn()).map(|ap| &ap.dn);
                if before.get(family) == Some(subs) && reseated {
                    mods.push(self.seq_update(&state, *family, entry.dn(), true)?);
                }
            }
            self.repair(chain, &session, entry.dn(), mods)?;
        }
        Ok(response)
    }

    fn search(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        if let Request::Search {
            scope: SearchScope::Object,
            ..
        } = ctx.request
        {
            return next.proceed(ctx);
        }
        let visible = ctx.controls.subentries_visible();
        let _state = self.read()?;
        match next.proceed(ctx)? {
            Response::Entries(entries) => Ok(Response::Entries(
                entries
                    .into_iter()
                    .filter(|e| (classify(e) == EntryClass::Subentry) == visible)
                    .collect(),
            )),
            other => Ok(other),
        }
    }

    fn load_administrative_point(&self, state: &mut AdminState, entry: &Entry) -> Result<()> {
        let values = role_values(entry);
        let roles = expand_roles(&AdministrativeRole::parse_all(values.iter().map(String::as_str))?)?;
        let seq = opattrs::read_integer(entry, oids::AP_SEQ_NUMBER).unwrap_or(UNINITIALIZED_SEQ_NUMBER);
        self.seq.observe(seq);
        Self::register_administrative_point(state, entry.dn(), &entry_uuid(entry), &roles, seq);
        Ok(())
    }

    fn load_subentry(&self, state: &mut AdminState, entry: &Entry) -> Result<()> {
        let ap_dn = entry.dn().parent();
        let roles = self.effective_roles(state, entry, &ap_dn)?;
        let spec = self.parse_spec(entry)?;
        Self::link_subentry(
            state,
            Subentry {
                dn: entry.dn().clone(),
                ap_dn,
                uuid: entry_uuid(entry),
                spec,
                roles,
            },
        );
        Ok(())
    }
}

impl Interceptor for SubentryInterceptor {
    fn name(&self) -> &'static str {
        SUBENTRY
    }

    /// Rebuild the caches and the registry from the partition.
    fn init(&self, chain: &InterceptorChain) -> Result<()> {
        let mut state = self.write()?;
        *state = AdminState::default();
        let session = &self.admin_session;
        let mut report = StartupReport::default();
        let subentry_filter = Filter::Or(vec![
            Filter::equality(oids::OBJECT_CLASS, "subentry"),
            Filter::equality(oids::OBJECT_CLASS, oids::SUBENTRY_OC),
        ]);

        for suffix in chain.partition().suffixes() {
            if !chain.partition().has_entry(&suffix)? {
                continue;
            }
            let points = chain.search_internal(
                session,
                &suffix,
                SearchScope::Subtree,
                Filter::present(oids::ADMINISTRATIVE_ROLE),
            )?;
            for entry in points.iter().filter(|e| classify(e) == EntryClass::AdministrativePoint) {
                match self.load_administrative_point(&mut state, entry) {
                    Ok(()) => report.administrative_points += 1,
                    Err(e) => warn!(dn = %entry.dn(), error = %e, "ignoring malformed administrative point"),
                }
            }

            let subentries =
                chain.search_internal(session, &suffix, SearchScope::Subtree, subentry_filter.clone())?;
            for entry in &subentries {
                match self.load_subentry(&mut state, entry) {
                    Ok(()) => report.subentries += 1,
                    Err(e) => {
                        warn!(dn = %entry.dn(), error = %e, "skipping subentry");
                        self.diagnostics.record(DiagnosticEvent::SubentrySkipped {
                            dn: entry.dn().up_name().to_string(),
                            reason: e.to_string(),
                        })?;
                        report.skipped += 1;
                    }
                }
            }
        }

        info!(
            administrative_points = report.administrative_points,
            subentries = report.subentries,
            skipped = report.skipped,
            "administrative model loaded"
        );
        state.report = report;
        Ok(())
    }

    fn process(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        match ctx.request.kind() {
            OperationKind::Add => self.add(ctx, next),
            OperationKind::Delete => self.delete(ctx, next),
            OperationKind::Modify => self.modify(ctx, next),
            OperationKind::Move | OperationKind::Rename | OperationKind::MoveAndRename => {
                self.relocate(ctx, next)
            }
            OperationKind::Search | OperationKind::List => self.search(ctx, next),
            OperationKind::Lookup => next.proceed(ctx),
        }
    }
}
