//! Administrative point caches.
//!
//! One `ApCache` per role family maps normalized DNs to the administrative
//! points of that family. The caches answer "which AP governs this name"
//! by walking up the DN until a registered point is found, mirroring how
//! the metadata service resolves paths one component at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::admin::role::{AreaKind, RoleFamily};
use crate::dn::Dn;

/// Sequence number carried by a freshly created administrative point.
pub const UNINITIALIZED_SEQ_NUMBER: i64 = -1;

/// One administrative point as seen by one role family.
#[derive(Clone, Debug)]
pub struct AdministrativePoint {
    /// Normalized name of the AP entry.
    pub dn: Dn,
    /// The entry's `entryUUID`.
    pub uuid: String,
    /// Autonomous, specific or inner.
    pub kind: AreaKind,
    /// The family this record belongs to.
    pub family: RoleFamily,
    /// Bumped whenever the set of subentries or nested APs changes.
    pub seq_number: i64,
    /// Subentries directly below this AP that serve this family.
    pub subentries: BTreeSet<Dn>,
}

impl AdministrativePoint {
    /// A new record with no subentries.
    pub fn new(dn: Dn, uuid: String, kind: AreaKind, family: RoleFamily, seq_number: i64) -> Self {
        Self {
            dn,
            uuid,
            kind,
            family,
            seq_number,
            subentries: BTreeSet::new(),
        }
    }

    /// True for inner areas.
    pub fn is_inner(&self) -> bool {
        self.kind == AreaKind::Inner
    }
}

/// Administrative points of a single family keyed by normalized DN.
#[derive(Clone, Debug)]
pub struct ApCache {
    family: RoleFamily,
    points: BTreeMap<String, AdministrativePoint>,
}

impl ApCache {
    /// Empty cache for `family`.
    pub fn new(family: RoleFamily) -> Self {
        Self {
            family,
            points: BTreeMap::new(),
        }
    }

    /// The family served.
    pub fn family(&self) -> RoleFamily {
        self.family
    }

    /// Exact lookup.
    pub fn get(&self, dn: &Dn) -> Option<&AdministrativePoint> {
        self.points.get(dn.norm_name())
    }

    /// Exact mutable lookup.
    pub fn get_mut(&mut self, dn: &Dn) -> Option<&mut AdministrativePoint> {
        self.points.get_mut(dn.norm_name())
    }

    /// True if `dn` is an AP of this family.
    pub fn contains(&self, dn: &Dn) -> bool {
        self.points.contains_key(dn.norm_name())
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, ap: AdministrativePoint) -> Option<AdministrativePoint> {
        self.points.insert(ap.dn.norm_name().to_string(), ap)
    }

    /// Remove a record.
    pub fn remove(&mut self, dn: &Dn) -> Option<AdministrativePoint> {
        self.points.remove(dn.norm_name())
    }

    /// Every AP at or above `dn`, nearest first.
    pub fn ancestors(&self, dn: &Dn) -> Vec<&AdministrativePoint> {
        let mut found = Vec::new();
        let mut current = dn.clone();
        loop {
            if let Some(ap) = self.points.get(current.norm_name()) {
                found.push(ap);
            }
            if current.is_root() {
                return found;
            }
            current = current.parent();
        }
    }

    /// APs whose subentries may select `dn`, nearest first: the nearest AP
    /// at or above `dn`, then further ancestors as long as the previous one
    /// is an inner area. The chain ends at the first specific or autonomous
    /// area.
    pub fn governing_chain(&self, dn: &Dn) -> Vec<&AdministrativePoint> {
        let mut chain = Vec::new();
        for ap in self.ancestors(dn) {
            let inner = ap.is_inner();
            chain.push(ap);
            if !inner {
                break;
            }
        }
        chain
    }

    /// True if subentries anchored at `ap_dn` may select `dn`.
    pub fn governs(&self, ap_dn: &Dn, dn: &Dn) -> bool {
        self.governing_chain(dn).iter().any(|ap| ap.dn == *ap_dn)
    }

    /// The nearest AP at or above `dn`.
    pub fn nearest_at_or_above(&self, dn: &Dn) -> Option<&AdministrativePoint> {
        let mut current = dn.clone();
        loop {
            if let Some(ap) = self.points.get(current.norm_name()) {
                return Some(ap);
            }
            if current.is_root() {
                return None;
            }
            current = current.parent();
        }
    }

    /// The nearest AP strictly above `dn`.
    pub fn nearest_ancestor(&self, dn: &Dn) -> Option<&AdministrativePoint> {
        if dn.is_root() {
            return None;
        }
        self.nearest_at_or_above(&dn.parent())
    }

    /// True if some AP of this family sits at or above `dn`.
    pub fn has_element_at_or_above(&self, dn: &Dn) -> bool {
        self.nearest_at_or_above(dn).is_some()
    }

    /// All records, ordered by normalized DN.
    pub fn iter(&self) -> impl Iterator<Item = &AdministrativePoint> {
        self.points.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// The four per-family caches.
#[derive(Clone, Debug)]
pub struct AdminPointCaches {
    caches: [ApCache; 4],
}

impl Default for AdminPointCaches {
    fn default() -> Self {
        Self::new()
    }
}

fn slot(family: RoleFamily) -> usize {
    match family {
        RoleFamily::AccessControl => 0,
        RoleFamily::CollectiveAttribute => 1,
        RoleFamily::Subschema => 2,
        RoleFamily::TriggerExecution => 3,
    }
}

impl AdminPointCaches {
    /// Four empty caches.
    pub fn new() -> Self {
        Self {
            caches: RoleFamily::ALL.map(ApCache::new),
        }
    }

    /// Cache for `family`.
    pub fn family(&self, family: RoleFamily) -> &ApCache {
        &self.caches[slot(family)]
    }

    /// Mutable cache for `family`.
    pub fn family_mut(&mut self, family: RoleFamily) -> &mut ApCache {
        &mut self.caches[slot(family)]
    }

    /// Families for which `dn` is an administrative point.
    pub fn families_at(&self, dn: &Dn) -> BTreeSet<RoleFamily> {
        RoleFamily::ALL
            .into_iter()
            .filter(|f| self.family(*f).contains(dn))
            .collect()
    }

    /// True if `dn` is an AP in any family.
    pub fn is_administrative_point(&self, dn: &Dn) -> bool {
        self.caches.iter().any(|c| c.contains(dn))
    }

    /// Drop `dn` from every cache regardless of the roles it held.
    pub fn remove_all(&mut self, dn: &Dn) -> Vec<AdministrativePoint> {
        self.caches.iter_mut().filter_map(|c| c.remove(dn)).collect()
    }

    /// Total number of records across families.
    pub fn len(&self) -> usize {
        self.caches.iter().map(ApCache::len).sum()
    }

    /// True when every cache is empty.
    pub fn is_empty(&self) -> bool {
        self.caches.iter().all(ApCache::is_empty)
    }
}

/// Monotonic source of administrative sequence numbers.
#[derive(Debug, Default)]
pub struct SeqNumberAllocator {
    last: AtomicI64,
}

impl SeqNumberAllocator {
    /// Allocator whose first `next()` returns `last + 1`.
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Allocate the next number.
    pub fn next(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make sure future numbers are greater than `seen`.
    pub fn observe(&self, seen: i64) {
        self.last.fetch_max(seen, Ordering::SeqCst);
    }

    /// Last number handed out.
    pub fn current(&self) -> i64 {
        self.last.load(Ordering::SeqCst)
    }
}
