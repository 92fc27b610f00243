//! Registry of known subentries keyed by normalized DN.

use std::collections::{BTreeMap, BTreeSet};

use crate::admin::role::RoleFamily;
use crate::dn::Dn;
use crate::subtree::SubtreeSpecification;

/// A registered subentry.
#[derive(Clone, Debug)]
pub struct Subentry {
    /// Normalized name.
    pub dn: Dn,
    /// Its administrative point (the parent entry).
    pub ap_dn: Dn,
    /// The entry's `entryUUID`.
    pub uuid: String,
    /// Parsed `subtreeSpecification`.
    pub spec: SubtreeSpecification,
    /// Families the subentry serves.
    pub roles: BTreeSet<RoleFamily>,
}

impl Subentry {
    /// True if the subentry serves `family`.
    pub fn has_role(&self, family: RoleFamily) -> bool {
        self.roles.contains(&family)
    }

    /// The value stored in candidates' reference attributes.
    pub fn reference(&self) -> &str {
        self.dn.norm_name()
    }
}

/// All subentries the server knows about.
#[derive(Clone, Debug, Default)]
pub struct SubentryRegistry {
    entries: BTreeMap<String, Subentry>,
}

impl SubentryRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a subentry.
    pub fn add(&mut self, subentry: Subentry) -> Option<Subentry> {
        self.entries
            .insert(subentry.dn.norm_name().to_string(), subentry)
    }

    /// Unregister a subentry.
    pub fn remove(&mut self, dn: &Dn) -> Option<Subentry> {
        self.entries.remove(dn.norm_name())
    }

    /// Lookup by name.
    pub fn get(&self, dn: &Dn) -> Option<&Subentry> {
        self.entries.get(dn.norm_name())
    }

    /// True if `dn` is a registered subentry.
    pub fn contains(&self, dn: &Dn) -> bool {
        self.entries.contains_key(dn.norm_name())
    }

    /// Every subentry, ordered by normalized DN.
    pub fn iter(&self) -> impl Iterator<Item = &Subentry> {
        self.entries.values()
    }

    /// Subentries anchored at the administrative point `ap_dn`.
    pub fn anchored_at<'a>(&'a self, ap_dn: &'a Dn) -> impl Iterator<Item = &'a Subentry> + 'a {
        self.entries.values().filter(move |s| s.ap_dn == *ap_dn)
    }

    /// Number of subentries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn dn(s: &str) -> Dn {
        Dn::parse(s)
            .unwrap()
            .normalized(&SchemaRegistry::bootstrap())
            .unwrap()
    }

    fn subentry(name: &str, ap: &str) -> Subentry {
        Subentry {
            dn: dn(name),
            ap_dn: dn(ap),
            uuid: "u".into(),
            spec: SubtreeSpecification::default(),
            roles: [RoleFamily::CollectiveAttribute].into_iter().collect(),
        }
    }

    #[test]
    fn test_add_get_remove() {
        let mut reg = SubentryRegistry::new();
        assert!(reg.add(subentry("cn=a,ou=system", "ou=system")).is_none());
        assert!(reg.contains(&dn("CN=A,ou=System")));
        assert_eq!(reg.get(&dn("cn=a,ou=system")).unwrap().reference(), "2.5.4.3=a,2.5.4.11=system");
        assert!(reg.add(subentry("cn=a,ou=system", "ou=system")).is_some());
        assert_eq!(reg.len(), 1);
        assert!(reg.remove(&dn("cn=a,ou=system")).is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_anchored_at_filters_by_administrative_point() {
        let mut reg = SubentryRegistry::new();
        reg.add(subentry("cn=a,ou=system", "ou=system"));
        reg.add(subentry("cn=b,ou=users,ou=system", "ou=users,ou=system"));
        let system = dn("ou=system");
        let names: Vec<_> = reg.anchored_at(&system).map(|s| s.dn.clone()).collect();
        assert_eq!(names, vec![dn("cn=a,ou=system")]);
        assert_eq!(reg.anchored_at(&dn("ou=groups,ou=system")).count(), 0);
        assert!(reg.get(&dn("cn=a,ou=system")).unwrap().has_role(RoleFamily::CollectiveAttribute));
    }
}
