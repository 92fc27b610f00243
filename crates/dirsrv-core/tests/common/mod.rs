//! Shared fixture for the integration tests.
//!
//! The namespace below `dc=example,dc=com`:
//!
//! ```text
//! ou=system
//!   ou=configuration
//!     ou=interceptors
//!     ou=partitions
//!     ou=services
//!   ou=users
//!   ou=groups
//!   uid=admin
//! ```

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use dirsrv_core::admin::RoleFamily;
use dirsrv_core::backend::{MemoryPartition, Partition, SearchScope};
use dirsrv_core::schema::SchemaRegistry;
use dirsrv_core::{
    Attribute, DirError, DirectoryService, Dn, Entry, Modification, RequestControls, ServiceConfig,
    Session,
};

pub const SUFFIX: &str = "dc=example,dc=com";
pub const ADMIN: &str = "uid=admin,ou=system,dc=example,dc=com";

/// `rel` below the suffix.
pub fn dn(rel: &str) -> String {
    format!("{},{}", rel, SUFFIX)
}

pub fn config() -> ServiceConfig {
    ServiceConfig {
        admin_dn: ADMIN.to_string(),
        suffixes: vec![SUFFIX.to_string()],
        ..ServiceConfig::default()
    }
}

pub struct Fixture {
    pub schema: Arc<SchemaRegistry>,
    pub partition: Arc<MemoryPartition>,
    pub service: DirectoryService,
    pub admin: Session,
}

impl Fixture {
    /// The namespace with no administrative point.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// The namespace with `ou=system` carrying `roles`.
    pub fn with_system_roles(roles: &[&str]) -> Self {
        Self::build(Some(roles))
    }

    fn build(roles: Option<&[&str]>) -> Self {
        let schema = Arc::new(SchemaRegistry::bootstrap());
        let partition = Arc::new(MemoryPartition::new(Arc::clone(&schema), &[SUFFIX.to_string()]).unwrap());
        let service = DirectoryService::with_schema(
            config(),
            Arc::clone(&schema),
            Arc::clone(&partition) as Arc<dyn Partition>,
        )
        .unwrap();
        let admin = service.admin_session();
        let f = Self {
            schema,
            partition,
            service,
            admin,
        };

        f.add(
            Entry::named(SUFFIX)
                .unwrap()
                .with("objectClass", ["top", "domain"])
                .with("dc", ["example"]),
        )
        .unwrap();
        let mut system = Entry::named(&dn("ou=system"))
            .unwrap()
            .with("objectClass", ["top", "organizationalUnit"]);
        if let Some(roles) = roles {
            system = system.with("administrativeRole", roles);
        }
        f.add(system).unwrap();
        for rel in [
            "ou=configuration,ou=system",
            "ou=interceptors,ou=configuration,ou=system",
            "ou=partitions,ou=configuration,ou=system",
            "ou=services,ou=configuration,ou=system",
            "ou=users,ou=system",
            "ou=groups,ou=system",
        ] {
            f.add_ou(rel).unwrap();
        }
        f.add(
            Entry::named(ADMIN)
                .unwrap()
                .with("objectClass", ["top", "person", "organizationalPerson", "inetOrgPerson"])
                .with("cn", ["system administrator"])
                .with("sn", ["administrator"]),
        )
        .unwrap();
        f
    }

    pub fn add(&self, entry: Entry) -> Result<(), DirError> {
        self.service.add(&self.admin, entry)
    }

    pub fn add_ou(&self, rel: &str) -> Result<(), DirError> {
        self.add(
            Entry::named(&dn(rel))
                .unwrap()
                .with("objectClass", ["top", "organizationalUnit"]),
        )
    }

    pub fn add_person(&self, rel: &str) -> Result<(), DirError> {
        self.add(
            Entry::named(&dn(rel))
                .unwrap()
                .with("objectClass", ["top", "person"])
                .with("sn", ["test"]),
        )
    }

    /// Add an administrative point below the suffix.
    pub fn add_ap(&self, rel: &str, roles: &[&str]) -> Result<(), DirError> {
        self.add(
            Entry::named(&dn(rel))
                .unwrap()
                .with("objectClass", ["top", "organizationalUnit"])
                .with("administrativeRole", roles),
        )
    }

    /// Add a subentry serving every role of its parent.
    pub fn add_subentry(&self, rel: &str, spec: &str) -> Result<(), DirError> {
        self.add_subentry_with_classes(rel, spec, &["top", "subentry"])
    }

    pub fn add_subentry_with_classes(&self, rel: &str, spec: &str, classes: &[&str]) -> Result<(), DirError> {
        let cn = rel
            .split(',')
            .next()
            .and_then(|rdn| rdn.split_once('='))
            .map(|(_, v)| v.to_string())
            .unwrap_or_default();
        self.add(
            Entry::named(&dn(rel))
                .unwrap()
                .with("objectClass", classes)
                .with("cn", [cn])
                .with("subtreeSpecification", [spec]),
        )
    }

    pub fn set_spec(&self, rel: &str, spec: &str) -> Result<(), DirError> {
        self.service.modify(
            &self.admin,
            &dn(rel),
            vec![Modification::replace(Attribute::with_values(
                "subtreeSpecification",
                [spec],
            ))],
        )
    }

    /// Normalized name of `rel` below the suffix.
    pub fn norm(&self, rel: &str) -> String {
        Dn::parse(&dn(rel))
            .unwrap()
            .normalized(&self.schema)
            .unwrap()
            .norm_name()
            .to_string()
    }

    pub fn entry(&self, rel: &str) -> Entry {
        self.service
            .lookup(&self.admin, &dn(rel))
            .unwrap()
            .unwrap_or_else(|| panic!("no entry {}", rel))
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.service.lookup(&self.admin, &dn(rel)).unwrap().is_some()
    }

    /// Normalized subentry names held in the family's reference attribute.
    pub fn references(&self, rel: &str, family: RoleFamily) -> BTreeSet<String> {
        self.entry(rel)
            .get(family.subentries_attribute())
            .map(|a| {
                a.values()
                    .iter()
                    .filter_map(|v| v.norm_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if `rel` references `subentry` in every family.
    pub fn selected_by(&self, rel: &str, subentry: &str) -> bool {
        let wanted = self.norm(subentry);
        RoleFamily::ALL
            .iter()
            .all(|f| self.references(rel, *f).contains(&wanted))
    }

    /// True if `rel` references `subentry` in no family.
    pub fn untouched_by(&self, rel: &str, subentry: &str) -> bool {
        let wanted = self.norm(subentry);
        RoleFamily::ALL
            .iter()
            .all(|f| !self.references(rel, *f).contains(&wanted))
    }

    /// Every non-subentry entry with all attributes.
    pub fn candidates(&self) -> Vec<Entry> {
        self.service
            .search(
                &self.admin,
                SUFFIX,
                SearchScope::Subtree,
                "(objectClass=*)",
                &["*", "+"],
                RequestControls::none(),
            )
            .unwrap()
    }

    /// Normalized names of the administrative points whose subentries may
    /// select `entry_dn` in `family`: the nearest one at or above it, then
    /// its superiors for as long as the previous one was an inner area.
    pub fn governing_chain(&self, family: RoleFamily, entry_dn: &Dn) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = entry_dn.clone();
        while !current.is_root() {
            if let Some(ap) = self.service.administrative_point(family, current.up_name()).unwrap() {
                chain.push(ap.dn.norm_name().to_string());
                if !ap.is_inner() {
                    break;
                }
            }
            current = current.parent();
        }
        chain
    }

    /// Every registered subentry selects exactly the candidates that carry
    /// its reference, per family, and a family's sequence number is present
    /// exactly when the candidate holds references of that family.
    pub fn assert_consistent(&self) {
        let subentries = self.service.registered_subentries().unwrap();
        let evaluator = self.service.evaluator();
        for entry in self.candidates() {
            for family in RoleFamily::ALL {
                let chain = self.governing_chain(family, entry.dn());
                for sub in &subentries {
                    let expected = sub.roles.contains(&family)
                        && chain.iter().any(|ap| ap == sub.ap_dn.norm_name())
                        && evaluator.evaluate(&sub.spec, &sub.ap_dn, entry.dn(), &entry);
                    let held = entry
                        .get(family.subentries_attribute())
                        .is_some_and(|a| a.contains_norm(sub.dn.norm_name()));
                    assert_eq!(
                        expected,
                        held,
                        "{} / {} / {}: expected selection {}",
                        entry.dn(),
                        sub.dn,
                        family,
                        expected
                    );
                }
                let referenced = entry
                    .get(family.subentries_attribute())
                    .is_some_and(|a| !a.is_empty());
                assert_eq!(
                    referenced,
                    entry.get(family.seq_number_attribute()).is_some(),
                    "{} / {}: sequence number out of step with references",
                    entry.dn(),
                    family
                );
            }
        }
    }
}
