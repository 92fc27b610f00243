//! Administrative roles and role families.

use std::collections::BTreeSet;
use std::fmt;

use crate::entry::Entry;
use crate::error::{DirError, Result};
use crate::schema::oids;

/// The four independent administrative role families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoleFamily {
    /// Access control.
    AccessControl,
    /// Collective attributes.
    CollectiveAttribute,
    /// Subschema administration.
    Subschema,
    /// Trigger execution.
    TriggerExecution,
}

impl RoleFamily {
    /// Every family, in cache order.
    pub const ALL: [RoleFamily; 4] = [
        RoleFamily::AccessControl,
        RoleFamily::CollectiveAttribute,
        RoleFamily::Subschema,
        RoleFamily::TriggerExecution,
    ];

    /// Operational attribute on candidates listing selecting subentries.
    pub fn subentries_attribute(self) -> &'static str {
        match self {
            RoleFamily::AccessControl => oids::ACCESS_CONTROL_SUBENTRIES,
            RoleFamily::CollectiveAttribute => oids::COLLECTIVE_ATTRIBUTE_SUBENTRIES,
            RoleFamily::Subschema => oids::SUBSCHEMA_SUBENTRY,
            RoleFamily::TriggerExecution => oids::TRIGGER_EXECUTION_SUBENTRIES,
        }
    }

    /// Operational attribute on candidates holding the governing AP's
    /// sequence number.
    pub fn seq_number_attribute(self) -> &'static str {
        match self {
            RoleFamily::AccessControl => oids::ACCESS_CONTROL_SEQ_NUMBER,
            RoleFamily::CollectiveAttribute => oids::COLLECTIVE_ATTRIBUTE_SEQ_NUMBER,
            RoleFamily::Subschema => oids::SUBSCHEMA_SEQ_NUMBER,
            RoleFamily::TriggerExecution => oids::TRIGGER_EXECUTION_SEQ_NUMBER,
        }
    }

    /// Object class (name, OID) a subentry carries to claim this family.
    pub fn subentry_object_class(self) -> (&'static str, &'static str) {
        match self {
            RoleFamily::AccessControl => ("accessControlSubentry", oids::ACCESS_CONTROL_SUBENTRY_OC),
            RoleFamily::CollectiveAttribute => (
                "collectiveAttributeSubentry",
                oids::COLLECTIVE_ATTRIBUTE_SUBENTRY_OC,
            ),
            RoleFamily::Subschema => ("subschema", oids::SUBSCHEMA_OC),
            RoleFamily::TriggerExecution => {
                ("triggerExecutionSubentry", oids::TRIGGER_EXECUTION_SUBENTRY_OC)
            }
        }
    }

    /// The family's specific-area role.
    pub fn specific_role(self) -> AdministrativeRole {
        match self {
            RoleFamily::AccessControl => AdministrativeRole::AccessControlSpecificArea,
            RoleFamily::CollectiveAttribute => AdministrativeRole::CollectiveAttributeSpecificArea,
            RoleFamily::Subschema => AdministrativeRole::SubschemaAdminSpecificArea,
            RoleFamily::TriggerExecution => AdministrativeRole::TriggerExecutionSpecificArea,
        }
    }

    /// The family's inner-area role; subschema has none.
    pub fn inner_role(self) -> Option<AdministrativeRole> {
        match self {
            RoleFamily::AccessControl => Some(AdministrativeRole::AccessControlInnerArea),
            RoleFamily::CollectiveAttribute => {
                Some(AdministrativeRole::CollectiveAttributeInnerArea)
            }
            RoleFamily::Subschema => None,
            RoleFamily::TriggerExecution => Some(AdministrativeRole::TriggerExecutionInnerArea),
        }
    }
}

impl fmt::Display for RoleFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoleFamily::AccessControl => "access-control",
            RoleFamily::CollectiveAttribute => "collective-attribute",
            RoleFamily::Subschema => "subschema",
            RoleFamily::TriggerExecution => "trigger-execution",
        };
        write!(f, "{}", name)
    }
}

/// How an administrative point relates to the area it starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AreaKind {
    /// Autonomous area (implies every specific area).
    Autonomous,
    /// Specific area of one family.
    Specific,
    /// Inner area nested in a specific area of the same family.
    Inner,
}

/// A value of the `administrativeRole` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdministrativeRole {
    /// autonomousArea
    AutonomousArea,
    /// accessControlSpecificArea
    AccessControlSpecificArea,
    /// accessControlInnerArea
    AccessControlInnerArea,
    /// collectiveAttributeSpecificArea
    CollectiveAttributeSpecificArea,
    /// collectiveAttributeInnerArea
    CollectiveAttributeInnerArea,
    /// subschemaAdminSpecificArea
    SubschemaAdminSpecificArea,
    /// triggerExecutionSpecificArea
    TriggerExecutionSpecificArea,
    /// triggerExecutionInnerArea
    TriggerExecutionInnerArea,
}

const ROLES: [(AdministrativeRole, &str, &str); 8] = [
    (AdministrativeRole::AutonomousArea, "autonomousArea", "2.5.23.1"),
    (
        AdministrativeRole::AccessControlSpecificArea,
        "accessControlSpecificArea",
        "2.5.23.2",
    ),
    (AdministrativeRole::AccessControlInnerArea, "accessControlInnerArea", "2.5.23.3"),
    (
        AdministrativeRole::SubschemaAdminSpecificArea,
        "subschemaAdminSpecificArea",
        "2.5.23.4",
    ),
    (
        AdministrativeRole::CollectiveAttributeSpecificArea,
        "collectiveAttributeSpecificArea",
        "2.5.23.5",
    ),
    (
        AdministrativeRole::CollectiveAttributeInnerArea,
        "collectiveAttributeInnerArea",
        "2.5.23.6",
    ),
    (
        AdministrativeRole::TriggerExecutionSpecificArea,
        "triggerExecutionSpecificArea",
        "1.3.6.1.4.1.18060.0.4.1.6.1",
    ),
    (
        AdministrativeRole::TriggerExecutionInnerArea,
        "triggerExecutionInnerArea",
        "1.3.6.1.4.1.18060.0.4.1.6.2",
    ),
];

impl AdministrativeRole {
    /// Parse a role by name (case-insensitive) or OID.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        ROLES
            .iter()
            .find(|(_, name, oid)| name.eq_ignore_ascii_case(value) || *oid == value)
            .map(|(role, _, _)| *role)
    }

    /// Parse every value, rejecting unknown roles as a policy violation.
    pub fn parse_all<'a, I>(values: I) -> Result<BTreeSet<Self>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        values
            .into_iter()
            .map(|v| {
                Self::parse(v).ok_or_else(|| {
                    DirError::PolicyViolation(format!("invalid administrative role '{}'", v))
                })
            })
            .collect()
    }

    /// Schema name.
    pub fn name(self) -> &'static str {
        ROLES
            .iter()
            .find(|(role, _, _)| *role == self)
            .map(|(_, name, _)| *name)
            .unwrap_or("autonomousArea")
    }

    /// Family, `None` for the autonomous area.
    pub fn family(self) -> Option<RoleFamily> {
        match self {
            AdministrativeRole::AutonomousArea => None,
            AdministrativeRole::AccessControlSpecificArea
            | AdministrativeRole::AccessControlInnerArea => Some(RoleFamily::AccessControl),
            AdministrativeRole::CollectiveAttributeSpecificArea
            | AdministrativeRole::CollectiveAttributeInnerArea => {
                Some(RoleFamily::CollectiveAttribute)
            }
            AdministrativeRole::SubschemaAdminSpecificArea => Some(RoleFamily::Subschema),
            AdministrativeRole::TriggerExecutionSpecificArea
            | AdministrativeRole::TriggerExecutionInnerArea => Some(RoleFamily::TriggerExecution),
        }
    }

    /// Area kind.
    pub fn kind(self) -> AreaKind {
        match self {
            AdministrativeRole::AutonomousArea => AreaKind::Autonomous,
            AdministrativeRole::AccessControlInnerArea
            | AdministrativeRole::CollectiveAttributeInnerArea
            | AdministrativeRole::TriggerExecutionInnerArea => AreaKind::Inner,
            _ => AreaKind::Specific,
        }
    }
}

impl fmt::Display for AdministrativeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Check a role set for internal consistency and expand the autonomous area
/// into its implied specific areas.
///
/// An autonomous area may only be accompanied by the four specific-area
/// roles it implies; a family cannot be both specific and inner at once.
pub fn expand_roles(roles: &BTreeSet<AdministrativeRole>) -> Result<BTreeSet<AdministrativeRole>> {
    if roles.is_empty() {
        return Err(DirError::PolicyViolation(
            "administrative point without any role".to_string(),
        ));
    }
    let mut expanded = roles.clone();
    if roles.contains(&AdministrativeRole::AutonomousArea) {
        expanded.extend(RoleFamily::ALL.iter().map(|f| f.specific_role()));
        if expanded.len() != 1 + RoleFamily::ALL.len() {
            return Err(DirError::PolicyViolation(
                "autonomousArea cannot be combined with inner-area roles".to_string(),
            ));
        }
        return Ok(expanded);
    }
    for family in RoleFamily::ALL {
        if let Some(inner) = family.inner_role() {
            if roles.contains(&inner) && roles.contains(&family.specific_role()) {
                return Err(DirError::PolicyViolation(format!(
                    "{} and {} cannot be mixed",
                    family.specific_role(),
                    inner
                )));
            }
        }
    }
    Ok(expanded)
}

/// Families claimed by a subentry through its auxiliary object classes.
pub fn claimed_families(entry: &Entry) -> BTreeSet<RoleFamily> {
    RoleFamily::ALL
        .into_iter()
        .filter(|f| {
            let (name, oid) = f.subentry_object_class();
            entry.has_object_class(name) || entry.has_object_class(oid)
        })
        .collect()
}
