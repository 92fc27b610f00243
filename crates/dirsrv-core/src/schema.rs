//! Schema lookup service: attribute types, object classes, and the
//! matching-rule normalization used to canonicalize names and values.
//!
//! The registry is shared by every interceptor through an `Arc`. Definitions
//! live in concurrent maps so custom types can be registered after the
//! service is up without taking a lock on the read path.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::dn::Dn;
use crate::entry::Value;
use crate::error::{DirError, Result};

/// OIDs of the attribute types and object classes the core depends on.
pub mod oids {
    /// objectClass
    pub const OBJECT_CLASS: &str = "2.5.4.0";
    /// cn
    pub const CN: &str = "2.5.4.3";
    /// sn
    pub const SN: &str = "2.5.4.4";
    /// c
    pub const C: &str = "2.5.4.6";
    /// o
    pub const O: &str = "2.5.4.10";
    /// ou
    pub const OU: &str = "2.5.4.11";
    /// description
    pub const DESCRIPTION: &str = "2.5.4.13";
    /// telephoneNumber
    pub const TELEPHONE_NUMBER: &str = "2.5.4.20";
    /// member
    pub const MEMBER: &str = "2.5.4.31";
    /// userPassword
    pub const USER_PASSWORD: &str = "2.5.4.35";
    /// givenName
    pub const GIVEN_NAME: &str = "2.5.4.42";
    /// uid
    pub const UID: &str = "0.9.2342.19200300.100.1.1";
    /// mail
    pub const MAIL: &str = "0.9.2342.19200300.100.1.3";
    /// dc
    pub const DC: &str = "0.9.2342.19200300.100.1.25";
    /// prefNodeName
    pub const PREF_NODE_NAME: &str = "1.3.6.1.4.1.18060.0.4.1.2.1";

    /// createTimestamp
    pub const CREATE_TIMESTAMP: &str = "2.5.18.1";
    /// modifyTimestamp
    pub const MODIFY_TIMESTAMP: &str = "2.5.18.2";
    /// creatorsName
    pub const CREATORS_NAME: &str = "2.5.18.3";
    /// modifiersName
    pub const MODIFIERS_NAME: &str = "2.5.18.4";
    /// administrativeRole
    pub const ADMINISTRATIVE_ROLE: &str = "2.5.18.5";
    /// subtreeSpecification
    pub const SUBTREE_SPECIFICATION: &str = "2.5.18.6";
    /// subschemaSubentry
    pub const SUBSCHEMA_SUBENTRY: &str = "2.5.18.10";
    /// accessControlSubentries
    pub const ACCESS_CONTROL_SUBENTRIES: &str = "2.5.18.11";
    /// collectiveAttributeSubentries
    pub const COLLECTIVE_ATTRIBUTE_SUBENTRIES: &str = "2.5.18.12";
    /// triggerExecutionSubentries
    pub const TRIGGER_EXECUTION_SUBENTRIES: &str = "1.3.6.1.4.1.18060.0.4.1.2.27";
    /// entryUUID
    pub const ENTRY_UUID: &str = "1.3.6.1.1.16.4";
    /// apSeqNumber
    pub const AP_SEQ_NUMBER: &str = "1.3.6.1.4.1.18060.0.4.1.2.60";
    /// accessControlSeqNumber
    pub const ACCESS_CONTROL_SEQ_NUMBER: &str = "1.3.6.1.4.1.18060.0.4.1.2.61";
    /// collectiveAttributeSeqNumber
    pub const COLLECTIVE_ATTRIBUTE_SEQ_NUMBER: &str = "1.3.6.1.4.1.18060.0.4.1.2.62";
    /// subschemaSeqNumber
    pub const SUBSCHEMA_SEQ_NUMBER: &str = "1.3.6.1.4.1.18060.0.4.1.2.63";
    /// triggerExecutionSeqNumber
    pub const TRIGGER_EXECUTION_SEQ_NUMBER: &str = "1.3.6.1.4.1.18060.0.4.1.2.64";

    /// top
    pub const TOP_OC: &str = "2.5.6.0";
    /// organization
    pub const ORGANIZATION_OC: &str = "2.5.6.4";
    /// organizationalUnit
    pub const ORGANIZATIONAL_UNIT_OC: &str = "2.5.6.5";
    /// person
    pub const PERSON_OC: &str = "2.5.6.6";
    /// organizationalPerson
    pub const ORGANIZATIONAL_PERSON_OC: &str = "2.5.6.7";
    /// groupOfNames
    pub const GROUP_OF_NAMES_OC: &str = "2.5.6.9";
    /// device
    pub const DEVICE_OC: &str = "2.5.6.14";
    /// inetOrgPerson
    pub const INET_ORG_PERSON_OC: &str = "2.16.840.1.113730.3.2.2";
    /// domain
    pub const DOMAIN_OC: &str = "0.9.2342.19200300.100.4.13";
    /// dcObject
    pub const DC_OBJECT_OC: &str = "1.3.6.1.4.1.1466.344";
    /// extensibleObject
    pub const EXTENSIBLE_OBJECT_OC: &str = "1.3.6.1.4.1.1466.101.120.111";
    /// subentry
    pub const SUBENTRY_OC: &str = "2.5.17.0";
    /// accessControlSubentry
    pub const ACCESS_CONTROL_SUBENTRY_OC: &str = "2.5.17.1";
    /// collectiveAttributeSubentry
    pub const COLLECTIVE_ATTRIBUTE_SUBENTRY_OC: &str = "2.5.17.2";
    /// subschema
    pub const SUBSCHEMA_OC: &str = "2.5.20.1";
    /// triggerExecutionSubentry
    pub const TRIGGER_EXECUTION_SUBENTRY_OC: &str = "1.3.6.1.4.1.18060.0.4.1.3.27";
}

/// Equality matching rule, which decides how values are canonicalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchingRule {
    /// Trim, collapse inner whitespace, lowercase.
    CaseIgnore,
    /// Trim and collapse inner whitespace.
    CaseExact,
    /// Drop all whitespace.
    Numeric,
    /// Signed decimal integer.
    Integer,
    /// Descriptor or numeric OID, compared case-insensitively.
    ObjectIdentifier,
    /// A distinguished name, compared in normalized form.
    DistinguishedName,
    /// Raw bytes.
    OctetString,
    /// Generalized time, compared as an exact string.
    GeneralizedTime,
}

/// Attribute usage as declared in the schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeUsage {
    /// Ordinary user attribute.
    UserApplications,
    /// Operational attribute maintained by the directory.
    DirectoryOperation,
}

/// An attribute type definition.
#[derive(Clone, Debug)]
pub struct AttributeType {
    /// Numeric OID, the canonical key.
    pub oid: String,
    /// Descriptors, first one is the preferred name.
    pub names: Vec<String>,
    /// Equality matching rule.
    pub equality: MatchingRule,
    /// At most one value allowed.
    pub single_valued: bool,
    /// Whether the syntax is human readable (text) or binary.
    pub human_readable: bool,
    /// Only the directory itself may write this attribute.
    pub no_user_modification: bool,
    /// Usage.
    pub usage: AttributeUsage,
}

impl AttributeType {
    /// A multi-valued user attribute.
    pub fn new(oid: &str, names: &[&str], equality: MatchingRule) -> Self {
        Self {
            oid: oid.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            equality,
            single_valued: false,
            human_readable: equality != MatchingRule::OctetString,
            no_user_modification: false,
            usage: AttributeUsage::UserApplications,
        }
    }

    /// Mark as single-valued.
    pub fn single_valued(mut self) -> Self {
        self.single_valued = true;
        self
    }

    /// Mark as an operational (directoryOperation) attribute.
    pub fn operational(mut self) -> Self {
        self.usage = AttributeUsage::DirectoryOperation;
        self
    }

    /// Mark as maintained by the server only.
    pub fn no_user_modification(mut self) -> Self {
        self.no_user_modification = true;
        self
    }

    /// Preferred descriptor, falling back to the OID.
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }

    /// True for directory-maintained attributes.
    pub fn is_operational(&self) -> bool {
        self.usage == AttributeUsage::DirectoryOperation
    }
}

/// Object class kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClassKind {
    /// abstract
    Abstract,
    /// structural
    Structural,
    /// auxiliary
    Auxiliary,
}

/// An object class definition.
#[derive(Clone, Debug)]
pub struct ObjectClass {
    /// Numeric OID.
    pub oid: String,
    /// Descriptors.
    pub names: Vec<String>,
    /// Kind.
    pub kind: ObjectClassKind,
    /// Superclass OIDs.
    pub superiors: Vec<String>,
}

impl ObjectClass {
    /// Build an object class definition.
    pub fn new(oid: &str, names: &[&str], kind: ObjectClassKind, superiors: &[&str]) -> Self {
        Self {
            oid: oid.to_string(),
            names: names.iter().map(|n| n.to_string()).collect(),
            kind,
            superiors: superiors.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Preferred descriptor, falling back to the OID.
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or(&self.oid)
    }
}

/// Registry of attribute types and object classes.
pub struct SchemaRegistry {
    attribute_types: DashMap<String, Arc<AttributeType>>,
    object_classes: DashMap<String, Arc<ObjectClass>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_key(id: &str) -> String {
    // Attribute options ("cn;lang-de") do not change the type.
    let id = id.split(';').next().unwrap_or(id);
    id.trim().to_ascii_lowercase()
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            attribute_types: DashMap::new(),
            object_classes: DashMap::new(),
        }
    }

    /// A registry loaded with the core directory schema.
    pub fn bootstrap() -> Self {
        use oids::*;
        use MatchingRule::*;

        let registry = Self::new();
        let attribute_types = vec![
            AttributeType::new(OBJECT_CLASS, &["objectClass"], ObjectIdentifier),
            AttributeType::new(CN, &["cn", "commonName"], CaseIgnore),
            AttributeType::new(SN, &["sn", "surname"], CaseIgnore),
            AttributeType::new(C, &["c", "countryName"], CaseIgnore).single_valued(),
            AttributeType::new(O, &["o", "organizationName"], CaseIgnore),
            AttributeType::new(OU, &["ou", "organizationalUnitName"], CaseIgnore),
            AttributeType::new(DESCRIPTION, &["description"], CaseIgnore),
            AttributeType::new(TELEPHONE_NUMBER, &["telephoneNumber"], Numeric),
            AttributeType::new(MEMBER, &["member"], DistinguishedName),
            AttributeType::new(USER_PASSWORD, &["userPassword"], OctetString),
            AttributeType::new(GIVEN_NAME, &["givenName", "gn"], CaseIgnore),
            AttributeType::new(UID, &["uid", "userid"], CaseIgnore),
            AttributeType::new(MAIL, &["mail", "rfc822Mailbox"], CaseIgnore),
            AttributeType::new(DC, &["dc", "domainComponent"], CaseIgnore).single_valued(),
            AttributeType::new(PREF_NODE_NAME, &["prefNodeName"], CaseIgnore),
            AttributeType::new(CREATE_TIMESTAMP, &["createTimestamp"], GeneralizedTime)
                .single_valued()
                .operational()
                .no_user_modification(),
            AttributeType::new(MODIFY_TIMESTAMP, &["modifyTimestamp"], GeneralizedTime)
                .single_valued()
                .operational()
                .no_user_modification(),
            AttributeType::new(CREATORS_NAME, &["creatorsName"], DistinguishedName)
                .single_valued()
                .operational()
                .no_user_modification(),
            AttributeType::new(MODIFIERS_NAME, &["modifiersName"], DistinguishedName)
                .single_valued()
                .operational()
                .no_user_modification(),
            AttributeType::new(ENTRY_UUID, &["entryUUID"], CaseIgnore)
                .single_valued()
                .operational()
                .no_user_modification(),
            AttributeType::new(ADMINISTRATIVE_ROLE, &["administrativeRole"], ObjectIdentifier)
                .operational(),
            AttributeType::new(SUBTREE_SPECIFICATION, &["subtreeSpecification"], CaseExact)
                .single_valued()
                .operational(),
            AttributeType::new(SUBSCHEMA_SUBENTRY, &["subschemaSubentry"], DistinguishedName)
                .operational()
                .no_user_modification(),
            AttributeType::new(
                ACCESS_CONTROL_SUBENTRIES,
                &["accessControlSubentries"],
                DistinguishedName,
            )
            .operational()
            .no_user_modification(),
            AttributeType::new(
                COLLECTIVE_ATTRIBUTE_SUBENTRIES,
                &["collectiveAttributeSubentries"],
                DistinguishedName,
            )
            .operational()
            .no_user_modification(),
            AttributeType::new(
                TRIGGER_EXECUTION_SUBENTRIES,
                &["triggerExecutionSubentries"],
                DistinguishedName,
            )
            .operational()
            .no_user_modification(),
            AttributeType::new(AP_SEQ_NUMBER, &["apSeqNumber"], Integer)
                .single_valued()
                .operational()
                .no_user_modification(),
            AttributeType::new(ACCESS_CONTROL_SEQ_NUMBER, &["accessControlSeqNumber"], Integer)
                .single_valued()
                .operational()
                .no_user_modification(),
            AttributeType::new(
                COLLECTIVE_ATTRIBUTE_SEQ_NUMBER,
                &["collectiveAttributeSeqNumber"],
                Integer,
            )
            .single_valued()
            .operational()
            .no_user_modification(),
            AttributeType::new(SUBSCHEMA_SEQ_NUMBER, &["subschemaSeqNumber"], Integer)
                .single_valued()
                .operational()
                .no_user_modification(),
            AttributeType::new(
                TRIGGER_EXECUTION_SEQ_NUMBER,
                &["triggerExecutionSeqNumber"],
                Integer,
            )
            .single_valued()
            .operational()
            .no_user_modification(),
        ];
        for at in attribute_types {
            registry.register_attribute_type(at);
        }

        use ObjectClassKind::*;
        let object_classes = vec![
            ObjectClass::new(TOP_OC, &["top"], Abstract, &[]),
            ObjectClass::new(ORGANIZATION_OC, &["organization"], Structural, &[TOP_OC]),
            ObjectClass::new(ORGANIZATIONAL_UNIT_OC, &["organizationalUnit"], Structural, &[TOP_OC]),
            ObjectClass::new(PERSON_OC, &["person"], Structural, &[TOP_OC]),
            ObjectClass::new(
                ORGANIZATIONAL_PERSON_OC,
                &["organizationalPerson"],
                Structural,
                &[PERSON_OC],
            ),
            ObjectClass::new(
                INET_ORG_PERSON_OC,
                &["inetOrgPerson"],
                Structural,
                &[ORGANIZATIONAL_PERSON_OC],
            ),
            ObjectClass::new(GROUP_OF_NAMES_OC, &["groupOfNames"], Structural, &[TOP_OC]),
            ObjectClass::new(DEVICE_OC, &["device"], Structural, &[TOP_OC]),
            ObjectClass::new(DOMAIN_OC, &["domain"], Structural, &[TOP_OC]),
            ObjectClass::new(DC_OBJECT_OC, &["dcObject"], Auxiliary, &[TOP_OC]),
            ObjectClass::new(EXTENSIBLE_OBJECT_OC, &["extensibleObject"], Auxiliary, &[TOP_OC]),
            ObjectClass::new(SUBENTRY_OC, &["subentry"], Structural, &[TOP_OC]),
            ObjectClass::new(
                ACCESS_CONTROL_SUBENTRY_OC,
                &["accessControlSubentry"],
                Auxiliary,
                &[TOP_OC],
            ),
            ObjectClass::new(
                COLLECTIVE_ATTRIBUTE_SUBENTRY_OC,
                &["collectiveAttributeSubentry"],
                Auxiliary,
                &[TOP_OC],
            ),
            ObjectClass::new(SUBSCHEMA_OC, &["subschema"], Auxiliary, &[TOP_OC]),
            ObjectClass::new(
                TRIGGER_EXECUTION_SUBENTRY_OC,
                &["triggerExecutionSubentry"],
                Auxiliary,
                &[TOP_OC],
            ),
        ];
        for oc in object_classes {
            registry.register_object_class(oc);
        }
        registry
    }

    /// Register an attribute type under its OID and each of its names.
    /// A later registration for the same key replaces the earlier one.
    pub fn register_attribute_type(&self, at: AttributeType) {
        let at = Arc::new(at);
        self.attribute_types.insert(lookup_key(&at.oid), Arc::clone(&at));
        for name in &at.names {
            self.attribute_types.insert(lookup_key(name), Arc::clone(&at));
        }
    }

    /// Register an object class under its OID and each of its names.
    pub fn register_object_class(&self, oc: ObjectClass) {
        let oc = Arc::new(oc);
        self.object_classes.insert(lookup_key(&oc.oid), Arc::clone(&oc));
        for name in &oc.names {
            self.object_classes.insert(lookup_key(name), Arc::clone(&oc));
        }
    }

    /// Attribute type by name or OID, if registered.
    pub fn attribute_type(&self, id: &str) -> Option<Arc<AttributeType>> {
        self.attribute_types
            .get(&lookup_key(id))
            .map(|r| Arc::clone(r.value()))
    }

    /// Attribute type by name or OID, failing with `UndefinedAttributeType`.
    pub fn lookup_attribute_type(&self, id: &str) -> Result<Arc<AttributeType>> {
        self.attribute_type(id)
            .ok_or_else(|| DirError::UndefinedAttributeType(id.to_string()))
    }

    /// Object class by name or OID, if registered.
    pub fn object_class(&self, id: &str) -> Option<Arc<ObjectClass>> {
        self.object_classes
            .get(&lookup_key(id))
            .map(|r| Arc::clone(r.value()))
    }

    /// OIDs of the named class and all its superclasses. Unknown classes
    /// yield their lowercased name so they can still be compared.
    pub fn object_class_closure(&self, id: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut pending = vec![id.to_string()];
        while let Some(current) = pending.pop() {
            match self.object_class(&current) {
                Some(oc) => {
                    if out.insert(oc.oid.clone()) {
                        pending.extend(oc.superiors.iter().cloned());
                    }
                }
                None => {
                    out.insert(lookup_key(&current));
                }
            }
        }
        out
    }

    /// Canonical string form of `value` under the type's matching rule.
    pub fn normalize_str(&self, at: &AttributeType, value: &str) -> Result<String> {
        match at.equality {
            MatchingRule::CaseIgnore => Ok(collapse_whitespace(value).to_lowercase()),
            MatchingRule::CaseExact | MatchingRule::GeneralizedTime => {
                Ok(collapse_whitespace(value))
            }
            MatchingRule::Numeric => Ok(value.chars().filter(|c| !c.is_whitespace()).collect()),
            MatchingRule::Integer => {
                let trimmed = value.trim();
                let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
                digits
                    .parse::<i64>()
                    .map(|n| n.to_string())
                    .map_err(|_| {
                        DirError::InvalidAttributeSyntax(format!(
                            "{}: '{}' is not an integer",
                            at.name(),
                            value
                        ))
                    })
            }
            MatchingRule::ObjectIdentifier => Ok(value.trim().to_ascii_lowercase()),
            MatchingRule::DistinguishedName => {
                let dn = Dn::parse(value).and_then(|dn| dn.normalized(self)).map_err(|e| {
                    DirError::InvalidAttributeSyntax(format!("{}: {}", at.name(), e))
                })?;
                Ok(dn.norm_name().to_string())
            }
            MatchingRule::OctetString => Ok(value.to_string()),
        }
    }

    /// Normalize a single value, converting between text and binary form
    /// according to the syntax's human-readability flag.
    pub fn normalize_value(&self, at: &AttributeType, value: &Value) -> Result<Value> {
        match value {
            Value::Text { up, .. } if at.human_readable => Ok(Value::Text {
                up: up.clone(),
                norm: self.normalize_str(at, up)?,
            }),
            Value::Text { up, .. } => Ok(Value::Binary(up.as_bytes().to_vec())),
            Value::Binary(bytes) if at.human_readable => {
                let text = String::from_utf8(bytes.clone()).map_err(|_| {
                    DirError::InvalidAttributeSyntax(format!(
                        "{}: value is not valid UTF-8",
                        at.name()
                    ))
                })?;
                let norm = self.normalize_str(at, &text)?;
                Ok(Value::Text { up: text, norm })
            }
            Value::Binary(bytes) => Ok(Value::Binary(bytes.clone())),
        }
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
