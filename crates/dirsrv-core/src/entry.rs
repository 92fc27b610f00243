//! Entries, attributes, values and modifications.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dn::Dn;
use crate::error::{DirError, ResultCode, Result};
use crate::schema::{oids, AttributeType, SchemaRegistry};

/// An attribute value. Text values carry the supplied form and the
/// matching-rule-normalized form; comparisons use the latter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    /// Human readable value.
    Text {
        /// As supplied.
        up: String,
        /// Normalized.
        norm: String,
    },
    /// Binary value.
    Binary(Vec<u8>),
}

impl Value {
    /// Text value with a schema-less comparison form (case-folded,
    /// whitespace collapsed).
    pub fn text(s: &str) -> Self {
        Value::Text {
            up: s.to_string(),
            norm: s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase(),
        }
    }

    /// Text value whose normalized form is already known.
    pub fn normalized(up: &str, norm: &str) -> Self {
        Value::Text {
            up: up.to_string(),
            norm: norm.to_string(),
        }
    }

    /// Supplied text, `None` for binary values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text { up, .. } => Some(up),
            Value::Binary(_) => None,
        }
    }

    /// Normalized text, `None` for binary values.
    pub fn norm_str(&self) -> Option<&str> {
        match self {
            Value::Text { norm, .. } => Some(norm),
            Value::Binary(_) => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Text { norm: a, .. }, Value::Text { norm: b, .. }) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text { up, .. } => write!(f, "{}", up),
            Value::Binary(bytes) => {
                write!(f, "#")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// A named, multi-valued attribute.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attribute {
    id: String,
    oid: Option<String>,
    #[serde(default)]
    single_valued: bool,
    values: Vec<Value>,
}

impl Attribute {
    /// An empty attribute with the given description.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.trim().to_string(),
            oid: None,
            single_valued: false,
            values: Vec::new(),
        }
    }

    /// An attribute holding text values.
    pub fn with_values<I, S>(id: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut attr = Self::new(id);
        for v in values {
            attr.add(Value::text(v.as_ref()));
        }
        attr
    }

    /// An attribute bound to a schema type. Values must already be normalized.
    pub fn from_type(at: &AttributeType, values: Vec<Value>) -> Self {
        let mut attr = Self {
            id: at.name().to_string(),
            oid: Some(at.oid.clone()),
            single_valued: at.single_valued,
            values: Vec::new(),
        };
        for v in values {
            attr.add(v);
        }
        attr
    }

    /// Description as supplied.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// OID once bound to the schema.
    pub fn oid(&self) -> Option<&str> {
        self.oid.as_deref()
    }

    /// Map key inside an entry: the OID when known, else the lowercased id.
    pub fn key(&self) -> String {
        self.oid
            .clone()
            .unwrap_or_else(|| self.id.to_ascii_lowercase())
    }

    /// Values in insertion order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// First value.
    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no values are held.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Case-insensitive membership test for callers holding a plain string.
    pub fn contains(&self, value: &str) -> bool {
        let probe = Value::text(value);
        self.values
            .iter()
            .any(|v| *v == probe || v.as_str() == Some(value))
    }

    /// Exact test against the normalized form.
    pub fn contains_norm(&self, norm: &str) -> bool {
        self.values.iter().any(|v| v.norm_str() == Some(norm))
    }

    /// Test against another value using normalized comparison.
    pub fn contains_value(&self, value: &Value) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Add a value unless an equal one is present. Returns true if added.
    pub fn add(&mut self, value: Value) -> bool {
        if self.contains_value(&value) {
            return false;
        }
        self.values.push(value);
        true
    }

    /// Remove a value. Returns true if it was present.
    pub fn remove(&mut self, value: &Value) -> bool {
        let before = self.values.len();
        self.values.retain(|v| v != value);
        self.values.len() != before
    }

    /// Bind to the schema type and normalize every value.
    pub fn normalize(&mut self, schema: &SchemaRegistry) -> Result<()> {
        let at = schema.lookup_attribute_type(self.oid.as_deref().unwrap_or(&self.id))?;
        let mut values = Vec::with_capacity(self.values.len());
        for v in &self.values {
            let v = schema.normalize_value(&at, v)?;
            if !values.contains(&v) {
                values.push(v);
            }
        }
        self.values = values;
        self.oid = Some(at.oid.clone());
        self.single_valued = at.single_valued;
        Ok(())
    }

    fn check_cardinality(&self) -> Result<()> {
        if self.single_valued && self.values.len() > 1 {
            return Err(DirError::SchemaViolation {
                code: ResultCode::ConstraintViolation,
                message: format!("attribute '{}' is single-valued", self.id),
            });
        }
        Ok(())
    }
}

/// Kind of change applied by a `Modification`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    /// Add values (or create the attribute).
    Add,
    /// Remove the listed values, or the whole attribute when none are listed.
    Remove,
    /// Replace all values; an empty list removes the attribute.
    Replace,
}

/// One change to one attribute.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Modification {
    /// What to do.
    pub op: ModOp,
    /// Attribute and the values involved.
    pub attribute: Attribute,
}

impl Modification {
    /// `add` modification.
    pub fn add(attribute: Attribute) -> Self {
        Self { op: ModOp::Add, attribute }
    }

    /// `delete` modification.
    pub fn remove(attribute: Attribute) -> Self {
        Self { op: ModOp::Remove, attribute }
    }

    /// `replace` modification.
    pub fn replace(attribute: Attribute) -> Self {
        Self { op: ModOp::Replace, attribute }
    }
}

/// A directory entry: a name plus attributes keyed by OID (or by lowercased
/// description before normalization).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    dn: Dn,
    attributes: BTreeMap<String, Attribute>,
}

impl Entry {
    /// Empty entry.
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: BTreeMap::new(),
        }
    }

    /// Empty entry from a DN string.
    pub fn named(dn: &str) -> Result<Self> {
        Ok(Self::new(Dn::parse(dn)?))
    }

    /// Builder: add text values for `id`.
    pub fn with<I, S>(mut self, id: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for v in values {
            self.add_value(id, Value::text(v.as_ref()));
        }
        self
    }

    /// Entry from a DN string and a map of attribute values.
    pub fn from_map(dn: &str, attributes: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut entry = Self::named(dn)?;
        for (id, values) in attributes {
            entry = entry.with(id, values);
        }
        Ok(entry)
    }

    /// The entry's name.
    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// Rename in place.
    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    fn find_key(&self, id: &str) -> Option<String> {
        let key = id.trim().to_ascii_lowercase();
        if self.attributes.contains_key(&key) {
            return Some(key);
        }
        self.attributes
            .iter()
            .find(|(_, a)| a.id.eq_ignore_ascii_case(id.trim()))
            .map(|(k, _)| k.clone())
    }

    /// Attribute by OID or by the description it was supplied with.
    pub fn get(&self, id: &str) -> Option<&Attribute> {
        self.find_key(id).and_then(|k| self.attributes.get(&k))
    }

    /// Mutable attribute lookup.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Attribute> {
        let key = self.find_key(id)?;
        self.attributes.get_mut(&key)
    }

    /// Insert or replace a whole attribute.
    pub fn put(&mut self, attribute: Attribute) -> Option<Attribute> {
        let key = self
            .find_key(attribute.oid().unwrap_or(&attribute.id))
            .unwrap_or_else(|| attribute.key());
        self.attributes.insert(key, attribute)
    }

    /// Add one value, creating the attribute if needed.
    pub fn add_value(&mut self, id: &str, value: Value) {
        match self.get_mut(id) {
            Some(attr) => {
                attr.add(value);
            }
            None => {
                let mut attr = Attribute::new(id);
                attr.add(value);
                self.attributes.insert(attr.key(), attr);
            }
        }
    }

    /// Remove a whole attribute.
    pub fn remove(&mut self, id: &str) -> Option<Attribute> {
        let key = self.find_key(id)?;
        self.attributes.remove(&key)
    }

    /// True if `id` holds `value` (case-insensitive).
    pub fn contains(&self, id: &str, value: &str) -> bool {
        self.get(id).is_some_and(|a| a.contains(value))
    }

    /// True if the entry lists the object class (by name or OID value).
    pub fn has_object_class(&self, name: &str) -> bool {
        self.get(oids::OBJECT_CLASS)
            .or_else(|| self.get("objectClass"))
            .is_some_and(|a| a.contains(name))
    }

    /// All attributes.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True when the entry has no attributes.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Keep only attributes for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&Attribute) -> bool) {
        self.attributes.retain(|_, a| keep(a));
    }

    /// Normalize the name and every attribute against the schema, merging
    /// attributes supplied under different aliases of the same type.
    pub fn normalize(&mut self, schema: &SchemaRegistry) -> Result<()> {
        self.dn.normalize(schema)?;
        let old = std::mem::take(&mut self.attributes);
        for (_, mut attr) in old {
            attr.normalize(schema)?;
            match self.attributes.get_mut(&attr.key()) {
                Some(existing) => {
                    for v in attr.values {
                        existing.add(v);
                    }
                }
                None => {
                    self.attributes.insert(attr.key(), attr);
                }
            }
        }
        for attr in self.attributes.values() {
            attr.check_cardinality()?;
        }
        Ok(())
    }

    /// Apply one modification.
    pub fn apply(&mut self, modification: &Modification) -> Result<()> {
        let incoming = &modification.attribute;
        let lookup = incoming.oid().unwrap_or(&incoming.id).to_string();
        match modification.op {
            ModOp::Add => {
                if incoming.is_empty() {
                    return Ok(());
                }
                match self.get_mut(&lookup) {
                    Some(existing) => {
                        for v in &incoming.values {
                            existing.add(v.clone());
                        }
                        existing.single_valued |= incoming.single_valued;
                        existing.check_cardinality()?;
                    }
                    None => {
                        incoming.check_cardinality()?;
                        self.attributes.insert(incoming.key(), incoming.clone());
                    }
                }
            }
            ModOp::Remove => {
                if incoming.is_empty() {
                    self.remove(&lookup);
                    return Ok(());
                }
                let now_empty = match self.get_mut(&lookup) {
                    Some(existing) => {
                        for v in &incoming.values {
                            existing.remove(v);
                        }
                        existing.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.remove(&lookup);
                }
            }
            ModOp::Replace => {
                self.remove(&lookup);
                if !incoming.is_empty() {
                    incoming.check_cardinality()?;
                    self.attributes.insert(incoming.key(), incoming.clone());
                }
            }
        }
        Ok(())
    }

    /// Apply modifications in order.
    pub fn apply_all(&mut self, modifications: &[Modification]) -> Result<()> {
        for m in modifications {
            self.apply(m)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> Entry {
        Entry::named("cn=John Doe,ou=users,ou=system")
            .unwrap()
            .with("objectClass", ["top", "person"])
            .with("cn", ["John Doe"])
            .with("sn", ["Doe"])
    }

    #[test]
    fn test_get_by_name_before_and_after_normalization() {
        let schema = SchemaRegistry::bootstrap();
        let mut entry = person();
        assert!(entry.contains("SN", "doe"));
        entry.normalize(&schema).unwrap();
        assert!(entry.get(oids::SN).is_some());
        assert!(entry.get("sn").is_some());
        assert!(entry.has_object_class("PERSON"));
    }

    #[test]
    fn test_normalize_merges_aliases() {
        let schema = SchemaRegistry::bootstrap();
        let mut entry = person().with("commonName", ["Johnny", "john doe"]);
        entry.normalize(&schema).unwrap();
        let cn = entry.get(oids::CN).unwrap();
        assert_eq!(cn.len(), 2);
    }

    #[test]
    fn test_normalize_rejects_unknown_attribute() {
        let schema = SchemaRegistry::bootstrap();
        let mut entry = person().with("shoeSize", ["9"]);
        match entry.normalize(&schema) {
            Err(DirError::UndefinedAttributeType(_)) => {}
            other => panic!("expected UndefinedAttributeType, got {:?}", other),
        }
    }

    #[test]
    fn test_single_valued_enforced() {
        let schema = SchemaRegistry::bootstrap();
        let mut entry = Entry::named("dc=example")
            .unwrap()
            .with("objectClass", ["domain"])
            .with("dc", ["example", "other"]);
        match entry.normalize(&schema) {
            Err(DirError::SchemaViolation { code, .. }) => {
                assert_eq!(code, ResultCode::ConstraintViolation)
            }
            other => panic!("expected SchemaViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_modifications() {
        let mut entry = person();
        entry
            .apply_all(&[
                Modification::add(Attribute::with_values("description", ["a", "b"])),
                Modification::remove(Attribute::with_values("description", ["A"])),
                Modification::replace(Attribute::with_values("sn", ["Smith"])),
            ])
            .unwrap();
        assert!(entry.contains("description", "b"));
        assert!(!entry.contains("description", "a"));
        assert!(entry.contains("sn", "smith"));

        entry
            .apply(&Modification::remove(Attribute::with_values("description", ["b"])))
            .unwrap();
        assert!(entry.get("description").is_none());

        entry
            .apply(&Modification::replace(Attribute::new("sn")))
            .unwrap();
        assert!(entry.get("sn").is_none());
    }

    #[test]
    fn test_remove_of_absent_value_is_tolerated() {
        let mut entry = person();
        entry
            .apply(&Modification::remove(Attribute::with_values("mail", ["x@y"])))
            .unwrap();
        assert!(entry.get("mail").is_none());
    }

    #[test]
    fn test_bincode_round_trip_keeps_normalized_form() {
        let schema = SchemaRegistry::bootstrap();
        let mut entry = person();
        entry.normalize(&schema).unwrap();
        let bytes = bincode::serialize(&entry).unwrap();
        let back: Entry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.dn(), entry.dn());
        assert!(back.get(oids::CN).unwrap().contains_norm("john doe"));
    }
}
