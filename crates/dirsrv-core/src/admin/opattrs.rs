//! Builders for the operational attribute changes that keep candidates in
//! step with their subentries.

use crate::admin::role::RoleFamily;
use crate::dn::Dn;
use crate::entry::{Attribute, Entry, Modification, Value};
use crate::error::Result;
use crate::schema::{oids, SchemaRegistry};

fn reference(subentry: &Dn) -> Value {
    Value::normalized(subentry.norm_name(), subentry.norm_name())
}

fn integer(n: i64) -> Value {
    let s = n.to_string();
    Value::normalized(&s, &s)
}

fn typed(schema: &SchemaRegistry, oid: &str, values: Vec<Value>) -> Result<Attribute> {
    let at = schema.lookup_attribute_type(oid)?;
    Ok(Attribute::from_type(&at, values))
}

/// Add `subentry` to the family's reference attribute.
pub fn add_reference(schema: &SchemaRegistry, family: RoleFamily, subentry: &Dn) -> Result<Modification> {
    Ok(Modification::add(typed(
        schema,
        family.subentries_attribute(),
        vec![reference(subentry)],
    )?))
}

/// Remove `subentry` from the family's reference attribute.
pub fn remove_reference(
    schema: &SchemaRegistry,
    family: RoleFamily,
    subentry: &Dn,
) -> Result<Modification> {
    Ok(Modification::remove(typed(
        schema,
        family.subentries_attribute(),
        vec![reference(subentry)],
    )?))
}

/// Swap `old` for `new` in the family's reference attribute of `entry`,
/// keeping the other values. `None` when `entry` does not reference `old`.
pub fn replace_reference(
    schema: &SchemaRegistry,
    family: RoleFamily,
    entry: &Entry,
    old: &Dn,
    new: &Dn,
) -> Result<Option<Modification>> {
    let Some(current) = entry.get(family.subentries_attribute()) else {
        return Ok(None);
    };
    if !current.contains_norm(old.norm_name()) {
        return Ok(None);
    }
    let mut values: Vec<Value> = current
        .values()
        .iter()
        .filter(|v| v.norm_str() != Some(old.norm_name()))
        .cloned()
        .collect();
    values.push(reference(new));
    Ok(Some(Modification::replace(typed(
        schema,
        family.subentries_attribute(),
        values,
    )?)))
}

/// Set the family's sequence number attribute on a candidate.
pub fn family_seq_number(schema: &SchemaRegistry, family: RoleFamily, seq: i64) -> Result<Modification> {
    Ok(Modification::replace(typed(
        schema,
        family.seq_number_attribute(),
        vec![integer(seq)],
    )?))
}

/// Drop the family's sequence number attribute from a candidate that no
/// longer references any subentry of that family.
pub fn clear_family_seq_number(schema: &SchemaRegistry, family: RoleFamily) -> Result<Modification> {
    Ok(Modification::remove(typed(
        schema,
        family.seq_number_attribute(),
        Vec::new(),
    )?))
}

/// Set `apSeqNumber` on an administrative point.
pub fn ap_seq_number(schema: &SchemaRegistry, seq: i64) -> Result<Modification> {
    Ok(Modification::replace(typed(
        schema,
        oids::AP_SEQ_NUMBER,
        vec![integer(seq)],
    )?))
}

/// Read an integer attribute.
pub fn read_integer(entry: &Entry, oid: &str) -> Option<i64> {
    entry
        .get(oid)
        .and_then(Attribute::first)
        .and_then(Value::as_str)
        .and_then(|s| s.trim().parse().ok())
}
