//! The parsed form of a `subtreeSpecification` value.

use std::collections::BTreeSet;
use std::fmt;

use crate::dn::Dn;

/// A specification filter over object classes. Items hold object class OIDs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Refinement {
    /// `item: <objectclass>`
    Item(String),
    /// `and: { ... }`
    And(Vec<Refinement>),
    /// `or: { ... }`
    Or(Vec<Refinement>),
    /// `not: <refinement>`
    Not(Box<Refinement>),
}

impl Refinement {
    /// Evaluate against the full set of object class OIDs of an entry
    /// (superclasses included).
    pub fn matches(&self, object_classes: &BTreeSet<String>) -> bool {
        match self {
            Refinement::Item(oid) => object_classes.contains(oid),
            Refinement::And(items) => items.iter().all(|r| r.matches(object_classes)),
            Refinement::Or(items) => items.iter().any(|r| r.matches(object_classes)),
            Refinement::Not(inner) => !inner.matches(object_classes),
        }
    }
}

impl fmt::Display for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refinement::Item(oid) => write!(f, "item:{}", oid),
            Refinement::And(items) | Refinement::Or(items) => {
                let keyword = if matches!(self, Refinement::And(_)) { "and" } else { "or" };
                write!(f, "{}:{{ ", keyword)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, " }}")
            }
            Refinement::Not(inner) => write!(f, "not:{}", inner),
        }
    }
}

/// A selection predicate over the subtree below an administrative point.
///
/// All DNs are relative: `base` to the administrative point, the chop
/// exclusions to the effective base. The default value selects the whole
/// administrative area.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubtreeSpecification {
    /// Relative base; empty means the administrative point itself.
    pub base: Dn,
    /// Excluded together with their subordinates.
    pub chop_before: Vec<Dn>,
    /// Subordinates excluded, the named entry itself kept.
    pub chop_after: Vec<Dn>,
    /// Minimum depth below the effective base.
    pub minimum: u32,
    /// Maximum depth below the effective base, unbounded when `None`.
    pub maximum: Option<u32>,
    /// Optional object class filter.
    pub refinement: Option<Refinement>,
}

fn quote(dn: &Dn) -> String {
    format!("\"{}\"", dn.up_name().replace('"', "\"\""))
}

impl fmt::Display for SubtreeSpecification {
    /// Canonical generic string encoding; components that hold their
    /// default value are omitted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.base.is_root() {
            parts.push(format!("base {}", quote(&self.base)));
        }
        if !self.chop_before.is_empty() || !self.chop_after.is_empty() {
            let exclusions: Vec<String> = self
                .chop_before
                .iter()
                .map(|dn| format!("chopBefore:{}", quote(dn)))
                .chain(
                    self.chop_after
                        .iter()
                        .map(|dn| format!("chopAfter:{}", quote(dn))),
                )
                .collect();
            parts.push(format!("specificExclusions {{ {} }}", exclusions.join(", ")));
        }
        if self.minimum > 0 {
            parts.push(format!("minimum {}", self.minimum));
        }
        if let Some(max) = self.maximum {
            parts.push(format!("maximum {}", max));
        }
        if let Some(refinement) = &self.refinement {
            parts.push(format!("specificationFilter {}", refinement));
        }
        if parts.is_empty() {
            write!(f, "{{}}")
        } else {
            write!(f, "{{ {} }}", parts.join(", "))
        }
    }
}
