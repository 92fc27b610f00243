//! Decides whether a subtree specification selects a candidate entry.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::dn::Dn;
use crate::entry::{Entry, Value};
use crate::schema::{oids, SchemaRegistry};
use crate::subtree::spec::SubtreeSpecification;

/// Evaluates subtree specifications. All DNs must be normalized.
#[derive(Clone)]
pub struct SubtreeEvaluator {
    schema: Arc<SchemaRegistry>,
}

impl SubtreeEvaluator {
    /// Create an evaluator that resolves object classes through `schema`.
    pub fn new(schema: Arc<SchemaRegistry>) -> Self {
        Self { schema }
    }

    /// True if `spec`, anchored at `ap_dn`, selects the entry named
    /// `candidate_dn` whose attributes are `candidate`.
    ///
    /// The candidate's own DN is passed separately so that callers can ask
    /// about an entry's old or new position during a move.
    pub fn evaluate(
        &self,
        spec: &SubtreeSpecification,
        ap_dn: &Dn,
        candidate_dn: &Dn,
        candidate: &Entry,
    ) -> bool {
        let base = ap_dn.join(&spec.base);
        let Some(depth) = candidate_dn.depth_below(&base) else {
            return false;
        };
        let depth = u32::try_from(depth).unwrap_or(u32::MAX);
        if depth < spec.minimum || spec.maximum.is_some_and(|max| depth > max) {
            return false;
        }

        if spec
            .chop_before
            .iter()
            .any(|chop| candidate_dn.is_within(&base.join(chop)))
        {
            return false;
        }
        if spec
            .chop_after
            .iter()
            .any(|chop| candidate_dn.is_descendant_of(&base.join(chop)))
        {
            return false;
        }

        match &spec.refinement {
            Some(refinement) => refinement.matches(&self.object_classes(candidate)),
            None => true,
        }
    }

    /// OIDs of every object class of the entry, superclasses included.
    pub fn object_classes(&self, entry: &Entry) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(attr) = entry.get(oids::OBJECT_CLASS) {
            for name in attr.values().iter().filter_map(Value::as_str) {
                out.extend(self.schema.object_class_closure(name.trim()));
            }
        }
        out
    }
}
