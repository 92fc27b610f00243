//! Puts every name, value and filter of a request into schema-canonical
//! form before any other interceptor looks at it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::entry::{Attribute, Entry, Modification, Value};
use crate::error::Result;
use crate::interceptor::{Interceptor, Next, OperationContext, Request, Response, NORMALIZATION};
use crate::schema::SchemaRegistry;

/// Attribute selectors with special meaning in a search request.
const SPECIAL_SELECTORS: [&str; 3] = ["*", "+", "1.1"];

/// The normalization interceptor.
pub struct NormalizationInterceptor {
    diagnostics: Arc<Diagnostics>,
}

impl NormalizationInterceptor {
    /// Report collapsed filters to `diagnostics`.
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self { diagnostics }
    }
}

/// Make sure the entry carries the values named by its own RDN.
fn inject_rdn_attributes(entry: &mut Entry, schema: &SchemaRegistry) -> Result<()> {
    let avas = entry
        .dn()
        .rdn()
        .map(|rdn| rdn.avas().to_vec())
        .unwrap_or_default();
    for ava in avas {
        let at = schema.lookup_attribute_type(ava.norm_type())?;
        let value = Value::normalized(ava.up_value(), ava.norm_value());
        let present = entry.get(&at.oid).map(|a| a.contains_value(&value));
        let attribute = Attribute::from_type(&at, vec![value]);
        match present {
            Some(true) => {}
            None => {
                entry.put(attribute);
            }
            Some(false) if at.single_valued => {
                entry.apply(&Modification::replace(attribute))?;
            }
            Some(false) => {
                entry.apply(&Modification::add(attribute))?;
            }
        }
    }
    Ok(())
}

fn normalize_selectors(schema: &SchemaRegistry, ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        let normalized = if SPECIAL_SELECTORS.contains(&id) {
            Some(id.to_string())
        } else {
            schema.attribute_type(id).map(|at| at.oid.clone())
        };
        match normalized {
            Some(n) if !out.contains(&n) => out.push(n),
            Some(_) => {}
            None => debug!(attr = %id, "ignoring unknown attribute in search request"),
        }
    }
    out
}

impl Interceptor for NormalizationInterceptor {
    fn name(&self) -> &'static str {
        NORMALIZATION
    }

    fn process(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        let schema = Arc::clone(next.chain().schema());
        match &mut ctx.request {
            Request::Add { entry } => {
                entry.normalize(&schema)?;
                inject_rdn_attributes(entry, &schema)?;
            }
            Request::Delete { dn } | Request::Lookup { dn } | Request::List { base: dn } => {
                dn.normalize(&schema)?;
            }
            Request::Modify { dn, modifications } => {
                dn.normalize(&schema)?;
                for m in modifications.iter_mut() {
                    m.attribute.normalize(&schema)?;
                }
            }
            Request::Move { dn, new_superior } => {
                dn.normalize(&schema)?;
                new_superior.normalize(&schema)?;
            }
            Request::Rename { dn, new_rdn, .. } => {
                dn.normalize(&schema)?;
                new_rdn.normalize(&schema)?;
            }
            Request::MoveAndRename {
                dn,
                new_superior,
                new_rdn,
                ..
            } => {
                dn.normalize(&schema)?;
                new_superior.normalize(&schema)?;
                new_rdn.normalize(&schema)?;
            }
            Request::Search {
                base,
                filter,
                attributes,
                ..
            } => {
                base.normalize(&schema)?;
                let normalized = filter.normalize(&schema);
                if normalized.is_undefined() {
                    let original = filter.to_string();
                    warn!(filter = %original, "filter has no resolvable attribute, returning no entries");
                    self.diagnostics
                        .record(DiagnosticEvent::FilterCollapsed { filter: original })?;
                    return Ok(Response::Entries(Vec::new()));
                }
                *filter = normalized;
                *attributes = normalize_selectors(&schema, attributes);
            }
        }
        next.proceed(ctx)
    }
}
