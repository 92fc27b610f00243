//! Existence checks performed before an operation reaches the partition,
//! so callers get a precise error and later interceptors can rely on the
//! target being present. The target entry is loaded into the context as a
//! side effect.

use tracing::debug;

use crate::backend::Partition;
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{DirError, Result};
use crate::interceptor::{Interceptor, Next, OperationContext, Request, Response, EXCEPTION};

/// The exception interceptor.
#[derive(Debug, Default)]
pub struct ExceptionInterceptor;

impl ExceptionInterceptor {
    /// New interceptor.
    pub fn new() -> Self {
        Self
    }
}

fn require(partition: &dyn Partition, dn: &Dn) -> Result<Entry> {
    partition
        .lookup(dn)?
        .ok_or_else(|| DirError::NoSuchObject(dn.up_name().to_string()))
}

fn require_parent(partition: &dyn Partition, dn: &Dn) -> Result<()> {
    match partition.find_suffix(dn) {
        None => Err(DirError::NoSuchObject(format!(
            "{} is not within any naming context",
            dn.up_name()
        ))),
        Some(suffix) if suffix == *dn => Ok(()),
        Some(_) if partition.has_entry(&dn.parent())? => Ok(()),
        Some(_) => Err(DirError::NoSuchObject(dn.parent().up_name().to_string())),
    }
}

impl Interceptor for ExceptionInterceptor {
    fn name(&self) -> &'static str {
        EXCEPTION
    }

    fn process(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response> {
        let partition = next.chain().partition().as_ref();
        let original = match &ctx.request {
            Request::Add { entry } => {
                if partition.has_entry(entry.dn())? {
                    return Err(DirError::EntryAlreadyExists(entry.dn().up_name().to_string()));
                }
                require_parent(partition, entry.dn())?;
                None
            }
            Request::Delete { dn } => {
                let entry = require(partition, dn)?;
                if partition.has_children(dn)? {
                    return Err(DirError::NotAllowedOnNonLeaf(dn.up_name().to_string()));
                }
                Some(entry)
            }
            Request::Modify { dn, .. } => Some(require(partition, dn)?),
            Request::Move { dn, .. }
            | Request::Rename { dn, .. }
            | Request::MoveAndRename { dn, .. } => {
                let entry = require(partition, dn)?;
                if let Some(new_dn) = ctx.request.new_dn()? {
                    if new_dn.is_descendant_of(dn) {
                        return Err(DirError::UnwillingToPerform(format!(
                            "cannot move {} below itself",
                            dn.up_name()
                        )));
                    }
                    if new_dn != *dn && partition.has_entry(&new_dn)? {
                        return Err(DirError::EntryAlreadyExists(new_dn.up_name().to_string()));
                    }
                    require_parent(partition, &new_dn)?;
                }
                Some(entry)
            }
            Request::Search { base, .. } | Request::List { base } => {
                if !partition.has_entry(base)? {
                    return Err(DirError::NoSuchObject(base.up_name().to_string()));
                }
                None
            }
            Request::Lookup { .. } => None,
        };
        if original.is_some() {
            debug!(dn = %ctx.request.dn(), op = ?ctx.request.kind(), "target loaded");
        }
        ctx.original_entry = original;
        next.proceed(ctx)
    }
}
