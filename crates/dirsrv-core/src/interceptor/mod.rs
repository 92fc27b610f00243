//! Operation dispatch chain.
//!
//! Every directory operation is wrapped in an `OperationContext` and handed
//! to an ordered list of interceptors. Each interceptor inspects or rewrites
//! the context and then explicitly hands it to the rest of the chain through
//! its `Next` continuation; when the list is exhausted the operation reaches
//! the partition. Interceptors named in the context's `Bypass` set are
//! skipped, which is how secondary repair operations avoid re-entering the
//! subentry interceptor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::backend::{Partition, SearchScope};
use crate::dn::Dn;
use crate::entry::{Entry, Modification};
use crate::error::{DirError, Result};
use crate::filter::Filter;
use crate::schema::{oids, SchemaRegistry};
use crate::session::Session;

pub mod context;
pub mod exception;
pub mod normalization;
pub mod operational;
pub mod subentry;

pub use context::{Bypass, OperationContext, OperationKind, Request};
pub use exception::ExceptionInterceptor;
pub use normalization::NormalizationInterceptor;
pub use operational::OperationalAttributeInterceptor;
pub use subentry::SubentryInterceptor;

/// Name of the normalization interceptor.
pub const NORMALIZATION: &str = "normalization";
/// Name of the exception interceptor.
pub const EXCEPTION: &str = "exception";
/// Name of the operational attribute interceptor.
pub const OPERATIONAL_ATTRIBUTE: &str = "operationalAttribute";
/// Name of the subentry interceptor.
pub const SUBENTRY: &str = "subentry";

/// What an operation produced.
#[derive(Clone, Debug)]
pub enum Response {
    /// Update completed.
    Done,
    /// Search or list results.
    Entries(Vec<Entry>),
    /// Lookup result.
    Entry(Option<Entry>),
}

impl Response {
    /// Search results, or an empty list for other responses.
    pub fn into_entries(self) -> Vec<Entry> {
        match self {
            Response::Entries(entries) => entries,
            Response::Entry(entry) => entry.into_iter().collect(),
            Response::Done => Vec::new(),
        }
    }
}

/// A member of the chain.
pub trait Interceptor: Send + Sync {
    /// Stable name, used by `Bypass`.
    fn name(&self) -> &'static str;

    /// Called once after the chain is assembled.
    fn init(&self, _chain: &InterceptorChain) -> Result<()> {
        Ok(())
    }

    /// Handle one operation. Implementations call `next.proceed(ctx)` to
    /// continue down the chain.
    fn process(&self, ctx: &mut OperationContext, next: Next<'_>) -> Result<Response>;
}

/// Continuation handed to an interceptor: the remainder of the chain.
pub struct Next<'a> {
    chain: &'a InterceptorChain,
    position: usize,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain, ending at the partition.
    pub fn proceed(self, ctx: &mut OperationContext) -> Result<Response> {
        self.chain.dispatch_from(self.position, ctx)
    }

    /// The whole chain, for secondary operations.
    pub fn chain(&self) -> &'a InterceptorChain {
        self.chain
    }
}

/// Counters kept by the chain.
#[derive(Debug, Default)]
pub struct ChainStats {
    operations: AtomicU64,
    failures: AtomicU64,
    internal_operations: AtomicU64,
}

/// Point-in-time copy of `ChainStats`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainStatsSnapshot {
    /// Operations executed, secondary ones included.
    pub operations: u64,
    /// Operations that returned an error.
    pub failures: u64,
    /// Secondary operations issued by interceptors.
    pub internal_operations: u64,
}

/// The ordered interceptors plus the partition they front.
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
    partition: Arc<dyn Partition>,
    schema: Arc<SchemaRegistry>,
    stats: ChainStats,
}

impl InterceptorChain {
    /// Assemble a chain. Call `init` before executing operations.
    pub fn new(
        schema: Arc<SchemaRegistry>,
        partition: Arc<dyn Partition>,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> Self {
        Self {
            interceptors,
            partition,
            schema,
            stats: ChainStats::default(),
        }
    }

    /// Run every interceptor's `init` in chain order.
    pub fn init(&self) -> Result<()> {
        for interceptor in &self.interceptors {
            debug!(interceptor = interceptor.name(), "initializing interceptor");
            interceptor.init(self)?;
        }
        Ok(())
    }

    /// Names in chain order.
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// The partition at the end of the chain.
    pub fn partition(&self) -> &Arc<dyn Partition> {
        &self.partition
    }

    /// The schema shared by every interceptor.
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ChainStatsSnapshot {
        ChainStatsSnapshot {
            operations: self.stats.operations.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            internal_operations: self.stats.internal_operations.load(Ordering::Relaxed),
        }
    }

    /// Run an operation through the whole chain.
    pub fn execute(&self, ctx: &mut OperationContext) -> Result<Response> {
        self.stats.operations.fetch_add(1, Ordering::Relaxed);
        let result = self.dispatch_from(0, ctx);
        if result.is_err() {
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    fn dispatch_from(&self, position: usize, ctx: &mut OperationContext) -> Result<Response> {
        let mut position = position;
        while let Some(interceptor) = self.interceptors.get(position) {
            if ctx.bypass.is_bypassed(interceptor.name()) {
                position += 1;
                continue;
            }
            return interceptor.process(
                ctx,
                Next {
                    chain: self,
                    position: position + 1,
                },
            );
        }
        self.dispatch_to_partition(ctx)
    }

    fn dispatch_to_partition(&self, ctx: &mut OperationContext) -> Result<Response> {
        match &ctx.request {
            Request::Add { entry } => {
                self.partition.add(entry.clone())?;
                Ok(Response::Done)
            }
            Request::Delete { dn } => {
                self.partition.delete(dn)?;
                Ok(Response::Done)
            }
            Request::Modify { dn, modifications } => {
                let altered = self.partition.modify(dn, modifications)?;
                ctx.altered_entry = Some(altered);
                Ok(Response::Done)
            }
            Request::Move { dn, .. }
            | Request::Rename { dn, .. }
            | Request::MoveAndRename { dn, .. } => {
                let new_dn = ctx.request.new_dn()?.ok_or_else(|| {
                    DirError::UnwillingToPerform(format!("cannot relocate {}", dn))
                })?;
                let renamed = self
                    .partition
                    .rename(dn, &new_dn, ctx.request.delete_old_rdn())?;
                ctx.altered_entry = Some(renamed);
                Ok(Response::Done)
            }
            Request::Search {
                base,
                scope,
                filter,
                ..
            } => Ok(Response::Entries(self.partition.search(base, *scope, filter)?)),
            Request::List { base } => Ok(Response::Entries(self.partition.search(
                base,
                SearchScope::OneLevel,
                &Filter::present(oids::OBJECT_CLASS),
            )?)),
            Request::Lookup { dn } => Ok(Response::Entry(self.partition.lookup(dn)?)),
        }
    }

    fn execute_internal(&self, session: &Session, request: Request) -> Result<(OperationContext, Response)> {
        self.stats.internal_operations.fetch_add(1, Ordering::Relaxed);
        let mut ctx =
            OperationContext::new(session.clone(), request).with_bypass(Bypass::core_only());
        let response = self.execute(&mut ctx)?;
        Ok((ctx, response))
    }

    /// Secondary modify that only passes normalization and exception
    /// checks. Returns the altered entry.
    pub fn modify_internal(
        &self,
        session: &Session,
        dn: &Dn,
        modifications: Vec<Modification>,
    ) -> Result<Entry> {
        let request = Request::Modify {
            dn: dn.clone(),
            modifications,
        };
        let (ctx, _) = self.execute_internal(session, request)?;
        ctx.altered_entry
            .ok_or_else(|| DirError::NoSuchObject(dn.up_name().to_string()))
    }

    /// Secondary search that sees subentries and ordinary entries alike.
    pub fn search_internal(
        &self,
        session: &Session,
        base: &Dn,
        scope: SearchScope,
        filter: Filter,
    ) -> Result<Vec<Entry>> {
        let request = Request::Search {
            base: base.clone(),
            scope,
            filter,
            attributes: Vec::new(),
        };
        let (_, response) = self.execute_internal(session, request)?;
        Ok(response.into_entries())
    }

    /// Secondary lookup.
    pub fn lookup_internal(&self, session: &Session, dn: &Dn) -> Result<Option<Entry>> {
        let (_, response) = self.execute_internal(session, Request::Lookup { dn: dn.clone() })?;
        match response {
            Response::Entry(entry) => Ok(entry),
            other => Ok(other.into_entries().into_iter().next()),
        }
    }
}
