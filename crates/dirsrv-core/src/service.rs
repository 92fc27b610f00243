//! The directory service: the default interceptor chain in front of a
//! partition, plus session construction and result projection.

use std::sync::Arc;

use tracing::{debug, info};

use crate::admin::{AdministrativePoint, RoleFamily, Subentry};
use crate::backend::{MemoryPartition, Partition, SearchScope};
use crate::config::{SeedEntry, ServiceConfig};
use crate::diagnostics::Diagnostics;
use crate::dn::{Dn, Rdn};
use crate::entry::{Entry, Modification};
use crate::error::{DirError, Result};
use crate::filter::Filter;
use crate::interceptor::subentry::StartupReport;
use crate::interceptor::{
    ExceptionInterceptor, InterceptorChain, NormalizationInterceptor, OperationContext,
    OperationalAttributeInterceptor, Request, Response, SubentryInterceptor,
};
use crate::schema::SchemaRegistry;
use crate::session::{AuthenticationLevel, Principal, RequestControls, Session};
use crate::subtree::SubtreeEvaluator;

/// A running directory.
pub struct DirectoryService {
    config: ServiceConfig,
    schema: Arc<SchemaRegistry>,
    admin_dn: Dn,
    chain: InterceptorChain,
    subentries: Arc<SubentryInterceptor>,
    diagnostics: Arc<Diagnostics>,
}

impl DirectoryService {
    /// Service over `partition` with the bootstrap schema.
    pub fn new(config: ServiceConfig, partition: Arc<dyn Partition>) -> Result<Self> {
        Self::with_schema(config, Arc::new(SchemaRegistry::bootstrap()), partition)
    }

    /// Service over a fresh in-memory partition for the configured suffixes.
    pub fn in_memory(config: ServiceConfig) -> Result<Self> {
        let schema = Arc::new(SchemaRegistry::bootstrap());
        let partition = Arc::new(MemoryPartition::new(Arc::clone(&schema), &config.suffixes)?);
        Self::with_schema(config, schema, partition)
    }

    /// Build the chain and run every interceptor's startup work, including
    /// the subentry scan of whatever `partition` already holds.
    pub fn with_schema(
        config: ServiceConfig,
        schema: Arc<SchemaRegistry>,
        partition: Arc<dyn Partition>,
    ) -> Result<Self> {
        let admin_dn = Dn::parse(&config.admin_dn)?.normalized(&schema)?;
        let diagnostics = Arc::new(Diagnostics::new(config.diagnostics_capacity));
        let admin_session = Session::new(
            Principal {
                dn: admin_dn.clone(),
                authentication: AuthenticationLevel::Strong,
            },
            admin_dn.clone(),
        );
        let subentries = Arc::new(SubentryInterceptor::new(
            Arc::clone(&schema),
            Arc::clone(&diagnostics),
            admin_session,
        ));
        let chain = InterceptorChain::new(
            Arc::clone(&schema),
            partition,
            vec![
                Arc::new(NormalizationInterceptor::new(Arc::clone(&diagnostics))),
                Arc::new(ExceptionInterceptor::new()),
                Arc::new(OperationalAttributeInterceptor::new()),
                subentries.clone(),
            ],
        );
        chain.init()?;
        info!(
            admin = %admin_dn,
            suffixes = ?config.suffixes,
            interceptors = ?chain.names(),
            "directory service started"
        );
        Ok(Self {
            config,
            schema,
            admin_dn,
            chain,
            subentries,
            diagnostics,
        })
    }

    /// Session of the administrator.
    pub fn admin_session(&self) -> Session {
        self.session_for(self.admin_dn.clone(), AuthenticationLevel::Strong)
    }

    /// Simple-bound session for `principal_dn`.
    pub fn session(&self, principal_dn: &str) -> Result<Session> {
        let dn = Dn::parse(principal_dn)?.normalized(&self.schema)?;
        Ok(self.session_for(dn, AuthenticationLevel::Simple))
    }

    /// Anonymous session.
    pub fn anonymous_session(&self) -> Session {
        Session::new(Principal::anonymous(), self.admin_dn.clone())
    }

    fn session_for(&self, dn: Dn, authentication: AuthenticationLevel) -> Session {
        Session::new(Principal { dn, authentication }, self.admin_dn.clone())
    }

    fn run(&self, session: &Session, controls: RequestControls, request: Request) -> Result<(OperationContext, Response)> {
        let mut ctx = OperationContext::new(session.clone(), request).with_controls(controls);
        let response = self.chain.execute(&mut ctx)?;
        Ok((ctx, response))
    }

    fn update(&self, session: &Session, request: Request) -> Result<()> {
        self.run(session, RequestControls::none(), request).map(|_| ())
    }

    /// Add an entry.
    pub fn add(&self, session: &Session, entry: Entry) -> Result<()> {
        self.update(session, Request::Add { entry })
    }

    /// Delete a leaf entry.
    pub fn delete(&self, session: &Session, dn: &str) -> Result<()> {
        self.update(session, Request::Delete { dn: Dn::parse(dn)? })
    }

    /// Apply modifications to an entry.
    pub fn modify(&self, session: &Session, dn: &str, modifications: Vec<Modification>) -> Result<()> {
        self.update(
            session,
            Request::Modify {
                dn: Dn::parse(dn)?,
                modifications,
            },
        )
    }

    /// Change the RDN of an entry in place.
    pub fn rename(&self, session: &Session, dn: &str, new_rdn: &str, delete_old_rdn: bool) -> Result<()> {
        self.update(
            session,
            Request::Rename {
                dn: Dn::parse(dn)?,
                new_rdn: Rdn::parse(new_rdn)?,
                delete_old_rdn,
            },
        )
    }

    /// Move an entry and its subtree under `new_superior`.
    pub fn move_entry(&self, session: &Session, dn: &str, new_superior: &str) -> Result<()> {
        self.update(
            session,
            Request::Move {
                dn: Dn::parse(dn)?,
                new_superior: Dn::parse(new_superior)?,
            },
        )
    }

    /// Move and rename in one operation.
    pub fn move_and_rename(
        &self,
        session: &Session,
        dn: &str,
        new_superior: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
    ) -> Result<()> {
        self.update(
            session,
            Request::MoveAndRename {
                dn: Dn::parse(dn)?,
                new_superior: Dn::parse(new_superior)?,
                new_rdn: Rdn::parse(new_rdn)?,
                delete_old_rdn,
            },
        )
    }

    /// Search and project the results onto the requested attributes.
    pub fn search(
        &self,
        session: &Session,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[&str],
        controls: RequestControls,
    ) -> Result<Vec<Entry>> {
        let request = Request::Search {
            base: Dn::parse(base)?,
            scope,
            filter: Filter::parse(filter)?,
            attributes: attributes.iter().map(|a| a.to_string()).collect(),
        };
        let (ctx, response) = self.run(session, controls, request)?;
        let selectors = match &ctx.request {
            Request::Search { attributes, .. } => attributes.clone(),
            _ => Vec::new(),
        };
        let mut entries = response.into_entries();
        for entry in &mut entries {
            self.project(entry, &selectors, !attributes.is_empty());
        }
        Ok(entries)
    }

    /// Immediate children of `base`, subentries excluded.
    pub fn list(&self, session: &Session, base: &str) -> Result<Vec<Entry>> {
        let (_, response) = self.run(
            session,
            RequestControls::none(),
            Request::List {
                base: Dn::parse(base)?,
            },
        )?;
        Ok(response.into_entries())
    }

    /// Fetch an entry with every attribute, operational ones included.
    pub fn lookup(&self, session: &Session, dn: &str) -> Result<Option<Entry>> {
        let (_, response) = self.run(
            session,
            RequestControls::none(),
            Request::Lookup { dn: Dn::parse(dn)? },
        )?;
        match response {
            Response::Entry(entry) => Ok(entry),
            other => Ok(other.into_entries().into_iter().next()),
        }
    }

    /// Add configured entries as the administrator, skipping those already
    /// present. Returns how many were created.
    pub fn seed(&self, entries: &[SeedEntry]) -> Result<usize> {
        let session = self.admin_session();
        let mut created = 0;
        for seed in entries {
            let entry = Entry::from_map(&seed.dn, &seed.attributes)?;
            match self.add(&session, entry) {
                Ok(()) => created += 1,
                Err(DirError::EntryAlreadyExists(dn)) => {
                    debug!(dn = %dn, "seed entry already present");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    /// Keep the attributes selected by `selectors` (already normalized).
    /// `explicit` tells an empty request apart from one whose ids were all
    /// unknown.
    fn project(&self, entry: &mut Entry, selectors: &[String], explicit: bool) {
        let all_user = (selectors.is_empty() && !explicit) || selectors.iter().any(|s| s == "*");
        let all_operational = selectors.iter().any(|s| s == "+");
        let schema = &self.schema;
        entry.retain(|attr| {
            let oid = attr.oid().unwrap_or(attr.id());
            if selectors.iter().any(|s| s == oid) {
                return true;
            }
            match schema.attribute_type(oid) {
                Some(at) if at.is_operational() => all_operational,
                _ => all_user,
            }
        });
    }

    /// The AP record for `dn` in `family`, if `dn` is one.
    pub fn administrative_point(&self, family: RoleFamily, dn: &str) -> Result<Option<AdministrativePoint>> {
        let dn = Dn::parse(dn)?.normalized(&self.schema)?;
        self.subentries.administrative_point(family, &dn)
    }

    /// Every registered subentry.
    pub fn registered_subentries(&self) -> Result<Vec<Subentry>> {
        self.subentries.subentries()
    }

    /// Evaluator used for selection decisions.
    pub fn evaluator(&self) -> &SubtreeEvaluator {
        self.subentries.evaluator()
    }

    /// The schema.
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    /// Diagnostic events.
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Counts from the startup scan.
    pub fn startup_report(&self) -> Result<StartupReport> {
        self.subentries.startup_report()
    }

    /// The dispatch chain.
    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    /// Configuration the service was started with.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}
