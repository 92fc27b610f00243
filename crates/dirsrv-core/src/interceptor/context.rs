//! The value object that travels down the interceptor chain.

use std::collections::BTreeSet;

use crate::backend::SearchScope;
use crate::dn::{Dn, Rdn};
use crate::entry::{Entry, Modification};
use crate::error::{DirError, Result};
use crate::filter::Filter;
use crate::session::{RequestControls, Session};

/// Operation discriminant, handy for logging and dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// add
    Add,
    /// delete
    Delete,
    /// modify
    Modify,
    /// move
    Move,
    /// rename
    Rename,
    /// moveAndRename
    MoveAndRename,
    /// search
    Search,
    /// list (one-level search for every entry)
    List,
    /// lookup of a single entry
    Lookup,
}

/// The operation being processed.
#[derive(Clone, Debug)]
pub enum Request {
    /// Add a new entry.
    Add {
        /// The entry.
        entry: Entry,
    },
    /// Delete a leaf entry.
    Delete {
        /// Target.
        dn: Dn,
    },
    /// Change attributes.
    Modify {
        /// Target.
        dn: Dn,
        /// Changes, applied in order.
        modifications: Vec<Modification>,
    },
    /// Move below a new superior, keeping the RDN.
    Move {
        /// Target.
        dn: Dn,
        /// New parent.
        new_superior: Dn,
    },
    /// Change the RDN in place.
    Rename {
        /// Target.
        dn: Dn,
        /// New RDN.
        new_rdn: Rdn,
        /// Drop the old RDN values from the entry.
        delete_old_rdn: bool,
    },
    /// Move and change the RDN.
    MoveAndRename {
        /// Target.
        dn: Dn,
        /// New parent.
        new_superior: Dn,
        /// New RDN.
        new_rdn: Rdn,
        /// Drop the old RDN values from the entry.
        delete_old_rdn: bool,
    },
    /// Search.
    Search {
        /// Base.
        base: Dn,
        /// Scope.
        scope: SearchScope,
        /// Filter.
        filter: Filter,
        /// Requested attributes; empty means all user attributes.
        attributes: Vec<String>,
    },
    /// Every immediate child of `base`.
    List {
        /// Base.
        base: Dn,
    },
    /// Read one entry with every attribute.
    Lookup {
        /// Target.
        dn: Dn,
    },
}

impl Request {
    /// Discriminant.
    pub fn kind(&self) -> OperationKind {
        match self {
            Request::Add { .. } => OperationKind::Add,
            Request::Delete { .. } => OperationKind::Delete,
            Request::Modify { .. } => OperationKind::Modify,
            Request::Move { .. } => OperationKind::Move,
            Request::Rename { .. } => OperationKind::Rename,
            Request::MoveAndRename { .. } => OperationKind::MoveAndRename,
            Request::Search { .. } => OperationKind::Search,
            Request::List { .. } => OperationKind::List,
            Request::Lookup { .. } => OperationKind::Lookup,
        }
    }

    /// Target entry name (search base for searches).
    pub fn dn(&self) -> &Dn {
        match self {
            Request::Add { entry } => entry.dn(),
            Request::Delete { dn }
            | Request::Modify { dn, .. }
            | Request::Move { dn, .. }
            | Request::Rename { dn, .. }
            | Request::MoveAndRename { dn, .. }
            | Request::Lookup { dn } => dn,
            Request::Search { base, .. } | Request::List { base } => base,
        }
    }

    /// Name of the target after a move or rename; `None` for other kinds.
    pub fn new_dn(&self) -> Result<Option<Dn>> {
        let dn = match self {
            Request::Move { dn, new_superior } => {
                let rdn = dn.rdn().ok_or_else(|| {
                    DirError::UnwillingToPerform("cannot move the root DSE".to_string())
                })?;
                new_superior.child(rdn.clone())
            }
            Request::Rename { dn, new_rdn, .. } => dn.parent().child(new_rdn.clone()),
            Request::MoveAndRename {
                new_superior,
                new_rdn,
                ..
            } => new_superior.child(new_rdn.clone()),
            _ => return Ok(None),
        };
        Ok(Some(dn))
    }

    /// True for the three relocating operations.
    pub fn is_relocation(&self) -> bool {
        matches!(
            self.kind(),
            OperationKind::Move | OperationKind::Rename | OperationKind::MoveAndRename
        )
    }

    /// Whether a relocation drops the old RDN values.
    pub fn delete_old_rdn(&self) -> bool {
        match self {
            Request::Rename { delete_old_rdn, .. }
            | Request::MoveAndRename { delete_old_rdn, .. } => *delete_old_rdn,
            _ => false,
        }
    }
}

/// Interceptors to skip for one operation.
#[derive(Clone, Debug, Default)]
pub struct Bypass {
    only: Option<BTreeSet<&'static str>>,
    skip: BTreeSet<&'static str>,
}

impl Bypass {
    /// Run every interceptor.
    pub fn none() -> Self {
        Self::default()
    }

    /// Run only normalization and exception checks. Used for the secondary
    /// operations that repair derived state.
    pub fn core_only() -> Self {
        Self {
            only: Some(
                [super::NORMALIZATION, super::EXCEPTION]
                    .into_iter()
                    .collect(),
            ),
            skip: BTreeSet::new(),
        }
    }

    /// Skip the named interceptors.
    pub fn skipping(names: &[&'static str]) -> Self {
        Self {
            only: None,
            skip: names.iter().copied().collect(),
        }
    }

    /// True if `name` must not run.
    pub fn is_bypassed(&self, name: &str) -> bool {
        self.skip.contains(name) || self.only.as_ref().is_some_and(|only| !only.contains(name))
    }
}

/// Everything an interceptor sees about the current operation.
#[derive(Clone, Debug)]
pub struct OperationContext {
    /// Who is asking.
    pub session: Session,
    /// Request controls.
    pub controls: RequestControls,
    /// Interceptors to skip.
    pub bypass: Bypass,
    /// The operation.
    pub request: Request,
    /// Target entry before the operation, loaded by the exception
    /// interceptor.
    pub original_entry: Option<Entry>,
    /// Target entry after a modify or relocation, set by the partition
    /// dispatch.
    pub altered_entry: Option<Entry>,
}

impl OperationContext {
    /// A context with no controls and no bypass.
    pub fn new(session: Session, request: Request) -> Self {
        Self {
            session,
            controls: RequestControls::default(),
            bypass: Bypass::none(),
            request,
            original_entry: None,
            altered_entry: None,
        }
    }

    /// Builder: attach controls.
    pub fn with_controls(mut self, controls: RequestControls) -> Self {
        self.controls = controls;
        self
    }

    /// Builder: set the bypass set.
    pub fn with_bypass(mut self, bypass: Bypass) -> Self {
        self.bypass = bypass;
        self
    }
}
