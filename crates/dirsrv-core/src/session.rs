//! Principals, sessions and request controls.

use std::collections::BTreeSet;

use crate::dn::Dn;

/// OID of the subentries request control (RFC 3672).
pub const SUBENTRIES_CONTROL_OID: &str = "1.3.6.1.4.1.4203.1.10.1";

/// How the principal authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthenticationLevel {
    /// Anonymous bind.
    None,
    /// Simple bind.
    Simple,
    /// SASL or certificate bind.
    Strong,
}

/// The authenticated identity behind an operation.
#[derive(Clone, Debug)]
pub struct Principal {
    /// Normalized DN of the principal; the root DN for anonymous.
    pub dn: Dn,
    /// Authentication strength.
    pub authentication: AuthenticationLevel,
}

impl Principal {
    /// Anonymous principal.
    pub fn anonymous() -> Self {
        Self {
            dn: Dn::root(),
            authentication: AuthenticationLevel::None,
        }
    }
}

/// A principal plus what the server needs to authorize it.
#[derive(Clone, Debug)]
pub struct Session {
    principal: Principal,
    admin_dn: Dn,
}

impl Session {
    /// Session for `principal` on a server whose administrator is `admin_dn`.
    /// Both DNs must be normalized.
    pub fn new(principal: Principal, admin_dn: Dn) -> Self {
        Self {
            principal,
            admin_dn,
        }
    }

    /// The principal.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// True for the distinguished administrative principal.
    pub fn is_administrator(&self) -> bool {
        self.principal.authentication != AuthenticationLevel::None
            && self.principal.dn == self.admin_dn
    }
}

/// Controls attached to a request.
#[derive(Clone, Debug, Default)]
pub struct RequestControls {
    /// Subentries control: `Some(true)` shows only subentries,
    /// `Some(false)` or `None` hides them.
    pub subentries: Option<bool>,
    /// OIDs of other controls presented; recorded, not interpreted.
    pub others: BTreeSet<String>,
}

impl RequestControls {
    /// No controls.
    pub fn none() -> Self {
        Self::default()
    }

    /// The subentries control with the given visibility.
    pub fn subentries(visible: bool) -> Self {
        Self {
            subentries: Some(visible),
            others: BTreeSet::new(),
        }
    }

    /// Record a control by OID. The subentries control defaults to
    /// `visible = true` when given without a value.
    pub fn with(mut self, oid: &str) -> Self {
        if oid == SUBENTRIES_CONTROL_OID {
            self.subentries.get_or_insert(true);
        } else {
            self.others.insert(oid.to_string());
        }
        self
    }

    /// True when subentries should be returned instead of ordinary entries.
    pub fn subentries_visible(&self) -> bool {
        self.subentries.unwrap_or(false)
    }
}
