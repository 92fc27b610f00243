//! Error types for directory operations.
//!
//! Every failure raised by the core carries a distinct variant so callers can
//! tell an authorization refusal apart from a policy violation or a syntax
//! error. `DirError::result_code` maps each variant onto the LDAP result code
//! a protocol front end would send back.

use thiserror::Error;

/// LDAP result codes (RFC 4511 section 4.1.9) surfaced by the core.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// success (0)
    Success,
    /// operationsError (1)
    OperationsError,
    /// noSuchAttribute (16)
    NoSuchAttribute,
    /// undefinedAttributeType (17)
    UndefinedAttributeType,
    /// constraintViolation (19)
    ConstraintViolation,
    /// invalidAttributeSyntax (21)
    InvalidAttributeSyntax,
    /// noSuchObject (32)
    NoSuchObject,
    /// invalidDNSyntax (34)
    InvalidDnSyntax,
    /// unwillingToPerform (53)
    UnwillingToPerform,
    /// namingViolation (64)
    NamingViolation,
    /// objectClassViolation (65)
    ObjectClassViolation,
    /// notAllowedOnNonLeaf (66)
    NotAllowedOnNonLeaf,
    /// notAllowedOnRDN (67)
    NotAllowedOnRdn,
    /// entryAlreadyExists (68)
    EntryAlreadyExists,
    /// other (80)
    Other,
    /// filterError (87)
    FilterError,
}

impl ResultCode {
    /// Numeric value as carried in an LDAPResult.
    pub fn code(self) -> u32 {
        match self {
            ResultCode::Success => 0,
            ResultCode::OperationsError => 1,
            ResultCode::NoSuchAttribute => 16,
            ResultCode::UndefinedAttributeType => 17,
            ResultCode::ConstraintViolation => 19,
            ResultCode::InvalidAttributeSyntax => 21,
            ResultCode::NoSuchObject => 32,
            ResultCode::InvalidDnSyntax => 34,
            ResultCode::UnwillingToPerform => 53,
            ResultCode::NamingViolation => 64,
            ResultCode::ObjectClassViolation => 65,
            ResultCode::NotAllowedOnNonLeaf => 66,
            ResultCode::NotAllowedOnRdn => 67,
            ResultCode::EntryAlreadyExists => 68,
            ResultCode::Other => 80,
            ResultCode::FilterError => 87,
        }
    }
}

/// Errors raised while processing a directory operation.
#[derive(Debug, Error)]
pub enum DirError {
    /// A non-administrative principal tried to mutate an administrative
    /// point or a subentry.
    #[error("insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    /// The operation would leave the administrative model structurally
    /// invalid (bad role mix, orphaned inner area, AP under a subentry...).
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// An attribute value does not conform to its syntax.
    #[error("invalid attribute syntax: {0}")]
    InvalidAttributeSyntax(String),

    /// A distinguished name could not be parsed.
    #[error("invalid DN syntax: {0}")]
    InvalidDnSyntax(String),

    /// A search filter could not be parsed.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The attribute description is not registered in the schema.
    #[error("undefined attribute type: {0}")]
    UndefinedAttributeType(String),

    /// A schema rule was violated.
    #[error("schema violation ({code:?}): {message}")]
    SchemaViolation {
        /// The result code that identifies the rule.
        code: ResultCode,
        /// Human readable detail.
        message: String,
    },

    /// The named entry does not exist.
    #[error("no such object: {0}")]
    NoSuchObject(String),

    /// The named entry already exists.
    #[error("entry already exists: {0}")]
    EntryAlreadyExists(String),

    /// The entry still has subordinates.
    #[error("not allowed on non-leaf entry: {0}")]
    NotAllowedOnNonLeaf(String),

    /// The server refuses the request for a reason not covered above.
    #[error("unwilling to perform: {0}")]
    UnwillingToPerform(String),

    /// A secondary modification repairing derived operational attributes
    /// failed after the primary operation had already been applied.
    #[error("consistency repair failed on {dn}: {source}")]
    ConsistencyRepair {
        /// Entry whose operational attributes could not be updated.
        dn: String,
        /// The underlying failure.
        #[source]
        source: Box<DirError>,
    },

    /// Storage backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// A shared lock was poisoned by a panicking thread.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DirError {
    /// The LDAP result code a front end would report for this error.
    pub fn result_code(&self) -> ResultCode {
        match self {
            DirError::InsufficientPrivilege(_) => ResultCode::UnwillingToPerform,
            DirError::PolicyViolation(_) => ResultCode::UnwillingToPerform,
            DirError::InvalidAttributeSyntax(_) => ResultCode::InvalidAttributeSyntax,
            DirError::InvalidDnSyntax(_) => ResultCode::InvalidDnSyntax,
            DirError::InvalidFilter(_) => ResultCode::FilterError,
            DirError::UndefinedAttributeType(_) => ResultCode::UndefinedAttributeType,
            DirError::SchemaViolation { code, .. } => *code,
            DirError::NoSuchObject(_) => ResultCode::NoSuchObject,
            DirError::EntryAlreadyExists(_) => ResultCode::EntryAlreadyExists,
            DirError::NotAllowedOnNonLeaf(_) => ResultCode::NotAllowedOnNonLeaf,
            DirError::UnwillingToPerform(_) => ResultCode::UnwillingToPerform,
            DirError::ConsistencyRepair { .. } => ResultCode::OperationsError,
            DirError::Backend(_) | DirError::LockPoisoned(_) | DirError::Io(_) => {
                ResultCode::Other
            }
        }
    }

    /// Shorthand for a backend failure built from any displayable error.
    pub fn backend(e: impl std::fmt::Display) -> Self {
        DirError::Backend(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DirError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_and_policy_share_code_but_not_variant() {
        let auth = DirError::InsufficientPrivilege("add subentry".into());
        let policy = DirError::PolicyViolation("orphaned inner area".into());
        assert_eq!(auth.result_code(), ResultCode::UnwillingToPerform);
        assert_eq!(policy.result_code(), ResultCode::UnwillingToPerform);
        assert!(matches!(auth, DirError::InsufficientPrivilege(_)));
        assert!(matches!(policy, DirError::PolicyViolation(_)));
    }

    #[test]
    fn test_schema_violation_carries_code() {
        let err = DirError::SchemaViolation {
            code: ResultCode::NotAllowedOnRdn,
            message: "administrative point below".into(),
        };
        assert_eq!(err.result_code().code(), 67);
        assert!(err.to_string().contains("administrative point below"));
    }

    #[test]
    fn test_repair_error_keeps_source() {
        let err = DirError::ConsistencyRepair {
            dn: "ou=users".into(),
            source: Box::new(DirError::NoSuchObject("ou=users".into())),
        };
        assert_eq!(err.result_code(), ResultCode::OperationsError);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("no such object: ou=users"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DirError = io.into();
        assert_eq!(err.result_code(), ResultCode::Other);
    }
}
