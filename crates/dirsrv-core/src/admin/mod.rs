//! The administrative model: roles, per-family AP caches, the subentry
//! registry and the operational attribute builders used to keep entries
//! consistent with them.

pub mod cache;
pub mod opattrs;
pub mod registry;
pub mod role;

pub use cache::{
    AdminPointCaches, AdministrativePoint, ApCache, SeqNumberAllocator, UNINITIALIZED_SEQ_NUMBER,
};
pub use registry::{Subentry, SubentryRegistry};
pub use role::{AdministrativeRole, AreaKind, RoleFamily};
