#![warn(missing_docs)]

//! Directory server core: the operation dispatch chain, DN and filter
//! normalization, subtree specifications, and the administrative point and
//! subentry engine that keeps subentry references on entries consistent.

pub mod admin;
pub mod backend;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod dn;
pub mod entry;
pub mod error;
pub mod filter;
pub mod interceptor;
pub mod schema;
pub mod service;
pub mod session;
pub mod subtree;

pub use config::{SeedEntry, ServiceConfig};
pub use diagnostics::{Diagnostic, DiagnosticEvent, Diagnostics};
pub use dn::{Dn, Rdn};
pub use entry::{Attribute, Entry, Modification, Value};
pub use error::{DirError, Result, ResultCode};
pub use service::DirectoryService;
pub use session::{RequestControls, Session};
