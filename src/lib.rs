//! Transaction coordination for federated query workers.
//!
//! Tracks which worker thread owns which unit of work, local, global (XA) or
//! request-scoped, and drives each to completion through an injected
//! transaction manager. The two-phase-commit algorithm itself lives in that
//! manager; this crate supplies the association bookkeeping, protocol flag
//! interpretation and XA failure classification around it.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod errors;
pub mod flags;
mod guard;
pub mod manager;
pub mod registry;
pub mod xid;

// Re-export key types and structs for easier access
pub use config::CoordinatorConfig;
pub use context::{ContextRef, Scope, TransactionContext, TransactionSummary};
pub use coordinator::TransactionCoordinator;
pub use errors::{Result, XaCode, XaError};
pub use flags::{EndFlag, RecoverFlag, StartFlag, Vote};
pub use manager::{
    CompletionCallback, Resource, TransactionHandle, TransactionManager, XaResource, XaTerminator,
};
pub use registry::TransactionRegistry;
pub use xid::Xid;

/// Thoth prelude
pub mod prelude {
    pub use crate::config::*;
    pub use crate::context::*;
    pub use crate::coordinator::*;
    pub use crate::errors::*;
    pub use crate::flags::*;
    pub use crate::manager::*;
    pub use crate::registry::*;
    pub use crate::xid::*;
}
