use std::fmt;
use std::sync::Arc;

use crate::errors::Result;
use crate::flags::{EndFlag, RecoverFlag, Vote};
use crate::xid::Xid;

/// Opaque handle naming an in-flight transaction inside the transaction manager.
///
/// The coordinator never interprets the value; it only hands it back to the
/// manager to resume, enlist or delist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(u64);

impl TransactionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Invoked by the transaction manager once a transaction has finished, however
/// it finished.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// A resource manager connection that can take part in a transaction.
///
/// Implementations must be `Send` and `Sync`; the coordinator shares them
/// between the context that enlisted them and the transaction manager.
pub trait XaResource: Send + Sync + fmt::Debug {
    /// Name used in log lines and admin listings.
    fn name(&self) -> &str;

    /// Sets the branch timeout. Returns `false` if the resource does not
    /// support timeouts.
    fn set_transaction_timeout(&self, seconds: u32) -> Result<bool>;
}

/// Shared resource handle as stored in a context's enlistment list.
pub type Resource = Arc<dyn XaResource>;

/// Resource identity is the identity of the shared allocation.
pub fn same_resource(a: &Resource, b: &Resource) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// The single-resource transaction manager the coordinator drives.
///
/// Association methods (`begin`, `suspend`, `resume`, `commit`, `rollback`,
/// `set_rollback_only`, `transaction`) act on the transaction bound to the
/// calling OS thread, the way a JTA-style manager does. Enlistment and
/// completion registration address a transaction explicitly by handle.
///
/// Calls may block on network I/O; the coordinator never holds a lock while
/// calling into this trait.
pub trait TransactionManager: Send + Sync {
    /// Begins a transaction and associates it with the calling thread.
    fn begin(&self) -> Result<()>;

    /// Detaches the calling thread's transaction and returns its handle, or
    /// `None` if the thread had no transaction.
    fn suspend(&self) -> Result<Option<TransactionHandle>>;

    /// Re-associates `tx` with the calling thread.
    fn resume(&self, tx: TransactionHandle) -> Result<()>;

    /// Commits the calling thread's transaction and disassociates it.
    fn commit(&self) -> Result<()>;

    /// Rolls back the calling thread's transaction and disassociates it.
    fn rollback(&self) -> Result<()>;

    /// Marks the calling thread's transaction so it can only roll back.
    fn set_rollback_only(&self) -> Result<()>;

    /// Returns the transaction associated with the calling thread.
    fn transaction(&self) -> Result<Option<TransactionHandle>>;

    /// Imports a transaction branch that is coordinated externally under `xid`.
    /// The imported transaction is not associated with any thread.
    fn import_transaction(
        &self,
        xid: &Xid,
        timeout_seconds: Option<u32>,
    ) -> Result<TransactionHandle>;

    /// Registers `callback` to run when `tx` completes.
    fn register_completion(
        &self,
        tx: TransactionHandle,
        callback: CompletionCallback,
    ) -> Result<()>;

    /// Enlists `resource` in `tx`. `Ok(false)` means the manager refused it.
    fn enlist_resource(&self, tx: TransactionHandle, resource: &Resource) -> Result<bool>;

    /// Delists `resource` from `tx`. `Ok(false)` means the manager refused it.
    fn delist_resource(
        &self,
        tx: TransactionHandle,
        resource: &Resource,
        flag: EndFlag,
    ) -> Result<bool>;
}

/// The XA terminator side of the transaction manager: completion and recovery
/// of imported branches by distributed id.
pub trait XaTerminator: Send + Sync {
    fn prepare(&self, xid: &Xid) -> Result<Vote>;

    /// Heuristic outcomes are reported as errors carrying a heuristic code.
    fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()>;

    fn rollback(&self, xid: &Xid) -> Result<()>;

    /// Discards the heuristic outcome recorded for `xid`.
    fn forget(&self, xid: &Xid) -> Result<()>;

    /// Returns the branches the manager holds in doubt.
    fn recover(&self, flag: RecoverFlag) -> Result<Vec<Xid>>;

    /// When `true`, a one-phase commit request is executed as prepare followed
    /// by a two-phase commit. Managers whose synchronization callbacks do not
    /// fire on the one-phase path need this.
    fn one_phase_as_two_phase(&self) -> bool {
        true
    }
}
