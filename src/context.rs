use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::manager::{Resource, TransactionHandle, same_resource};
use crate::xid::Xid;

/// How a unit of work is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// No transaction: before creation and after completion.
    None,
    /// Owned entirely by this process, driven by `begin`/`commit`/`rollback`.
    Local,
    /// Coordinated externally under a distributed id.
    Global,
    /// Bound to the lifetime of one query request.
    Request,
}

/// Association state of one unit of work.
///
/// The registry owns active contexts. Request-scoped callers may retain a
/// [`ContextRef`] across the request, which is why contexts are shared.
#[derive(Debug)]
pub struct TransactionContext {
    scope: Scope,
    xid: Option<Xid>,
    thread_id: Option<String>,
    transaction: Option<TransactionHandle>,
    resources: Vec<Resource>,
    suspended_by: Vec<String>,
    timeout_seconds: Option<u32>,
    created_at: Instant,
}

pub type ContextRef = Arc<Mutex<TransactionContext>>;

impl TransactionContext {
    /// Creates a `Scope::None` shell, optionally bound to a thread.
    pub fn new(thread_id: Option<String>) -> Self {
        Self {
            scope: Scope::None,
            xid: None,
            thread_id,
            transaction: None,
            resources: Vec::new(),
            suspended_by: Vec::new(),
            timeout_seconds: None,
            created_at: Instant::now(),
        }
    }

    pub fn shared(thread_id: Option<String>) -> ContextRef {
        Arc::new(Mutex::new(Self::new(thread_id)))
    }

    /// A global context reserved for `xid` and bound to `thread_id`. The
    /// transaction handle is attached once the import succeeds.
    pub(crate) fn global(xid: Xid, thread_id: &str, timeout_seconds: Option<u32>) -> Self {
        Self {
            scope: Scope::Global,
            xid: Some(xid),
            thread_id: Some(thread_id.to_string()),
            timeout_seconds,
            ..Self::new(None)
        }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_active(&self) -> bool {
        self.scope != Scope::None
    }

    pub fn xid(&self) -> Option<&Xid> {
        self.xid.as_ref()
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn transaction(&self) -> Option<TransactionHandle> {
        self.transaction
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn suspended_by(&self) -> &[String] {
        &self.suspended_by
    }

    pub fn timeout_seconds(&self) -> Option<u32> {
        self.timeout_seconds
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            thread_id: self.thread_id.clone(),
            xid: self.xid.clone(),
            scope: self.scope,
            age: self.age(),
            enlisted_resources: self.resources.len(),
            suspended_threads: self.suspended_by.len(),
        }
    }

    /// Starts a local or request scoped unit on an already suspended transaction.
    pub(crate) fn begin(
        &mut self,
        scope: Scope,
        transaction: TransactionHandle,
        timeout_seconds: Option<u32>,
    ) {
        debug_assert!(matches!(scope, Scope::Local | Scope::Request));
        self.scope = scope;
        self.transaction = Some(transaction);
        self.timeout_seconds = timeout_seconds;
        self.created_at = Instant::now();
    }

    pub(crate) fn attach(&mut self, transaction: TransactionHandle) {
        self.transaction = Some(transaction);
    }

    pub(crate) fn bind(&mut self, thread_id: &str) {
        self.thread_id = Some(thread_id.to_string());
    }

    pub(crate) fn unbind(&mut self) {
        self.thread_id = None;
    }

    pub(crate) fn suspend(&mut self, thread_id: &str) {
        if !self.suspended_by.iter().any(|t| t == thread_id) {
            self.suspended_by.push(thread_id.to_string());
        }
    }

    /// Clears the suspension `thread_id` is resuming. A thread that never
    /// suspended may take over the oldest suspension, but only while no thread
    /// owns the branch.
    pub(crate) fn resume(&mut self, thread_id: &str) -> bool {
        if let Some(pos) = self.suspended_by.iter().position(|t| t == thread_id) {
            self.suspended_by.remove(pos);
            return true;
        }
        if self.thread_id.is_none() && !self.suspended_by.is_empty() {
            self.suspended_by.remove(0);
            return true;
        }
        false
    }

    /// Drops any suspension `thread_id` holds; a joining thread becomes the
    /// owner and cannot stay suspended.
    pub(crate) fn join(&mut self, thread_id: &str) {
        self.suspended_by.retain(|t| t != thread_id);
    }

    pub(crate) fn add_resource(&mut self, resource: Resource) {
        if !self.resources.iter().any(|r| same_resource(r, &resource)) {
            self.resources.push(resource);
        }
    }

    pub(crate) fn remove_resource(&mut self, resource: &Resource) -> bool {
        let before = self.resources.len();
        self.resources.retain(|r| !same_resource(r, resource));
        before != self.resources.len()
    }

    /// Returns the context to `Scope::None` once its transaction has finished.
    /// The thread id is kept so a retained request context can still be
    /// looked up by owner.
    pub(crate) fn complete(&mut self) {
        self.scope = Scope::None;
        self.xid = None;
        self.transaction = None;
        self.resources.clear();
        self.suspended_by.clear();
    }
}

/// Point-in-time view of an active context for admin listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionSummary {
    pub thread_id: Option<String>,
    pub xid: Option<Xid>,
    pub scope: Scope,
    pub age: Duration,
    pub enlisted_resources: usize,
    pub suspended_threads: usize,
}
