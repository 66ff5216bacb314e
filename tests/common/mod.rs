//! Common utilities for Thoth integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::Mutex;

use thoth::prelude::*;

/// One call observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Begin,
    Suspend(Option<TransactionHandle>),
    Resume(TransactionHandle),
    Commit,
    Rollback,
    SetRollbackOnly(TransactionHandle),
    Import(Xid),
    Enlist(String),
    Delist(String, EndFlag),
    Prepare(Xid),
    CommitXid(Xid, bool),
    RollbackXid(Xid),
    Forget(Xid),
    Recover(RecoverFlag),
}

// --- MockTransactionManager ---

/// A recording transaction manager and terminator. Thread association is kept
/// per OS thread, like a JTA manager.
pub struct MockTransactionManager {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    associations: Mutex<HashMap<ThreadId, TransactionHandle>>,
    imported: Mutex<HashMap<Xid, TransactionHandle>>,
    callbacks: Mutex<HashMap<TransactionHandle, Vec<CompletionCallback>>>,
    rollback_only: Mutex<HashSet<TransactionHandle>>,
    vote: Mutex<Vote>,
    commit_error: Mutex<Option<XaError>>,
    in_doubt: Mutex<Vec<Xid>>,
    refuse_enlist: AtomicBool,
    refuse_delist: AtomicBool,
    fail_forget: AtomicBool,
    fail_rollback: AtomicBool,
    fail_rollback_only: AtomicBool,
    one_phase_as_two_phase: AtomicBool,
    foreign_transaction: Mutex<Option<TransactionHandle>>,
}

impl MockTransactionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            associations: Mutex::new(HashMap::new()),
            imported: Mutex::new(HashMap::new()),
            callbacks: Mutex::new(HashMap::new()),
            rollback_only: Mutex::new(HashSet::new()),
            vote: Mutex::new(Vote::Ok),
            commit_error: Mutex::new(None),
            in_doubt: Mutex::new(Vec::new()),
            refuse_enlist: AtomicBool::new(false),
            refuse_delist: AtomicBool::new(false),
            fail_forget: AtomicBool::new(false),
            fail_rollback: AtomicBool::new(false),
            fail_rollback_only: AtomicBool::new(false),
            one_phase_as_two_phase: AtomicBool::new(true),
            foreign_transaction: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Position of the first call matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls.lock().iter().position(|c| predicate(c))
    }

    pub fn is_rollback_only(&self, handle: TransactionHandle) -> bool {
        self.rollback_only.lock().contains(&handle)
    }

    /// The transaction associated with the calling OS thread.
    pub fn associated(&self) -> Option<TransactionHandle> {
        self.associations.lock().get(&thread::current().id()).copied()
    }

    pub fn set_vote(&self, vote: Vote) {
        *self.vote.lock() = vote;
    }

    pub fn set_commit_error(&self, error: Option<XaError>) {
        *self.commit_error.lock() = error;
    }

    pub fn set_in_doubt(&self, xids: Vec<Xid>) {
        *self.in_doubt.lock() = xids;
    }

    pub fn refuse_enlist(&self, refuse: bool) {
        self.refuse_enlist.store(refuse, Ordering::SeqCst);
    }

    pub fn refuse_delist(&self, refuse: bool) {
        self.refuse_delist.store(refuse, Ordering::SeqCst);
    }

    pub fn fail_forget(&self, fail: bool) {
        self.fail_forget.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self, fail: bool) {
        self.fail_rollback.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollback_only(&self, fail: bool) {
        self.fail_rollback_only.store(fail, Ordering::SeqCst);
    }

    pub fn set_one_phase_as_two_phase(&self, enabled: bool) {
        self.one_phase_as_two_phase.store(enabled, Ordering::SeqCst);
    }

    /// Makes `transaction()` report `handle` regardless of association.
    pub fn pretend_associated(&self, handle: Option<TransactionHandle>) {
        *self.foreign_transaction.lock() = handle;
    }

    /// Simulates the manager finishing `xid` on its own, e.g. a timeout.
    pub fn complete_externally(&self, xid: &Xid) {
        self.fire_for_xid(xid);
    }

    /// Runs the completion callbacks registered for `handle`.
    pub fn complete_transaction(&self, handle: TransactionHandle) {
        self.fire_completion(handle);
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn next_handle(&self) -> TransactionHandle {
        TransactionHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn fire_completion(&self, handle: TransactionHandle) {
        let callbacks = self.callbacks.lock().remove(&handle).unwrap_or_default();
        for callback in callbacks {
            callback();
        }
    }

    fn fire_for_xid(&self, xid: &Xid) {
        let handle = self.imported.lock().get(xid).copied();
        if let Some(handle) = handle {
            self.fire_completion(handle);
        }
    }

    fn take_association(&self) -> Option<TransactionHandle> {
        self.associations.lock().remove(&thread::current().id())
    }
}

impl TransactionManager for MockTransactionManager {
    fn begin(&self) -> thoth::Result<()> {
        self.record(Call::Begin);
        let mut associations = self.associations.lock();
        let me = thread::current().id();
        if associations.contains_key(&me) {
            return Err(XaError::protocol("nested transactions are not supported"));
        }
        let handle = self.next_handle();
        associations.insert(me, handle);
        Ok(())
    }

    fn suspend(&self) -> thoth::Result<Option<TransactionHandle>> {
        let handle = self.take_association();
        self.record(Call::Suspend(handle));
        Ok(handle)
    }

    fn resume(&self, tx: TransactionHandle) -> thoth::Result<()> {
        self.record(Call::Resume(tx));
        let mut associations = self.associations.lock();
        let me = thread::current().id();
        if associations.contains_key(&me) {
            return Err(XaError::protocol("thread already associated"));
        }
        associations.insert(me, tx);
        Ok(())
    }

    fn commit(&self) -> thoth::Result<()> {
        self.record(Call::Commit);
        let handle = self
            .take_association()
            .ok_or_else(|| XaError::protocol("no transaction"))?;
        self.fire_completion(handle);
        if self.rollback_only.lock().contains(&handle) {
            return Err(XaError::rollback("transaction was marked rollback-only"));
        }
        Ok(())
    }

    fn rollback(&self) -> thoth::Result<()> {
        self.record(Call::Rollback);
        let handle = self
            .take_association()
            .ok_or_else(|| XaError::protocol("no transaction"))?;
        self.fire_completion(handle);
        Ok(())
    }

    fn set_rollback_only(&self) -> thoth::Result<()> {
        let handle = self
            .associated()
            .ok_or_else(|| XaError::protocol("no transaction"))?;
        if self.fail_rollback_only.load(Ordering::SeqCst) {
            return Err(XaError::new(XaCode::RmFail, "resource manager unreachable"));
        }
        self.record(Call::SetRollbackOnly(handle));
        self.rollback_only.lock().insert(handle);
        Ok(())
    }

    fn transaction(&self) -> thoth::Result<Option<TransactionHandle>> {
        if let Some(foreign) = *self.foreign_transaction.lock() {
            return Ok(Some(foreign));
        }
        Ok(self.associated())
    }

    fn import_transaction(
        &self,
        xid: &Xid,
        _timeout_seconds: Option<u32>,
    ) -> thoth::Result<TransactionHandle> {
        self.record(Call::Import(xid.clone()));
        let handle = self.next_handle();
        self.imported.lock().insert(xid.clone(), handle);
        Ok(handle)
    }

    fn register_completion(
        &self,
        tx: TransactionHandle,
        callback: CompletionCallback,
    ) -> thoth::Result<()> {
        self.callbacks.lock().entry(tx).or_default().push(callback);
        Ok(())
    }

    fn enlist_resource(&self, _tx: TransactionHandle, resource: &Resource) -> thoth::Result<bool> {
        self.record(Call::Enlist(resource.name().to_string()));
        Ok(!self.refuse_enlist.load(Ordering::SeqCst))
    }

    fn delist_resource(
        &self,
        _tx: TransactionHandle,
        resource: &Resource,
        flag: EndFlag,
    ) -> thoth::Result<bool> {
        self.record(Call::Delist(resource.name().to_string(), flag));
        Ok(!self.refuse_delist.load(Ordering::SeqCst))
    }
}

impl XaTerminator for MockTransactionManager {
    fn prepare(&self, xid: &Xid) -> thoth::Result<Vote> {
        self.record(Call::Prepare(xid.clone()));
        Ok(*self.vote.lock())
    }

    fn commit(&self, xid: &Xid, one_phase: bool) -> thoth::Result<()> {
        self.record(Call::CommitXid(xid.clone(), one_phase));
        self.fire_for_xid(xid);
        match self.commit_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn rollback(&self, xid: &Xid) -> thoth::Result<()> {
        self.record(Call::RollbackXid(xid.clone()));
        self.fire_for_xid(xid);
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(XaError::new(XaCode::RmFail, "resource manager unreachable"));
        }
        Ok(())
    }

    fn forget(&self, xid: &Xid) -> thoth::Result<()> {
        self.record(Call::Forget(xid.clone()));
        if self.fail_forget.load(Ordering::SeqCst) {
            return Err(XaError::new(XaCode::RmFail, "resource manager unreachable"));
        }
        Ok(())
    }

    fn recover(&self, flag: RecoverFlag) -> thoth::Result<Vec<Xid>> {
        self.record(Call::Recover(flag));
        Ok(self.in_doubt.lock().clone())
    }

    fn one_phase_as_two_phase(&self) -> bool {
        self.one_phase_as_two_phase.load(Ordering::SeqCst)
    }
}

// --- MockResource ---

/// A named resource that records the timeouts pushed to it.
#[derive(Debug)]
pub struct MockResource {
    name: String,
    supports_timeout: bool,
    timeouts: Mutex<Vec<u32>>,
}

impl MockResource {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            supports_timeout: true,
            timeouts: Mutex::new(Vec::new()),
        })
    }

    pub fn timeouts(&self) -> Vec<u32> {
        self.timeouts.lock().clone()
    }
}

impl XaResource for MockResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_transaction_timeout(&self, seconds: u32) -> thoth::Result<bool> {
        self.timeouts.lock().push(seconds);
        Ok(self.supports_timeout)
    }
}

// --- Helper Functions ---

/// Creates a coordinator wired to a fresh mock manager.
pub fn setup_coordinator() -> (Arc<MockTransactionManager>, TransactionCoordinator) {
    setup_coordinator_with(CoordinatorConfig::default())
}

pub fn setup_coordinator_with(
    config: CoordinatorConfig,
) -> (Arc<MockTransactionManager>, TransactionCoordinator) {
    let tm = MockTransactionManager::new();
    let coordinator = TransactionCoordinator::with_config(tm.clone(), tm.clone(), config);
    (tm, coordinator)
}

pub fn xid(gtrid: &str) -> Xid {
    Xid::new(0x1234, gtrid.as_bytes(), b"branch").unwrap()
}

pub fn resource(name: &str) -> (Arc<MockResource>, Resource) {
    let mock = MockResource::new(name);
    let shared: Resource = mock.clone();
    (mock, shared)
}
