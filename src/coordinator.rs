use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::config::CoordinatorConfig;
use crate::context::{ContextRef, Scope, TransactionContext, TransactionSummary};
use crate::errors::{Result, XaCode, XaError};
use crate::flags::{EndFlag, RecoverFlag, StartFlag, Vote};
use crate::guard::{ResumeGuard, finally};
use crate::manager::{Resource, TransactionHandle, TransactionManager, XaTerminator};
use crate::registry::TransactionRegistry;
use crate::xid::Xid;

/// The protocol surface for local, global and request-scoped transactions.
///
/// Every method runs on the caller's thread. The coordinator validates the
/// request against the registry, delegates the distributed work to the
/// transaction manager and terminator, then records the outcome in the
/// registry. Validation failures are raised before any collaborator call and
/// leave all state untouched. Terminal operations drop their registry entry
/// on every exit path.
pub struct TransactionCoordinator {
    registry: Arc<TransactionRegistry>,
    tm: Arc<dyn TransactionManager>,
    terminator: Arc<dyn XaTerminator>,
    config: CoordinatorConfig,
}

impl TransactionCoordinator {
    pub fn new(tm: Arc<dyn TransactionManager>, terminator: Arc<dyn XaTerminator>) -> Self {
        Self::with_config(tm, terminator, CoordinatorConfig::default())
    }

    pub fn with_config(
        tm: Arc<dyn TransactionManager>,
        terminator: Arc<dyn XaTerminator>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry: Arc::new(TransactionRegistry::new()),
            tm,
            terminator,
            config,
        }
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn transaction_for_thread(&self, thread_id: &str) -> Option<ContextRef> {
        self.registry.get_by_thread(thread_id)
    }

    pub fn transaction_for_xid(&self, xid: &Xid) -> Option<ContextRef> {
        self.registry.get_by_xid(xid)
    }

    /// Returns the context for `thread_id`, creating an inactive shell if
    /// needed. Request-scoped callers keep this for the life of the request.
    pub fn context(&self, thread_id: &str) -> ContextRef {
        self.registry.get_or_create(thread_id)
    }

    /// Snapshot of every active transaction.
    pub fn transactions(&self) -> Vec<TransactionSummary> {
        self.registry
            .contexts()
            .iter()
            .filter_map(|c| {
                let guard = c.lock();
                guard.is_active().then(|| guard.summary())
            })
            .collect()
    }

    // ---- global transactions ----

    /// Associates `thread_id` with the branch `xid`.
    ///
    /// # Errors
    ///
    /// * `XAER_PROTO` if the thread already has an active transaction, or if a
    ///   resume does not match a suspension.
    /// * `XAER_DUPID` if `StartFlag::NoFlags` names a branch that exists.
    /// * `XAER_INVAL` if `Join`/`Resume` names an unknown branch.
    pub fn start(
        &self,
        thread_id: &str,
        xid: &Xid,
        flag: StartFlag,
        timeout_seconds: Option<u32>,
    ) -> Result<()> {
        match flag {
            StartFlag::NoFlags => self.start_branch(thread_id, xid, timeout_seconds),
            StartFlag::Join | StartFlag::Resume => self.associate_branch(thread_id, xid, flag),
        }
    }

    fn start_branch(&self, thread_id: &str, xid: &Xid, timeout_seconds: Option<u32>) -> Result<()> {
        self.ensure_thread_free(thread_id)?;
        if self.registry.get_by_xid(xid).is_some() {
            return Err(XaError::duplicate_id(format!(
                "global transaction {} already exists",
                xid
            )));
        }
        self.check_capacity()?;

        let context: ContextRef = Arc::new(Mutex::new(TransactionContext::global(
            xid.clone(),
            thread_id,
            timeout_seconds,
        )));
        if !self.registry.add_if_absent(xid, &context) {
            return Err(XaError::duplicate_id(format!(
                "global transaction {} already exists",
                xid
            )));
        }
        let reservation = finally(|| {
            self.registry.remove_xid(xid);
        });

        let handle = self.tm.import_transaction(xid, timeout_seconds)?;
        let registry = Arc::clone(&self.registry);
        let completed = Arc::downgrade(&context);
        let label = xid.clone();
        self.tm.register_completion(
            handle,
            Box::new(move || {
                if let Some(context) = completed.upgrade() {
                    registry.remove(&context);
                    debug!("Global transaction {} completed", label);
                }
            }),
        )?;
        context.lock().attach(handle);
        reservation.dismiss();

        self.registry.add(&context);
        debug!(
            "Thread {} started global transaction {} as {}",
            thread_id, xid, handle
        );
        Ok(())
    }

    fn associate_branch(&self, thread_id: &str, xid: &Xid, flag: StartFlag) -> Result<()> {
        let context = self.global_context(xid)?;
        self.ensure_thread_free(thread_id)?;
        {
            let mut guard = context.lock();
            if let Some(owner) = guard.thread_id() {
                return Err(XaError::protocol(format!(
                    "global transaction {} is associated with thread {}",
                    xid, owner
                )));
            }
            match flag {
                StartFlag::Resume if !guard.resume(thread_id) => {
                    return Err(XaError::protocol(format!(
                        "thread {} has no suspended association with {}",
                        thread_id, xid
                    )));
                }
                StartFlag::Join => guard.join(thread_id),
                _ => {}
            }
            guard.bind(thread_id);
        }
        self.registry.add(&context);
        debug!("Thread {} {:?} global transaction {}", thread_id, flag, xid);
        Ok(())
    }

    /// Ends the association of `thread_id` with `xid`.
    ///
    /// The thread is unbound on every exit path. `EndFlag::Fail` marks the
    /// branch rollback-only and then reports `XA_RBROLLBACK` even though the
    /// unbind succeeded.
    pub fn end(&self, thread_id: &str, xid: &Xid, flag: EndFlag) -> Result<()> {
        let context = self.global_context(xid)?;
        let handle = {
            let guard = context.lock();
            if guard.thread_id() != Some(thread_id) {
                return Err(XaError::protocol(format!(
                    "wrong transaction: thread {} is not associated with {}",
                    thread_id, xid
                )));
            }
            guard.transaction()
        };
        let _unbind = finally(|| {
            context.lock().unbind();
            self.registry.unbind_thread(thread_id, &context);
        });

        match flag {
            EndFlag::Suspend => {
                context.lock().suspend(thread_id);
                debug!("Thread {} suspended global transaction {}", thread_id, xid);
            }
            EndFlag::Success => {
                debug!("Thread {} ended global transaction {}", thread_id, xid);
            }
            EndFlag::Fail => {
                if let Some(handle) = handle {
                    if let Err(e) = self.mark_rollback_only(handle) {
                        warn!("Failed to mark {} rollback-only: {}", xid, e);
                    }
                }
                debug!(
                    "Thread {} failed global transaction {}; marked rollback-only",
                    thread_id, xid
                );
                return Err(XaError::rollback(format!(
                    "global transaction {} marked rollback-only",
                    xid
                )));
            }
        }
        Ok(())
    }

    /// Runs phase one for `xid` and returns the manager's vote.
    ///
    /// All enlisted resources are delisted first; a failed delist fails the
    /// prepare.
    pub fn prepare(&self, thread_id: &str, xid: &Xid) -> Result<Vote> {
        let context = self.global_context(xid)?;
        let handle = {
            let guard = context.lock();
            if !guard.suspended_by().is_empty() {
                return Err(XaError::protocol(format!(
                    "suspended branches exist for {}",
                    xid
                )));
            }
            guard.transaction()
        };
        let handle = handle.ok_or_else(|| missing_handle(xid))?;

        let resumed = ResumeGuard::resume(&*self.tm, handle)?;
        self.delist_all(&context, handle)?;
        let vote = self.terminator.prepare(xid)?;
        resumed.suspend()?;
        debug!(
            "Thread {} prepared global transaction {}: {:?}",
            thread_id, xid, vote
        );
        Ok(vote)
    }

    /// Commits `xid`. The context is removed whatever the outcome; heuristic
    /// outcomes propagate unchanged and are left for `forget`.
    pub fn commit(&self, thread_id: &str, xid: &Xid, one_phase: bool) -> Result<()> {
        let context = self.global_context(xid)?;
        let _cleanup = finally(|| self.retire(&context));

        if one_phase && self.terminator.one_phase_as_two_phase() {
            if self.prepare(thread_id, xid)? == Vote::ReadOnly {
                debug!("Global transaction {} was read-only; nothing to commit", xid);
                return Ok(());
            }
            self.terminator.commit(xid, false)?;
        } else {
            self.delist_remaining(&context, xid)?;
            self.terminator.commit(xid, one_phase)?;
        }
        debug!("Thread {} committed global transaction {}", thread_id, xid);
        Ok(())
    }

    /// Rolls back `xid`. The context is removed whatever the outcome.
    pub fn rollback(&self, thread_id: &str, xid: &Xid) -> Result<()> {
        let context = self.global_context(xid)?;
        self.rollback_branch(&context, xid)?;
        debug!("Thread {} rolled back global transaction {}", thread_id, xid);
        Ok(())
    }

    /// Discards the heuristic outcome for `xid`. Local state for `xid` is
    /// dropped even if the terminator fails.
    pub fn forget(&self, xid: &Xid) -> Result<()> {
        let _cleanup = finally(|| {
            if let Some(context) = self.registry.remove_xid(xid) {
                self.retire(&context);
            }
        });
        if let Err(e) = self.terminator.forget(xid) {
            warn!("Forget of {} failed, dropping local state anyway: {}", xid, e);
            return Err(e);
        }
        debug!("Forgot global transaction {}", xid);
        Ok(())
    }

    /// Returns the branches the terminator holds in doubt.
    pub fn recover(&self, flag: RecoverFlag) -> Result<Vec<Xid>> {
        self.terminator.recover(flag)
    }

    // ---- local transactions ----

    /// Begins a local transaction for `thread_id`. The transaction is left
    /// suspended; later operations resume it explicitly.
    pub fn begin(&self, thread_id: &str) -> Result<ContextRef> {
        self.ensure_thread_free(thread_id)?;
        self.check_capacity()?;
        let handle = self.begin_suspended()?;
        let context = self.registry.get_or_create(thread_id);
        context
            .lock()
            .begin(Scope::Local, handle, self.config.default_timeout_seconds);
        debug!("Thread {} began local transaction {}", thread_id, handle);
        Ok(context)
    }

    pub fn commit_local(&self, thread_id: &str) -> Result<()> {
        let context = self.local_context(thread_id)?;
        self.complete(&context, true)?;
        debug!("Thread {} committed local transaction", thread_id);
        Ok(())
    }

    pub fn rollback_local(&self, thread_id: &str) -> Result<()> {
        let context = self.local_context(thread_id)?;
        self.complete(&context, false)?;
        debug!("Thread {} rolled back local transaction", thread_id);
        Ok(())
    }

    // ---- request-scoped transactions ----

    /// Begins a request-scoped transaction on a context obtained from
    /// [`TransactionCoordinator::context`].
    pub fn start_request(&self, context: &ContextRef) -> Result<()> {
        if context.lock().scope() != Scope::None {
            return Err(XaError::protocol(
                "request transaction started on an active context",
            ));
        }
        self.check_capacity()?;
        let handle = self.begin_suspended()?;
        context
            .lock()
            .begin(Scope::Request, handle, self.config.default_timeout_seconds);
        self.registry.add(context);
        debug!("Began request transaction {}", handle);
        Ok(())
    }

    /// Commits a request-scoped transaction. A second call after the first
    /// completed is a no-op.
    pub fn commit_request(&self, context: &ContextRef) -> Result<()> {
        let thread_id = context.lock().thread_id().map(str::to_string);
        let current = thread_id
            .as_deref()
            .and_then(|t| self.registry.get_by_thread(t));
        let live = current.is_some_and(|c| Arc::ptr_eq(&c, context) && c.lock().is_active());
        if !live {
            debug!(
                "Request transaction for thread {:?} already completed",
                thread_id
            );
            return Ok(());
        }
        self.complete(context, true)?;
        debug!("Committed request transaction for thread {:?}", thread_id);
        Ok(())
    }

    pub fn rollback_request(&self, context: &ContextRef) -> Result<()> {
        self.complete(context, false)?;
        debug!("Rolled back request transaction");
        Ok(())
    }

    /// Enlists `resource` in the context's transaction, propagating the
    /// context timeout first. A refused enlistment is backed out with a
    /// `TMFAIL` delist before `XAER_RMERR` is reported.
    pub fn enlist(&self, context: &ContextRef, resource: Resource) -> Result<()> {
        let (handle, timeout) = {
            let guard = context.lock();
            (guard.transaction(), guard.timeout_seconds())
        };
        let handle = handle.ok_or_else(|| XaError::protocol("no active transaction to enlist in"))?;

        if let Some(seconds) = timeout {
            if !resource.set_transaction_timeout(seconds)? {
                debug!("Resource {} ignores transaction timeouts", resource.name());
            }
        }

        let enlisted = match self.tm.enlist_resource(handle, &resource) {
            Ok(enlisted) => enlisted,
            Err(e) => {
                self.back_out_enlist(handle, &resource);
                return Err(e);
            }
        };
        if !enlisted {
            self.back_out_enlist(handle, &resource);
            return Err(XaError::resource(format!(
                "failed to enlist {} in {}",
                resource.name(),
                handle
            )));
        }
        debug!("Enlisted {} in {}", resource.name(), handle);
        context.lock().add_resource(resource);
        Ok(())
    }

    /// Delists `resource` from the context's transaction, resuming it on the
    /// calling thread for the duration if it is not already associated.
    pub fn delist(&self, context: &ContextRef, resource: &Resource, flag: EndFlag) -> Result<()> {
        let handle = context
            .lock()
            .transaction()
            .ok_or_else(|| XaError::protocol("no active transaction to delist from"))?;

        let resumed = match self.tm.transaction()? {
            None => Some(ResumeGuard::resume(&*self.tm, handle)?),
            Some(_) => None,
        };
        let active = self.tm.transaction()?;
        if active != Some(handle) {
            return Err(XaError::resource(format!(
                "calling thread is associated with {:?}, expected {}",
                active, handle
            )));
        }
        if !self.tm.delist_resource(handle, resource, flag)? {
            return Err(XaError::resource(format!(
                "failed to delist {} from {}",
                resource.name(),
                handle
            )));
        }
        if flag != EndFlag::Suspend {
            context.lock().remove_resource(resource);
        }
        if let Some(resumed) = resumed {
            resumed.suspend()?;
        }
        debug!("Delisted {} from {} ({:?})", resource.name(), handle, flag);
        Ok(())
    }

    // ---- cancellation and administration ----

    /// Forcefully aborts the thread's transaction after an external cancel.
    ///
    /// Marks the transaction rollback-only and drops its context from both
    /// indexes; it does not roll back. The manager rolls the transaction back
    /// when it next completes it. With `request_only` set, only request-scoped
    /// transactions are touched.
    pub fn cancel_transactions(&self, thread_id: &str, request_only: bool) -> Result<()> {
        let Some(context) = self.registry.get_by_thread(thread_id) else {
            return Ok(());
        };
        let (scope, handle) = {
            let guard = context.lock();
            (guard.scope(), guard.transaction())
        };
        if scope == Scope::None || (request_only && scope != Scope::Request) {
            return Ok(());
        }

        let _cleanup = finally(|| self.retire(&context));
        if let Some(handle) = handle {
            self.mark_rollback_only(handle)?;
        }
        debug!(
            "Cancelled {:?} transaction for thread {}; marked rollback-only",
            scope, thread_id
        );
        Ok(())
    }

    /// Rolls back whatever transaction `thread_id` owns.
    pub fn terminate(&self, thread_id: &str) -> Result<()> {
        let context = self
            .registry
            .get_by_thread(thread_id)
            .ok_or_else(|| XaError::invalid(format!("no transaction for thread {}", thread_id)))?;
        let (scope, xid) = {
            let guard = context.lock();
            (guard.scope(), guard.xid().cloned())
        };
        match (scope, xid) {
            (Scope::Global, Some(xid)) => self.rollback_branch(&context, &xid)?,
            (Scope::Local | Scope::Request, _) => self.complete(&context, false)?,
            _ => {
                return Err(XaError::invalid(format!(
                    "no transaction for thread {}",
                    thread_id
                )));
            }
        }
        debug!("Terminated {:?} transaction for thread {}", scope, thread_id);
        Ok(())
    }

    /// Rolls back the global branch `xid`, bound or not.
    pub fn terminate_xid(&self, xid: &Xid) -> Result<()> {
        let context = self.global_context(xid)?;
        self.rollback_branch(&context, xid)?;
        debug!("Terminated global transaction {}", xid);
        Ok(())
    }

    // ---- helpers ----

    fn global_context(&self, xid: &Xid) -> Result<ContextRef> {
        self.registry
            .get_by_xid(xid)
            .ok_or_else(|| XaError::invalid(format!("no global transaction {}", xid)))
    }

    fn local_context(&self, thread_id: &str) -> Result<ContextRef> {
        match self.registry.get_by_thread(thread_id) {
            Some(context) if context.lock().scope() == Scope::Local => Ok(context),
            _ => Err(XaError::protocol(format!(
                "no local transaction for thread {}",
                thread_id
            ))),
        }
    }

    fn ensure_thread_free(&self, thread_id: &str) -> Result<()> {
        if let Some(existing) = self.registry.get_by_thread(thread_id) {
            let scope = existing.lock().scope();
            if scope != Scope::None {
                return Err(XaError::protocol(format!(
                    "thread {} already has a {:?} transaction",
                    thread_id, scope
                )));
            }
        }
        Ok(())
    }

    fn check_capacity(&self) -> Result<()> {
        if let Some(max) = self.config.max_active_transactions {
            if self.registry.active_count() >= max {
                return Err(XaError::new(
                    XaCode::RmFail,
                    format!("active transaction limit {} reached", max),
                ));
            }
        }
        Ok(())
    }

    fn begin_suspended(&self) -> Result<TransactionHandle> {
        self.tm.begin()?;
        match self.tm.suspend() {
            Ok(Some(handle)) => Ok(handle),
            Ok(None) => Err(XaError::resource("no transaction associated after begin")),
            Err(e) => {
                if let Err(rollback) = self.tm.rollback() {
                    warn!("Rollback after failed suspend also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Resumes, delists, and commits or rolls back a local or request
    /// transaction. The context is retired on every exit path.
    fn complete(&self, context: &ContextRef, commit: bool) -> Result<()> {
        let handle = context
            .lock()
            .transaction()
            .ok_or_else(|| XaError::protocol("no active transaction"))?;
        let _cleanup = finally(|| self.retire(context));

        let resumed = ResumeGuard::resume(&*self.tm, handle)?;
        if commit {
            self.delist_all(context, handle)?;
            self.tm.commit()?;
        } else {
            self.tm.rollback()?;
        }
        resumed.release();
        Ok(())
    }

    fn mark_rollback_only(&self, handle: TransactionHandle) -> Result<()> {
        let resumed = ResumeGuard::resume(&*self.tm, handle)?;
        self.tm.set_rollback_only()?;
        resumed.suspend()?;
        Ok(())
    }

    fn back_out_enlist(&self, handle: TransactionHandle, resource: &Resource) {
        match self.tm.delist_resource(handle, resource, EndFlag::Fail) {
            Ok(true) => {}
            Ok(false) => warn!("Delist of {} from {} refused", resource.name(), handle),
            Err(e) => warn!("Delist of {} from {} failed: {}", resource.name(), handle, e),
        }
    }

    fn rollback_branch(&self, context: &ContextRef, xid: &Xid) -> Result<()> {
        let _cleanup = finally(|| self.retire(context));
        self.terminator.rollback(xid)
    }

    /// Delists every enlisted resource with `TMSUCCESS`. The transaction must
    /// already be resumed on the calling thread.
    fn delist_all(&self, context: &ContextRef, handle: TransactionHandle) -> Result<()> {
        let resources = context.lock().resources().to_vec();
        for resource in resources {
            if !self.tm.delist_resource(handle, &resource, EndFlag::Success)? {
                return Err(XaError::resource(format!(
                    "failed to delist {} from {}",
                    resource.name(),
                    handle
                )));
            }
            context.lock().remove_resource(&resource);
        }
        Ok(())
    }

    fn delist_remaining(&self, context: &ContextRef, xid: &Xid) -> Result<()> {
        let (handle, pending) = {
            let guard = context.lock();
            (guard.transaction(), !guard.resources().is_empty())
        };
        if !pending {
            return Ok(());
        }
        let handle = handle.ok_or_else(|| missing_handle(xid))?;
        let resumed = ResumeGuard::resume(&*self.tm, handle)?;
        self.delist_all(context, handle)?;
        resumed.suspend()?;
        Ok(())
    }

    /// Drops `context` from both indexes and marks it completed.
    fn retire(&self, context: &ContextRef) {
        self.registry.remove(context);
        context.lock().complete();
    }
}

fn missing_handle(xid: &Xid) -> XaError {
    XaError::resource(format!("global transaction {} has no transaction handle", xid))
}
