use std::sync::Arc;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use log::debug;
use parking_lot::Mutex;

use crate::context::{ContextRef, TransactionContext};
use crate::xid::Xid;

#[derive(Default)]
struct Indexes {
    by_thread: HashMap<String, ContextRef>,
    by_xid: HashMap<Xid, ContextRef>,
}

/// The two indexes over live transaction contexts: by owning thread and by
/// distributed id.
///
/// Both maps sit behind one mutex. Every operation takes it once and never
/// calls out while holding it, and never locks a context while holding it, so
/// a slow prepare against a remote resource manager never blocks unrelated
/// lookups.
#[derive(Default)]
pub struct TransactionRegistry {
    indexes: Mutex<Indexes>,
}

/// Snapshot of the keys a context currently holds.
fn keys_of(context: &ContextRef) -> (Option<String>, Option<Xid>) {
    let guard = context.lock();
    (
        guard.thread_id().map(str::to_string),
        guard.xid().cloned(),
    )
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the context indexed for `thread_id`, creating and indexing a
    /// `Scope::None` shell if there is none.
    pub fn get_or_create(&self, thread_id: &str) -> ContextRef {
        let mut indexes = self.indexes.lock();
        if let Some(existing) = indexes.by_thread.get(thread_id) {
            return Arc::clone(existing);
        }
        let shell = TransactionContext::shared(Some(thread_id.to_string()));
        indexes
            .by_thread
            .insert(thread_id.to_string(), Arc::clone(&shell));
        debug!("Created context shell for thread {}", thread_id);
        shell
    }

    pub fn get_by_thread(&self, thread_id: &str) -> Option<ContextRef> {
        self.indexes.lock().by_thread.get(thread_id).cloned()
    }

    pub fn get_by_xid(&self, xid: &Xid) -> Option<ContextRef> {
        self.indexes.lock().by_xid.get(xid).cloned()
    }

    /// Indexes `context` under whichever of its keys are present, replacing
    /// any previous entries for those keys.
    pub fn add(&self, context: &ContextRef) {
        let (thread_id, xid) = keys_of(context);
        let mut indexes = self.indexes.lock();
        if let Some(thread_id) = thread_id {
            indexes.by_thread.insert(thread_id, Arc::clone(context));
        }
        if let Some(xid) = xid {
            indexes.by_xid.insert(xid, Arc::clone(context));
        }
    }

    /// Indexes `context` under `xid` only if nothing is indexed there yet.
    /// This is the single point that decides races between two `start`s of
    /// the same branch.
    pub fn add_if_absent(&self, xid: &Xid, context: &ContextRef) -> bool {
        let mut indexes = self.indexes.lock();
        if indexes.by_xid.contains_key(xid) {
            return false;
        }
        indexes.by_xid.insert(xid.clone(), Arc::clone(context));
        true
    }

    /// Removes `context` from both indexes using the keys it currently holds.
    /// Entries under those keys that belong to another context are left alone.
    pub fn remove(&self, context: &ContextRef) {
        let (thread_id, xid) = keys_of(context);
        let mut indexes = self.indexes.lock();
        if let Some(thread_id) = thread_id {
            if indexes
                .by_thread
                .get(&thread_id)
                .is_some_and(|c| Arc::ptr_eq(c, context))
            {
                indexes.by_thread.remove(&thread_id);
            }
        }
        if let Some(xid) = xid {
            if indexes
                .by_xid
                .get(&xid)
                .is_some_and(|c| Arc::ptr_eq(c, context))
            {
                indexes.by_xid.remove(&xid);
            }
        }
    }

    pub fn remove_thread(&self, thread_id: &str) -> Option<ContextRef> {
        self.indexes.lock().by_thread.remove(thread_id)
    }

    pub fn remove_xid(&self, xid: &Xid) -> Option<ContextRef> {
        self.indexes.lock().by_xid.remove(xid)
    }

    /// Removes the thread entry only if it still points at `context`.
    pub fn unbind_thread(&self, thread_id: &str, context: &ContextRef) -> bool {
        let mut indexes = self.indexes.lock();
        if indexes
            .by_thread
            .get(thread_id)
            .is_some_and(|c| Arc::ptr_eq(c, context))
        {
            indexes.by_thread.remove(thread_id);
            return true;
        }
        false
    }

    /// Every distinct indexed context, shells included.
    pub fn contexts(&self) -> Vec<ContextRef> {
        let indexes = self.indexes.lock();
        let mut seen = HashSet::with_capacity(indexes.by_thread.len() + indexes.by_xid.len());
        indexes
            .by_thread
            .values()
            .chain(indexes.by_xid.values())
            .filter(|c| seen.insert(Arc::as_ptr(*c)))
            .cloned()
            .collect()
    }

    /// Number of indexed contexts with a scope other than `Scope::None`.
    pub fn active_count(&self) -> usize {
        self.contexts()
            .iter()
            .filter(|c| c.lock().is_active())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        let indexes = self.indexes.lock();
        indexes.by_thread.is_empty() && indexes.by_xid.is_empty()
    }
}
