//! Scoped cleanup for the coordinator's exit paths.

use log::warn;

use crate::errors::Result;
use crate::manager::{TransactionHandle, TransactionManager};

/// Keeps a transaction resumed on the calling thread and suspends it again
/// when dropped.
///
/// Use [`ResumeGuard::suspend`] on the success path to surface suspend
/// failures, and [`ResumeGuard::release`] once the manager has already
/// disassociated the transaction (after `commit`/`rollback`).
pub(crate) struct ResumeGuard<'a> {
    tm: &'a dyn TransactionManager,
    handle: TransactionHandle,
    armed: bool,
}

impl<'a> ResumeGuard<'a> {
    pub(crate) fn resume(tm: &'a dyn TransactionManager, handle: TransactionHandle) -> Result<Self> {
        tm.resume(handle)?;
        Ok(Self {
            tm,
            handle,
            armed: true,
        })
    }

    pub(crate) fn suspend(mut self) -> Result<Option<TransactionHandle>> {
        self.armed = false;
        self.tm.suspend()
    }

    pub(crate) fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.tm.suspend() {
                warn!("Failed to suspend {} after error: {}", self.handle, e);
            }
        }
    }
}

/// Runs a closure when dropped unless dismissed.
pub(crate) struct Finally<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> Finally<F> {
    pub(crate) fn dismiss(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for Finally<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

pub(crate) fn finally<F: FnOnce()>(cleanup: F) -> Finally<F> {
    Finally {
        cleanup: Some(cleanup),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_finally_runs_on_every_exit() {
        let ran = Cell::new(0);
        let early = |fail: bool| -> std::result::Result<(), ()> {
            let _cleanup = finally(|| ran.set(ran.get() + 1));
            if fail {
                return Err(());
            }
            Ok(())
        };
        assert!(early(true).is_err());
        assert!(early(false).is_ok());
        assert_eq!(ran.get(), 2);
    }

    #[test]
    fn test_finally_dismiss() {
        let ran = Cell::new(false);
        finally(|| ran.set(true)).dismiss();
        assert!(!ran.get());
    }
}
