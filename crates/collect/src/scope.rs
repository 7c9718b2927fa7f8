//! Write transaction scoping.
//!
//! Write transactions nest per thread, across collections: a derived write
//! that issues several source writes, or a base write made from inside a
//! listener, joins the transaction already open on the thread. Every event of
//! one transaction carries the outermost transaction's cause, and batch
//! listeners of the base collections written to are flushed once, when the
//! outermost transaction closes.

use crate::subscription::SubscriptionManager;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use strata_core::{Cause, Result};
use strata_lock::{LockType, Lockable, Transaction};
use tracing::trace;

/// A collection holding events for its batch listeners.
pub(crate) trait PendingBatch {
    fn deliver(&self);
}

impl<T: Clone + 'static> PendingBatch for SubscriptionManager<T> {
    fn deliver(&self) {
        self.flush();
    }
}

#[derive(Default)]
struct OpenTransaction {
    depth: usize,
    cause: Option<Cause>,
    batches: Vec<Rc<dyn PendingBatch>>,
}

impl OpenTransaction {
    fn register(&mut self, batch: Rc<dyn PendingBatch>) {
        let key = Rc::as_ptr(&batch) as *const ();
        if !self.batches.iter().any(|b| Rc::as_ptr(b) as *const () == key) {
            self.batches.push(batch);
        }
    }
}

thread_local! {
    static OPEN: RefCell<OpenTransaction> = RefCell::new(OpenTransaction::default());
}

/// One level of the thread's write transaction, holding the exclusive lock
/// of the collection written to until dropped.
pub(crate) struct WriteScope {
    cause: Cause,
    outermost: bool,
    // Dropped after the batches are delivered.
    _tx: Transaction,
}

impl WriteScope {
    /// Opens a level under the exclusive lock of `lockable`.
    pub fn enter(lockable: &dyn Lockable) -> Result<Self> {
        Self::open(lockable, None)
    }

    /// Opens a level that flushes `subscriptions` when the outermost level closes.
    pub fn batched<T: Clone + 'static>(
        lockable: &dyn Lockable,
        subscriptions: &Rc<SubscriptionManager<T>>,
    ) -> Result<Self> {
        let batch: Rc<dyn PendingBatch> = subscriptions.clone();
        Self::open(lockable, Some(batch))
    }

    fn open(lockable: &dyn Lockable, batch: Option<Rc<dyn PendingBatch>>) -> Result<Self> {
        let tx = lockable.lock(LockType::Exclusive)?;
        let (cause, outermost) = OPEN.with(|open| {
            let mut open = open.borrow_mut();
            open.depth += 1;
            let cause = *open.cause.get_or_insert(tx.cause());
            if let Some(batch) = batch {
                open.register(batch);
            }
            (cause, open.depth == 1)
        });
        Ok(Self {
            cause,
            outermost,
            _tx: tx,
        })
    }

    /// Runs `op` in a batched level.
    pub fn run<T, R, F>(
        lockable: &dyn Lockable,
        subscriptions: &Rc<SubscriptionManager<T>>,
        op: F,
    ) -> Result<R>
    where
        T: Clone + 'static,
        F: FnOnce(Cause) -> Result<R>,
    {
        let scope = Self::batched(lockable, subscriptions)?;
        op(scope.cause())
    }

    /// Returns the cause shared by the whole transaction.
    pub fn cause(&self) -> Cause {
        self.cause
    }

    /// Flushes registered batches until none are left. Writes made by batch
    /// listeners register further batches in the same transaction.
    fn deliver(&self) {
        loop {
            let batches = OPEN.with(|open| std::mem::take(&mut open.borrow_mut().batches));
            if batches.is_empty() {
                break;
            }
            trace!(cause = self.cause.id(), batches = batches.len(), "closing write transaction");
            for batch in batches {
                batch.deliver();
            }
        }
    }
}

impl Drop for WriteScope {
    fn drop(&mut self) {
        if self.outermost && !thread::panicking() {
            self.deliver();
        }
        OPEN.with(|open| {
            let mut open = open.borrow_mut();
            open.depth -= 1;
            if open.depth == 0 {
                open.cause = None;
                open.batches.clear();
            }
        });
    }
}
