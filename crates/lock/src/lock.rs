//! Re-entrant read/write locks for collections.

use hashbrown::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use strata_core::{Error, Result};
use tracing::debug;

/// Global lock ID counter.
static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of one physical lock.
///
/// Composite acquisition takes locks in ascending `LockId` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(u64);

impl LockId {
    fn next() -> Self {
        LockId(NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identity value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Lock type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockType {
    /// Shared lock (read).
    Shared,
    /// Exclusive lock (write).
    Exclusive,
}

/// Holders of one lock, by thread.
#[derive(Debug, Default)]
struct LockState {
    /// Threads holding shared locks, with their re-entry depth.
    shared_holders: HashMap<ThreadId, usize>,
    /// Thread holding the exclusive lock (if any).
    exclusive_holder: Option<ThreadId>,
    /// Re-entry depth of the exclusive holder.
    exclusive_depth: usize,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.shared_holders.is_empty() && self.exclusive_holder.is_none()
    }

    fn can_grant_shared(&self, thread: ThreadId) -> bool {
        // Can grant shared if no exclusive lock or we already hold it
        self.exclusive_holder.is_none() || self.exclusive_holder == Some(thread)
    }

    fn can_grant_exclusive(&self, thread: ThreadId) -> bool {
        match self.exclusive_holder {
            Some(holder) => holder == thread,
            None => self.shared_holders.is_empty(),
        }
    }

    /// A thread that only reads cannot be granted a write, even when it is
    /// the sole reader: its outer read section relies on nothing changing.
    fn is_upgrade(&self, thread: ThreadId) -> bool {
        self.exclusive_holder != Some(thread) && self.shared_holders.contains_key(&thread)
    }

    fn can_grant(&self, thread: ThreadId, lock_type: LockType) -> bool {
        match lock_type {
            LockType::Shared => self.can_grant_shared(thread),
            LockType::Exclusive => self.can_grant_exclusive(thread),
        }
    }

    fn grant(&mut self, thread: ThreadId, lock_type: LockType) {
        match lock_type {
            LockType::Shared => *self.shared_holders.entry(thread).or_insert(0) += 1,
            LockType::Exclusive => {
                self.exclusive_holder = Some(thread);
                self.exclusive_depth += 1;
            }
        }
    }

    /// Releases one level of a lock. Returns true if an exclusive section ended.
    fn release(&mut self, thread: ThreadId, lock_type: LockType) -> bool {
        match lock_type {
            LockType::Shared => {
                if let Some(depth) = self.shared_holders.get_mut(&thread) {
                    *depth -= 1;
                    if *depth == 0 {
                        self.shared_holders.remove(&thread);
                    }
                }
                false
            }
            LockType::Exclusive => {
                if self.exclusive_holder != Some(thread) {
                    return false;
                }
                self.exclusive_depth -= 1;
                if self.exclusive_depth == 0 {
                    self.exclusive_holder = None;
                    return true;
                }
                false
            }
        }
    }

    fn holds(&self, thread: ThreadId, lock_type: LockType) -> bool {
        match lock_type {
            LockType::Shared => {
                self.shared_holders.contains_key(&thread) || self.exclusive_holder == Some(thread)
            }
            LockType::Exclusive => self.exclusive_holder == Some(thread),
        }
    }
}

struct LockCore {
    id: LockId,
    state: Mutex<LockState>,
    released: Condvar,
    /// Number of completed exclusive sections.
    stamp: AtomicU64,
}

/// A re-entrant read/write lock guarding one collection (or a family of
/// collections sharing a source).
///
/// The owning thread may re-acquire the lock in either mode while it holds the
/// exclusive lock. A thread holding only the shared lock that asks for the
/// exclusive lock gets [`Error::LockUpgrade`] instead of deadlocking.
///
/// Cloning yields another handle to the same physical lock.
#[derive(Clone)]
pub struct CollectionLock {
    core: Arc<LockCore>,
}

impl CollectionLock {
    /// Creates a new lock with a fresh identity.
    pub fn new() -> Self {
        Self {
            core: Arc::new(LockCore {
                id: LockId::next(),
                state: Mutex::new(LockState::default()),
                released: Condvar::new(),
                stamp: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the lock's identity.
    #[inline]
    pub fn id(&self) -> LockId {
        self.core.id
    }

    /// Returns the number of exclusive sections completed so far.
    ///
    /// Optimistic readers compare the stamp before and after a read.
    #[inline]
    pub fn stamp(&self) -> u64 {
        self.core.stamp.load(Ordering::Acquire)
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.core.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the lock, blocking until it is available.
    pub fn acquire(&self, lock_type: LockType) -> Result<LockGuard> {
        let thread = thread::current().id();
        let mut state = self.state();
        loop {
            if lock_type == LockType::Exclusive && state.is_upgrade(thread) {
                return Err(Error::LockUpgrade);
            }
            if state.can_grant(thread, lock_type) {
                state.grant(thread, lock_type);
                return Ok(LockGuard::new(self.clone(), lock_type));
            }
            debug!(lock = self.id().get(), ?lock_type, "waiting for contended lock");
            state = self
                .core
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Acquires the lock if it is available without blocking.
    pub fn try_acquire(&self, lock_type: LockType) -> Result<LockGuard> {
        let thread = thread::current().id();
        let mut state = self.state();
        if lock_type == LockType::Exclusive && state.is_upgrade(thread) {
            return Err(Error::LockUpgrade);
        }
        if !state.can_grant(thread, lock_type) {
            return Err(Error::WouldBlock);
        }
        state.grant(thread, lock_type);
        Ok(LockGuard::new(self.clone(), lock_type))
    }

    /// Acquires the shared lock.
    pub fn read(&self) -> Result<LockGuard> {
        self.acquire(LockType::Shared)
    }

    /// Acquires the exclusive lock.
    pub fn write(&self) -> Result<LockGuard> {
        self.acquire(LockType::Exclusive)
    }

    /// Returns true if no thread holds the lock.
    pub fn is_free(&self) -> bool {
        self.state().is_free()
    }

    /// Returns true if the current thread holds the lock in the given mode.
    ///
    /// An exclusive holder also counts as a shared holder.
    pub fn is_held(&self, lock_type: LockType) -> bool {
        self.state().holds(thread::current().id(), lock_type)
    }

    fn release(&self, lock_type: LockType) {
        let ended_write = {
            let mut state = self.state();
            state.release(thread::current().id(), lock_type)
        };
        if ended_write {
            self.core.stamp.fetch_add(1, Ordering::Release);
        }
        self.core.released.notify_all();
    }
}

impl Default for CollectionLock {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for CollectionLock {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for CollectionLock {}

impl fmt::Debug for CollectionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionLock")
            .field("id", &self.id())
            .field("stamp", &self.stamp())
            .finish()
    }
}

/// Holds one level of a [`CollectionLock`] until dropped.
///
/// Guards are released on the thread that acquired them, so they are not `Send`.
pub struct LockGuard {
    lock: CollectionLock,
    lock_type: LockType,
    _not_send: PhantomData<*const ()>,
}

impl LockGuard {
    fn new(lock: CollectionLock, lock_type: LockType) -> Self {
        Self {
            lock,
            lock_type,
            _not_send: PhantomData,
        }
    }

    /// Returns the guarded lock.
    pub fn lock(&self) -> &CollectionLock {
        &self.lock
    }

    /// Returns the mode the lock is held in.
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release(self.lock_type);
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("lock", &self.lock.id())
            .field("lock_type", &self.lock_type)
            .finish()
    }
}
