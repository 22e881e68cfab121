//! Lock policies for the receive and send sides of a socket.
//!
//! [`BufferedSocket`](crate::BufferedSocket) keeps its receive state and send
//! state behind two independent locks so one thread can block in a read
//! while another writes. The lock type is chosen by a [`LockPolicy`]:
//!
//! - [`Threaded`] (default): mutexes from `parking_lot`; the socket is `Sync`
//!   whenever the transport is.
//! - [`SingleThreaded`]: a no-op guard over a `RefCell`; the socket is not
//!   `Sync`, so the compiler keeps it on one thread.

use std::cell::RefCell;

use parking_lot::Mutex;

/// Mutual exclusion around one side's state.
pub trait SideLock<S> {
    /// Wrap `state`.
    fn new(state: S) -> Self;

    /// Run `f` with exclusive access to the state.
    ///
    /// Calling `with` on the same lock from inside `f` is a programming
    /// error: it deadlocks ([`MutexLock`]) or panics ([`NoLock`]).
    fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R;

    /// Unwrap the state.
    fn into_inner(self) -> S;
}

/// Selects the [`SideLock`] implementation used by a socket.
pub trait LockPolicy {
    /// Lock type guarding state `S`.
    type Lock<S: Send>: SideLock<S>;
}

/// Thread-safe policy backed by mutexes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Threaded;

/// Single-threaded policy with a trivial guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleThreaded;

impl LockPolicy for Threaded {
    type Lock<S: Send> = MutexLock<S>;
}

impl LockPolicy for SingleThreaded {
    type Lock<S: Send> = NoLock<S>;
}

/// `parking_lot` mutex around one side's state.
pub struct MutexLock<S> {
    inner: Mutex<S>,
}

impl<S> SideLock<S> for MutexLock<S> {
    fn new(state: S) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.inner.lock())
    }

    fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl<S> std::fmt::Debug for MutexLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexLock").finish_non_exhaustive()
    }
}

/// Lock-free stand-in for single-threaded use.
pub struct NoLock<S> {
    inner: RefCell<S>,
}

impl<S> SideLock<S> for NoLock<S> {
    fn new(state: S) -> Self {
        Self {
            inner: RefCell::new(state),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.inner.borrow_mut())
    }

    fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

impl<S> std::fmt::Debug for NoLock<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoLock").finish_non_exhaustive()
    }
}
