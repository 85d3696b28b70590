use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::{Condvar, Mutex};

/// Per-OS-thread park slot.
///
/// A thread blocks on its own slot: it takes `mu`, checks a wake predicate
/// owned by the waiter, and waits on `cv` until a peer flips the predicate
/// under `mu` and signals. `select_done` arbitrates between channels racing
/// to claim a parked `select`: the first CAS from `false` to `true` wins.
///
/// Wakers hold the slot through an [`Arc`] clone taken from the waiter node,
/// so a slot never dangles even if the waiter's stack frame has unwound.
pub(crate) struct Thread {
    pub(crate) mu: Mutex<()>,
    pub(crate) cv: Condvar,
    pub(crate) select_done: AtomicBool,
}

impl Thread {
    fn new() -> Self {
        Self {
            mu: Mutex::new(()),
            cv: Condvar::new(),
            select_done: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn select_done(&self) -> bool {
        // The winning waker publishes the flag before it takes `mu` to set
        // the winner's `done_waiting`, so a read under `mu` after the signal
        // always observes it.
        self.select_done.load(Ordering::Relaxed)
    }

    /// Re-arms the flag before parking a new `select`. Must be called with
    /// every involved channel mutex held, so no waker can race the reset.
    #[inline]
    pub(crate) fn arm_select(&self) {
        self.select_done.store(false, Ordering::Relaxed);
    }

    /// Claims this thread's pending `select`. Only one claimant succeeds.
    #[inline]
    pub(crate) fn claim_select(&self) -> bool {
        self.select_done
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

std::thread_local! {
    static CURRENT: Arc<Thread> = Arc::new(Thread::new());
}

/// The calling thread's park slot.
pub(crate) fn current() -> Arc<Thread> {
    CURRENT.with(Arc::clone)
}

/// Parks the calling thread on a predicate that never becomes true.
///
/// Operations on a nil channel block forever; so does an empty `select`.
pub(crate) fn forever_sleep() -> ! {
    let t = current();
    let mut guard = t.mu.lock();
    loop {
        t.cv.wait(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Each thread gets its own slot; repeated calls return the same one
    #[test]
    fn test_current_identity() {
        let a = current();
        let b = current();
        assert!(Arc::ptr_eq(&a, &b));

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            tx.send(current()).unwrap();
        })
        .join()
        .unwrap();
        let other = rx.recv().unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
    }

    /// Only one of many claimants wins the select CAS
    #[test]
    fn test_claim_select_single_winner() {
        let t = Thread::new();
        assert!(t.claim_select());
        assert!(!t.claim_select());
        assert!(t.select_done());
    }
}
