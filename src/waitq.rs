use std::{cell::Cell, ptr, sync::Arc};

use crate::park::{self, Thread};

/// A parked waiter, linked into a channel's send or receive queue.
///
/// Nodes live on the stack of the thread that is about to park: every node is
/// dequeued (by a matching peer or by close) before that thread resumes, so
/// membership never outlives the node. `value` points into the waiter's own
/// frame: the value being sent for a send waiter, the destination slot for a
/// receive waiter.
pub(crate) struct Waiter {
    pub(crate) parent: Arc<Thread>,
    pub(crate) value: *mut (),
    pub(crate) is_select: bool,
    /// Wake predicate. Guarded by `parent.mu`.
    done_waiting: Cell<bool>,
    /// Set when the wake came from a channel close. Guarded by `parent.mu`.
    closed: Cell<bool>,
    next: Cell<*const Waiter>,
    prev: Cell<*const Waiter>,
}

// Safety: the link cells are only touched under the owning channel's mutex;
// the wake flags only under `parent.mu`. The raw `value` pointer is written
// by at most one waker, before `done_waiting` is set.
unsafe impl Sync for Waiter {}

impl Waiter {
    pub(crate) fn new(value: *mut (), is_select: bool) -> Self {
        Self {
            parent: park::current(),
            value,
            is_select,
            done_waiting: Cell::new(false),
            closed: Cell::new(false),
            next: Cell::new(ptr::null()),
            prev: Cell::new(ptr::null()),
        }
    }

    /// Caller must hold `parent.mu`.
    #[inline]
    pub(crate) fn done_waiting(&self) -> bool {
        self.done_waiting.get()
    }

    /// Whether the wake came from a close. Stable once the waiter resumed.
    #[inline]
    pub(crate) fn woken_by_close(&self) -> bool {
        self.closed.get()
    }

    /// Runs `transfer` and marks the waiter done under `parent.mu`, then
    /// signals it. `transfer` performs the pointer writes that complete the
    /// rendezvous; nothing on the node may be touched after the signal.
    pub(crate) fn wake(&self, transfer: impl FnOnce()) {
        let parent = Arc::clone(&self.parent);
        {
            let _guard = parent.mu.lock();
            transfer();
            self.done_waiting.set(true);
        }
        parent.cv.notify_one();
    }

    /// Wakes the waiter because its channel was closed.
    pub(crate) fn wake_closed(&self) {
        let parent = Arc::clone(&self.parent);
        {
            let _guard = parent.mu.lock();
            self.closed.set(true);
            self.done_waiting.set(true);
        }
        parent.cv.notify_one();
    }

    /// Blocks the calling thread until a waker marks this node done.
    pub(crate) fn park(&self) {
        let mut guard = self.parent.mu.lock();
        while !self.done_waiting.get() {
            self.parent.cv.wait(&mut guard);
        }
    }
}

/// Intrusive FIFO of parked waiters. Every operation requires the owning
/// channel's mutex.
pub(crate) struct WaitQ {
    head: *const Waiter,
    tail: *const Waiter,
}

// Safety: the queue only stores pointers; all access is serialized by the
// owning channel's mutex.
unsafe impl Send for WaitQ {}

impl WaitQ {
    pub(crate) const fn new() -> Self {
        Self {
            head: ptr::null(),
            tail: ptr::null(),
        }
    }

    /// Appends `w` at the tail.
    ///
    /// # Safety
    ///
    /// Caller holds the channel mutex; `w` must remain valid until dequeued.
    pub(crate) unsafe fn enqueue(&mut self, w: &Waiter) {
        if self.tail.is_null() {
            self.head = w;
        } else {
            w.prev.set(self.tail);
            unsafe { (*self.tail).next.set(w) };
        }
        self.tail = w;
    }

    /// Pops the head waiter.
    ///
    /// A select waiter must additionally win the claim on its thread's
    /// `select_done` flag; a node whose select was already claimed by another
    /// channel is skipped and the scan retries from the new head.
    ///
    /// # Safety
    ///
    /// Caller holds the channel mutex. The returned reference is valid until
    /// the waiter is marked done: its owner cannot resume before that.
    pub(crate) unsafe fn dequeue<'q>(&mut self) -> Option<&'q Waiter> {
        loop {
            if self.head.is_null() {
                return None;
            }
            let w = unsafe { &*self.head };
            let next = w.next.get();
            if next.is_null() {
                self.head = ptr::null();
                self.tail = ptr::null();
            } else {
                unsafe { (*next).prev.set(ptr::null()) };
                self.head = next;
                w.next.set(ptr::null());
            }
            if w.is_select && !w.parent.claim_select() {
                // Another channel already claimed this select; the node is
                // left detached for its owner's cleanup pass.
                continue;
            }
            return Some(w);
        }
    }

    /// Removes a specific node, wherever it sits. Used by the select cleanup
    /// pass for the cases that lost; tolerates nodes that a racing `dequeue`
    /// already detached.
    ///
    /// # Safety
    ///
    /// Caller holds the channel mutex.
    pub(crate) unsafe fn unlink(&mut self, w: &Waiter) {
        let prev = w.prev.get();
        let next = w.next.get();
        if !prev.is_null() {
            if !next.is_null() {
                // Middle of queue
                unsafe {
                    (*prev).next.set(next);
                    (*next).prev.set(prev);
                }
                w.next.set(ptr::null());
                w.prev.set(ptr::null());
            } else {
                // End of queue
                unsafe { (*prev).next.set(ptr::null()) };
                self.tail = prev;
                w.prev.set(ptr::null());
            }
        } else if !next.is_null() {
            // Start of queue
            unsafe { (*next).prev.set(ptr::null()) };
            self.head = next;
            w.next.set(ptr::null());
        } else if ptr::eq(self.head, w) {
            // Only element; otherwise already removed
            self.head = ptr::null();
            self.tail = ptr::null();
        }
    }
}
