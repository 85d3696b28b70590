use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::waitq::{WaitQ, Waiter};

/// Untyped channel state: capacity, ring indices, the two wait queues, and
/// the channel mutex.
///
/// `count` and `closed` are cache-padded atomics so `len()`/`cap()` style
/// queries never touch the mutex; everything else is guarded by `mu`.
/// The element buffer itself lives in the typed wrapper, which is the only
/// code that knows the element type.
pub(crate) struct Core {
    cap: usize,
    count: CachePadded<AtomicUsize>,
    closed: CachePadded<AtomicBool>,
    pub(crate) mu: Mutex<()>,
    sendx: UnsafeCell<usize>,
    recvx: UnsafeCell<usize>,
    sendq: UnsafeCell<WaitQ>,
    recvq: UnsafeCell<WaitQ>,
}

// Safety: the UnsafeCell fields are only accessed with `mu` held; the
// atomics synchronize themselves.
unsafe impl Send for Core {}
unsafe impl Sync for Core {}

impl Core {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            cap,
            count: CachePadded::new(AtomicUsize::new(0)),
            closed: CachePadded::new(AtomicBool::new(false)),
            mu: Mutex::new(()),
            sendx: UnsafeCell::new(0),
            recvx: UnsafeCell::new(0),
            sendq: UnsafeCell::new(WaitQ::new()),
            recvq: UnsafeCell::new(WaitQ::new()),
        }
    }

    #[inline]
    pub(crate) fn cap(&self) -> usize {
        self.cap
    }

    /// Number of buffered elements. Approximate outside the mutex.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        // Monotone flag; the mutex orders it against the queues wherever
        // that matters.
        self.closed.load(Ordering::Relaxed)
    }

    /// Caller must hold `mu`. The flag never reverts.
    #[inline]
    pub(crate) fn set_closed(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Caller must hold `mu`.
    #[inline]
    pub(crate) fn incr_count(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Caller must hold `mu`.
    #[inline]
    pub(crate) fn decr_count(&self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// Caller holds `mu` and does not hold another reference to the same
    /// queue or index cell.
    #[inline]
    pub(crate) unsafe fn sendq<'q>(&self) -> &'q mut WaitQ {
        unsafe { &mut *self.sendq.get() }
    }

    /// # Safety
    ///
    /// See [`Core::sendq`].
    #[inline]
    pub(crate) unsafe fn recvq<'q>(&self) -> &'q mut WaitQ {
        unsafe { &mut *self.recvq.get() }
    }

    /// # Safety
    ///
    /// See [`Core::sendq`].
    #[inline]
    pub(crate) unsafe fn sendx_ptr(&self) -> *mut usize {
        self.sendx.get()
    }

    /// # Safety
    ///
    /// See [`Core::sendq`].
    #[inline]
    pub(crate) unsafe fn recvx_ptr(&self) -> *mut usize {
        self.recvx.get()
    }
}

/// The type-erased face of a channel, used by `select` to drive rendezvous
/// across a heterogeneous set of channels.
///
/// The typed wrapper implements these as moves through `Option<T>` slots:
/// sources are `Some` until taken, destinations become `Some` on success and
/// stay (or become) `None` on close. Every method requires the channel mutex;
/// the waiter variants additionally take the waiter's thread mutex before
/// touching its slot.
pub(crate) trait RawChan {
    fn core(&self) -> &Core;

    /// Clears a receive destination: the empty result a receiver observes
    /// when the channel is closed.
    ///
    /// # Safety
    ///
    /// `dst` points at the `Option<T>` slot this channel's cases were built
    /// with; caller holds the channel mutex.
    unsafe fn reset(&self, dst: *mut ());

    /// Completes a send against a parked receiver.
    ///
    /// # Safety
    ///
    /// `src` is a `Some` source slot of this channel's element type; `w` was
    /// dequeued from this channel's receive queue; caller holds the channel
    /// mutex.
    unsafe fn send_to_waiter(&self, src: *mut (), w: &Waiter);

    /// Appends a value to the ring buffer. Requires `len() < cap()`.
    ///
    /// # Safety
    ///
    /// As [`RawChan::send_to_waiter`], minus the waiter.
    unsafe fn send_to_buf(&self, src: *mut ());

    /// Completes a receive against a parked sender, rotating through the
    /// buffer when one exists.
    ///
    /// # Safety
    ///
    /// `dst` is a destination slot of this channel's element type; `w` was
    /// dequeued from this channel's send queue; caller holds the channel
    /// mutex.
    unsafe fn recv_from_waiter(&self, dst: *mut (), w: &Waiter);

    /// Takes the oldest buffered value. Requires `len() > 0`.
    ///
    /// # Safety
    ///
    /// As [`RawChan::recv_from_waiter`], minus the waiter.
    unsafe fn recv_from_buf(&self, dst: *mut ());
}
