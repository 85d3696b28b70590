use std::sync::Arc;

use crate::{
    chan::core::{Core, RawChan},
    park,
    ring::RingBuf,
    select::SelectCase,
    waitq::Waiter,
};

/// A Go-style channel: a typed FIFO with capacity `>= 0` supporting send,
/// receive, and close.
///
/// `Chan` is a handle; cloning it is cheap and every clone refers to the same
/// channel, the way Go channels are reference values. A channel with capacity
/// zero is a rendezvous: each send pairs with exactly one receive.
pub struct Chan<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Chan<T> {
    /// An unbuffered (rendezvous) channel.
    fn default() -> Self {
        Self::new(0)
    }
}

pub(crate) struct Inner<T> {
    core: Core,
    buf: RingBuf<T>,
}

// Safety: the buffer cells and waiter slots are only touched under the
// channel mutex (and, for parked waiters, the waiter's thread mutex), and
// values of `T` move between threads through them.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Chan<T> {
    /// Creates a channel with `cap` buffer slots; `cap == 0` makes a
    /// rendezvous channel.
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: Core::new(cap),
                buf: RingBuf::new(cap),
            }),
        }
    }

    /// Sends a value, blocking until a receiver takes it or buffer space is
    /// available.
    ///
    /// # Panics
    ///
    /// Panics if the channel is closed, including when the close happens
    /// while this send is parked.
    pub fn send(&self, value: T) {
        let inner = &*self.inner;
        let mut src = Some(value);
        let guard = inner.core.mu.lock();
        if inner.core.is_closed() {
            panic!("send on closed channel");
        }
        if let Some(w) = unsafe { inner.core.recvq().dequeue() } {
            // Send to waiting receiver
            unsafe { inner.send_to_waiter(&mut src, w) };
            drop(guard);
            return;
        }
        if inner.core.len() < inner.core.cap() {
            // Send to buffer
            unsafe { inner.send_to_buf(&mut src) };
            drop(guard);
            return;
        }
        // Block until some receiver completes the operation
        let w = Waiter::new((&raw mut src).cast(), false);
        unsafe { inner.core.sendq().enqueue(&w) };
        drop(guard);
        w.park();
        if w.woken_by_close() {
            panic!("send on closed channel");
        }
    }

    /// Receives a value, blocking until one is available. Returns `None`
    /// once the channel is closed and drained.
    pub fn recv(&self) -> Option<T> {
        let inner = &*self.inner;
        let mut dst: Option<T> = None;
        let guard = inner.core.mu.lock();
        if inner.core.is_closed() && inner.core.len() == 0 {
            return None;
        }
        if let Some(w) = unsafe { inner.core.sendq().dequeue() } {
            // Receive from waiting sender
            unsafe { inner.recv_from_waiter(&mut dst, w) };
            drop(guard);
            return dst;
        }
        if inner.core.len() > 0 {
            // Receive from buffer
            unsafe { inner.recv_from_buf(&mut dst) };
            drop(guard);
            return dst;
        }
        // Block until some sender completes the operation
        let w = Waiter::new((&raw mut dst).cast(), false);
        unsafe { inner.core.recvq().enqueue(&w) };
        drop(guard);
        w.park();
        dst
    }

    /// Closes the channel: parked receivers resume with `None`, parked
    /// senders panic, later receives drain the buffer then return `None`.
    ///
    /// # Panics
    ///
    /// Panics if the channel is already closed.
    pub fn close(&self) {
        let inner = &*self.inner;
        let guard = inner.core.mu.lock();
        if inner.core.is_closed() {
            panic!("close of closed channel");
        }
        inner.core.set_closed();
        let mut woken: Vec<&Waiter> = Vec::new();
        // Release all receivers with an empty result
        while let Some(w) = unsafe { inner.core.recvq().dequeue() } {
            unsafe { *w.value.cast::<Option<T>>() = None };
            woken.push(w);
        }
        // Release all senders; they observe the close when they resume
        while let Some(w) = unsafe { inner.core.sendq().dequeue() } {
            woken.push(w);
        }
        drop(guard);
        // Signal outside the channel mutex: the waker takes each waiter's
        // thread mutex, never the other way around.
        for w in woken {
            w.wake_closed();
        }
    }

    /// Number of buffered elements. Approximate under concurrency.
    pub fn len(&self) -> usize {
        self.inner.core.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer capacity; zero for rendezvous channels.
    pub fn cap(&self) -> usize {
        self.inner.core.cap()
    }

    /// Receives until the channel is closed and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { chan: self }
    }

    /// A `select` case sending the value held in `src`.
    ///
    /// `src` must be `Some` when `select` runs; if the case wins, the value
    /// is taken, otherwise the caller keeps it.
    pub fn send_case<'a>(&'a self, src: &'a mut Option<T>) -> SelectCase<'a> {
        SelectCase::send(Some(self.raw()), (&raw mut *src).cast())
    }

    /// A `select` case receiving into `dst`.
    ///
    /// If the case wins, `dst` is `Some(value)`, or `None` when the win was
    /// a close. A stale value left in `dst` from an earlier round is
    /// overwritten either way.
    pub fn recv_case<'a>(&'a self, dst: &'a mut Option<T>) -> SelectCase<'a> {
        SelectCase::recv(Some(self.raw()), (&raw mut *dst).cast())
    }

    pub(crate) fn raw(&self) -> &(dyn RawChan + '_) {
        &*self.inner
    }
}

impl<T> Inner<T> {
    /// Hands the source value straight to a parked receiver.
    ///
    /// # Safety
    ///
    /// Channel mutex held; `w` came off this channel's receive queue.
    unsafe fn send_to_waiter(&self, src: &mut Option<T>, w: &Waiter) {
        let dst = w.value.cast::<Option<T>>();
        w.wake(|| unsafe { *dst = src.take() });
    }

    /// # Safety
    ///
    /// Channel mutex held; `len() < cap()`; `src` is `Some`.
    unsafe fn send_to_buf(&self, src: &mut Option<T>) {
        let v = src.take().expect("send case without a pending value");
        unsafe {
            let sendx = &mut *self.core.sendx_ptr();
            self.buf.write(*sendx, v);
            *sendx = self.buf.advance(*sendx);
        }
        self.core.incr_count();
    }

    /// Completes a receive against a parked sender. With no buffer the value
    /// moves directly; with a (necessarily full) buffer the receiver takes
    /// the oldest slot and the sender's value refills it, keeping FIFO order.
    ///
    /// # Safety
    ///
    /// Channel mutex held; `w` came off this channel's send queue.
    unsafe fn recv_from_waiter(&self, dst: &mut Option<T>, w: &Waiter) {
        let src = w.value.cast::<Option<T>>();
        if self.core.len() == 0 {
            w.wake(|| unsafe { *dst = (*src).take() });
        } else {
            let recvx = unsafe { self.core.recvx_ptr() };
            let sendx = unsafe { self.core.sendx_ptr() };
            w.wake(|| unsafe {
                let v = (*src).take().expect("send case without a pending value");
                *dst = Some(self.buf.read(*recvx));
                self.buf.write(*recvx, v);
                *recvx = self.buf.advance(*recvx);
                *sendx = *recvx;
            });
        }
    }

    /// # Safety
    ///
    /// Channel mutex held; `len() > 0`.
    unsafe fn recv_from_buf(&self, dst: &mut Option<T>) {
        unsafe {
            let recvx = &mut *self.core.recvx_ptr();
            *dst = Some(self.buf.read(*recvx));
            *recvx = self.buf.advance(*recvx);
        }
        self.core.decr_count();
    }
}

impl<T> RawChan for Inner<T> {
    fn core(&self) -> &Core {
        &self.core
    }

    unsafe fn reset(&self, dst: *mut ()) {
        unsafe { *dst.cast::<Option<T>>() = None };
    }

    unsafe fn send_to_waiter(&self, src: *mut (), w: &Waiter) {
        unsafe { Inner::send_to_waiter(self, &mut *src.cast(), w) };
    }

    unsafe fn send_to_buf(&self, src: *mut ()) {
        unsafe { Inner::send_to_buf(self, &mut *src.cast()) };
    }

    unsafe fn recv_from_waiter(&self, dst: *mut (), w: &Waiter) {
        unsafe { Inner::recv_from_waiter(self, &mut *dst.cast(), w) };
    }

    unsafe fn recv_from_buf(&self, dst: *mut ()) {
        unsafe { Inner::recv_from_buf(self, &mut *dst.cast()) };
    }
}

// The channel is dropped when the last handle goes; any elements still
// buffered are dropped in place. Dropping with parked waiters is impossible:
// a parked thread keeps a handle alive through the operation.
impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let count = self.core.len();
        let mut i = unsafe { *self.core.recvx_ptr() };
        for _ in 0..count {
            unsafe { self.buf.drop_in_place(i) };
            i = self.buf.advance(i);
        }
    }
}

/// Blocking iterator over received values; ends when the channel is closed
/// and drained.
pub struct Iter<'a, T> {
    chan: &'a Chan<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.recv()
    }
}

impl<'a, T> IntoIterator for &'a Chan<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

/// Nil-channel semantics for optional channel handles: operations on `None`
/// block forever, as in Go.
pub trait OptChanExt<T> {
    fn send(&self, value: T);
    fn recv(&self) -> Option<T>;
}

impl<T> OptChanExt<T> for Option<&Chan<T>> {
    fn send(&self, value: T) {
        match self {
            Some(c) => c.send(value),
            None => park::forever_sleep(),
        }
    }

    fn recv(&self) -> Option<T> {
        match self {
            Some(c) => c.recv(),
            None => park::forever_sleep(),
        }
    }
}
