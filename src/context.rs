//! Cancellation trees
//!
//! A [`Context`] carries a cancellation signal, an optional deadline, and
//! request-scoped values down a tree of derived contexts. Its primary
//! observable is [`Context::done`]: a channel that closes when the context is
//! canceled, made to be `select`ed on alongside the work it guards.
//!
//! Canceling a context cancels every context derived from it, with the same
//! error. Deadline contexts arm a [`Timer`] whose expiry cancels with
//! [`Error::DeadlineExceeded`].
//!
//! ## Example
//!
//!```
//! use runnel::context::{self, Error};
//!
//! let (ctx, cancel) = context::with_cancel(&context::background());
//! let (child, _child_cancel) = context::with_cancel(&ctx);
//!
//! cancel();
//! assert_eq!(child.err(), Some(Error::Canceled));
//! assert_eq!(child.done().unwrap().recv(), None); // closed
//! ```

use std::{
    any::Any,
    sync::{Arc, LazyLock, Weak},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use thiserror::Error as ThisError;
use tracing::trace;

use crate::{chan::Chan, time::Timer};

/// Why a context was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum Error {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancels the context it was returned with; safe to call more than once.
pub type CancelFunc = Box<dyn Fn() + Send + Sync>;

/// A node in a cancellation tree. Clones share the node.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Node>,
}

enum Node {
    Background,
    Todo,
    Cancel(CancelState),
    Deadline(DeadlineState),
    Value {
        parent: Context,
        key: String,
        value: Box<dyn Any + Send + Sync>,
    },
}

struct CancelState {
    parent: Context,
    done: Chan<()>,
    state: Mutex<CancelInner>,
}

struct CancelInner {
    err: Option<Error>,
    children: Vec<Weak<Node>>,
}

struct DeadlineState {
    cancel: CancelState,
    deadline: Instant,
    timer: Mutex<Option<Timer>>,
}

impl Context {
    /// The context's deadline, if any ancestor set one.
    pub fn deadline(&self) -> Option<Instant> {
        match &*self.inner {
            Node::Background | Node::Todo => None,
            Node::Cancel(st) => st.parent.deadline(),
            Node::Deadline(d) => Some(d.deadline),
            Node::Value { parent, .. } => parent.deadline(),
        }
    }

    /// The channel closed on cancellation. `None` for contexts that can
    /// never be canceled, which reads as a nil channel in a `select`.
    pub fn done(&self) -> Option<&Chan<()>> {
        match &*self.inner {
            Node::Background | Node::Todo => None,
            Node::Cancel(st) => Some(&st.done),
            Node::Deadline(d) => Some(&d.cancel.done),
            Node::Value { parent, .. } => parent.done(),
        }
    }

    /// The cancellation reason; `None` while the context is live.
    pub fn err(&self) -> Option<Error> {
        match &*self.inner {
            Node::Background | Node::Todo => None,
            Node::Cancel(st) => st.state.lock().err,
            Node::Deadline(d) => d.cancel.state.lock().err,
            Node::Value { parent, .. } => parent.err(),
        }
    }

    /// Looks `key` up through the value overlays toward the root.
    pub fn value(&self, key: &str) -> Option<&(dyn Any + Send + Sync)> {
        match &*self.inner {
            Node::Background | Node::Todo => None,
            Node::Cancel(st) => st.parent.value(key),
            Node::Deadline(d) => d.cancel.parent.value(key),
            Node::Value { parent, key: k, value } => {
                if k == key {
                    Some(&**value)
                } else {
                    parent.value(key)
                }
            }
        }
    }
}

/// The root context: never canceled, no deadline, no values.
pub fn background() -> Context {
    static BACKGROUND: LazyLock<Context> = LazyLock::new(|| Context {
        inner: Arc::new(Node::Background),
    });
    BACKGROUND.clone()
}

/// Like [`background`], for call sites that have not decided which context
/// to thread through yet.
pub fn todo() -> Context {
    static TODO: LazyLock<Context> = LazyLock::new(|| Context {
        inner: Arc::new(Node::Todo),
    });
    TODO.clone()
}

/// A child context canceled by the returned function or by the parent's
/// cancellation, whichever comes first.
pub fn with_cancel(parent: &Context) -> (Context, CancelFunc) {
    let ctx = Context {
        inner: Arc::new(Node::Cancel(CancelState {
            parent: parent.clone(),
            done: Chan::new(0),
            state: Mutex::new(CancelInner {
                err: None,
                children: Vec::new(),
            }),
        })),
    };
    register(parent, &ctx);
    let node = Arc::clone(&ctx.inner);
    (
        ctx,
        Box::new(move || cancel_node(&node, true, Error::Canceled, true)),
    )
}

/// A child context canceled at `deadline` with [`Error::DeadlineExceeded`],
/// by the returned function, or by the parent, whichever comes first.
pub fn with_deadline(parent: &Context, deadline: Instant) -> (Context, CancelFunc) {
    let ctx = Context {
        inner: Arc::new(Node::Deadline(DeadlineState {
            cancel: CancelState {
                parent: parent.clone(),
                done: Chan::new(0),
                state: Mutex::new(CancelInner {
                    err: None,
                    children: Vec::new(),
                }),
            },
            deadline,
            timer: Mutex::new(None),
        })),
    };
    register(parent, &ctx);
    let node = Arc::clone(&ctx.inner);
    let cancel: CancelFunc = Box::new(move || cancel_node(&node, true, Error::Canceled, true));

    if parent.deadline().is_some_and(|cur| cur < deadline) {
        // The parent expires first; its cascade will reach this context
        return (ctx, cancel);
    }
    let now = Instant::now();
    if deadline <= now {
        cancel_node(&ctx.inner, true, Error::DeadlineExceeded, true);
        return (ctx, cancel);
    }
    let weak = Arc::downgrade(&ctx.inner);
    let timer = Timer::with_callback(deadline - now, move || {
        if let Some(node) = weak.upgrade() {
            // The worker must not stop (join) its own timer
            cancel_node(&node, true, Error::DeadlineExceeded, false);
        }
    });
    if let Node::Deadline(d) = &*ctx.inner {
        *d.timer.lock() = Some(timer);
    }
    (ctx, cancel)
}

/// [`with_deadline`], `d` from now.
pub fn with_timeout(parent: &Context, d: Duration) -> (Context, CancelFunc) {
    with_deadline(parent, Instant::now() + d)
}

/// A context that carries `value` under `key` and defers everything else to
/// the parent.
pub fn with_value(
    parent: &Context,
    key: impl Into<String>,
    value: impl Any + Send + Sync,
) -> Context {
    Context {
        inner: Arc::new(Node::Value {
            parent: parent.clone(),
            key: key.into(),
            value: Box::new(value),
        }),
    }
}

fn cancel_state(node: &Node) -> Option<&CancelState> {
    match node {
        Node::Cancel(st) => Some(st),
        Node::Deadline(d) => Some(&d.cancel),
        _ => None,
    }
}

/// Cancels `node` and cascades to its descendants. `remove` unregisters it
/// from its parent (set on every path except the parent cascade itself).
/// Idempotent: a context's done channel closes at most once.
fn cancel_node(node: &Arc<Node>, remove: bool, err: Error, stop_timer: bool) {
    if stop_timer {
        if let Node::Deadline(d) = &**node {
            if let Some(mut t) = d.timer.lock().take() {
                t.stop();
            }
        }
    }
    let Some(st) = cancel_state(node) else {
        return;
    };
    if remove {
        unregister(&st.parent, node);
    }
    let children = {
        let mut inner = st.state.lock();
        if inner.err.is_some() {
            return; // already canceled
        }
        inner.err = Some(err);
        st.done.close();
        std::mem::take(&mut inner.children)
    };
    trace!(target: "runnel::context", %err, "context canceled");
    for child in children {
        if let Some(child) = child.upgrade() {
            cancel_node(&child, false, err, true);
        }
    }
}

/// Attaches `child` to the nearest cancelable ancestor of `parent`. When
/// that ancestor is already canceled, the child is canceled immediately
/// with the ancestor's error.
fn register(parent: &Context, child: &Context) {
    match &*parent.inner {
        Node::Background | Node::Todo => {}
        Node::Value { parent, .. } => register(parent, child),
        node => {
            let st = cancel_state(node).expect("cancelable node");
            let prior = {
                let mut inner = st.state.lock();
                match inner.err {
                    Some(err) => Some(err),
                    None => {
                        inner.children.push(Arc::downgrade(&child.inner));
                        None
                    }
                }
            };
            if let Some(err) = prior {
                cancel_node(&child.inner, false, err, true);
            }
        }
    }
}

/// Detaches a canceled child so the ancestor does not accumulate dead
/// references.
fn unregister(parent: &Context, child: &Arc<Node>) {
    match &*parent.inner {
        Node::Background | Node::Todo => {}
        Node::Value { parent, .. } => unregister(parent, child),
        node => {
            let st = cancel_state(node).expect("cancelable node");
            let mut inner = st.state.lock();
            inner
                .children
                .retain(|w| !std::ptr::eq(w.as_ptr(), Arc::as_ptr(child)));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::select::{recv_case, select};

    /// Canceling the outer context closes the inner one with the same error
    #[test]
    fn test_cancel_cascade() {
        let (outer, cancel) = with_cancel(&background());
        let (inner, _inner_cancel) = with_cancel(&outer);
        assert_eq!(inner.err(), None);

        cancel();
        assert_eq!(outer.err(), Some(Error::Canceled));
        assert_eq!(inner.err(), Some(Error::Canceled));
        assert_eq!(inner.done().unwrap().recv(), None);
    }

    /// Canceling a child leaves the parent live
    #[test]
    fn test_child_cancel_is_local() {
        let (parent, _cancel) = with_cancel(&background());
        let (child, child_cancel) = with_cancel(&parent);
        child_cancel();
        assert_eq!(child.err(), Some(Error::Canceled));
        assert_eq!(parent.err(), None);
    }

    /// Cancel functions may run more than once
    #[test]
    fn test_cancel_idempotent() {
        let (ctx, cancel) = with_cancel(&background());
        cancel();
        cancel();
        assert_eq!(ctx.err(), Some(Error::Canceled));
    }

    /// A child of an already-canceled parent is born canceled
    #[test]
    fn test_canceled_parent_propagates_at_birth() {
        let (parent, cancel) = with_cancel(&background());
        cancel();
        let (child, _child_cancel) = with_cancel(&parent);
        assert_eq!(child.err(), Some(Error::Canceled));
    }

    /// The deadline fires before an unrelated long timer
    #[test]
    fn test_deadline_fires() {
        let (ctx, _cancel) = with_timeout(&background(), Duration::from_millis(10));
        let slow = Timer::new(Duration::from_secs(5));
        let started = Instant::now();
        let mut d = None;
        let mut t = None;
        let i = select(&mut [
            recv_case(ctx.done(), &mut d),
            slow.c().recv_case(&mut t),
        ]);
        assert_eq!(i, 0);
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(ctx.err(), Some(Error::DeadlineExceeded));
    }

    /// A deadline already in the past cancels immediately
    #[test]
    fn test_deadline_in_past() {
        let (ctx, _cancel) = with_deadline(&background(), Instant::now() - Duration::from_millis(1));
        assert_eq!(ctx.err(), Some(Error::DeadlineExceeded));
    }

    /// Explicit cancel beats the deadline and wins the error
    #[test]
    fn test_cancel_beats_deadline() {
        let (ctx, cancel) = with_timeout(&background(), Duration::from_secs(5));
        cancel();
        assert_eq!(ctx.err(), Some(Error::Canceled));
    }

    /// A child with a later deadline inherits the parent's sooner one
    #[test]
    fn test_parent_deadline_wins() {
        let (parent, _cancel) = with_timeout(&background(), Duration::from_millis(10));
        let (child, _child_cancel) = with_timeout(&parent, Duration::from_secs(60));
        assert!(child.deadline().is_some());
        assert_eq!(child.done().unwrap().recv(), None);
        assert_eq!(child.err(), Some(Error::DeadlineExceeded));
    }

    /// Values shadow outward and read through everything else
    #[test]
    fn test_values() {
        let root = background();
        assert!(root.value("k").is_none());
        let a = with_value(&root, "k", 1i32);
        let b = with_value(&a, "other", "x");
        let (c, _cancel) = with_cancel(&b);
        let d = with_value(&c, "k", 2i32);

        assert_eq!(b.value("k").unwrap().downcast_ref::<i32>(), Some(&1));
        assert_eq!(c.value("k").unwrap().downcast_ref::<i32>(), Some(&1));
        assert_eq!(d.value("k").unwrap().downcast_ref::<i32>(), Some(&2));
        assert_eq!(d.value("other").unwrap().downcast_ref::<&str>(), Some(&"x"));
        assert!(d.value("missing").is_none());
    }

    /// Background and todo are inert
    #[test]
    fn test_roots() {
        for ctx in [background(), todo()] {
            assert!(ctx.done().is_none());
            assert!(ctx.err().is_none());
            assert!(ctx.deadline().is_none());
        }
    }

    /// done() composes with select from another thread
    #[test]
    fn test_done_unblocks_waiter() {
        let (ctx, cancel) = with_cancel(&background());
        let waiter = ctx.clone();
        let t = thread::spawn(move || {
            let mut d = None;
            select(&mut [recv_case(waiter.done(), &mut d)])
        });
        thread::sleep(Duration::from_millis(10));
        cancel();
        assert_eq!(t.join().unwrap(), 0);
    }
}
