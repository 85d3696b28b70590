//! Blocking MPMC channel with Go semantics
//!
//! A bounded, multi-producer multi-consumer channel whose send/receive block
//! by parking the calling OS thread, with close semantics and `select`
//! support.
//!
//! ## How It Works
//!
//!```text
//!                 sendx (next send lands here)
//!                 ↓
//! ┌───┬───┬───┬───┬───┬───┐
//! │   │ 7 │ 8 │   │   │   │  Ring buffer (cap slots; cap == 0 ⇒ rendezvous)
//! └───┴───┴───┴───┴───┴───┘
//!       ↑
//!       recvx (next receive comes from here)
//!
//!   sendq: senders parked on a full buffer (or no receiver, when cap == 0)
//!   recvq: receivers parked on an empty buffer
//!```
//!
//! At most one of the two queues is non-empty: a send first hands its value
//! directly to a parked receiver, then falls back to the buffer, then parks;
//! a receive mirrors it. When the buffer is full and senders are parked, a
//! receive takes the oldest slot and refills it from the head sender, so
//! values still come out in send order.
//!
//! ## Synchronization
//!
//! One mutex per channel guards the buffer, the indices, and both queues.
//! `len()` and `cap()` read cache-padded atomics and never block. A parked
//! thread waits on its own per-thread condition variable; the peer that
//! completes the rendezvous writes through the waiter's slot pointer and
//! flips its wake predicate under the waiter's thread mutex. Waiter nodes
//! live on the parked thread's stack (dequeue always precedes resume), so
//! nothing is ever allocated on the hot path.
//!
//! ## Closing
//!
//! `close` wakes every parked waiter exactly once: receivers resume with an
//! empty result, senders panic, and later receives drain the buffer before
//! reporting empty. Closing twice, or sending on a closed channel, is a
//! contract violation and panics.
//!
//! ## Example
//!
//!```
//! use runnel::Chan;
//!
//! let c = Chan::new(2);
//! c.send(1);
//! c.send(2);
//! assert_eq!(c.len(), 2);
//!
//! let rx = c.clone();
//! let t = std::thread::spawn(move || {
//!     assert_eq!(rx.recv(), Some(1));
//!     assert_eq!(rx.recv(), Some(2));
//! });
//! t.join().unwrap();
//!
//! c.close();
//! assert_eq!(c.recv(), None);
//! ```
mod core;
mod typed;

pub(crate) use self::core::{Core, RawChan};
pub use typed::{Chan, Iter, OptChanExt};
