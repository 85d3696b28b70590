//! Go-style concurrency primitives for native threads
//!
//! The core is a blocking MPMC [`Chan`] with Go channel semantics (bounded
//! or rendezvous, closable, FIFO per side) and a multi-way [`select`] with
//! Go's fairness and single-winner guarantees. On top of the core sit the
//! derived primitives Go programs lean on:
//!
//! - [`context`]: cancellation trees with deadlines and request values
//! - [`time::Timer`]: single-shot timers firing on a channel or a callback
//! - [`pipe`]: a synchronous in-memory byte pipe
//! - [`sync::WaitGroup`]: a counting barrier
//!
//! Blocking parks the calling OS thread on a per-thread condition variable;
//! there is no runtime and no executor. Contract violations (sending on a
//! closed channel, closing twice, a negative wait-group counter) panic;
//! expected outcomes are plain values.
//!
//!```
//! use runnel::{Chan, default_case, select};
//!
//! let jobs = Chan::new(4);
//! let done = Chan::<()>::new(0);
//!
//! let (jrx, drx) = (jobs.clone(), done.clone());
//! let worker = std::thread::spawn(move || {
//!     let mut sum = 0;
//!     for job in &jrx {
//!         sum += job;
//!     }
//!     drx.send(());
//!     sum
//! });
//!
//! for i in 0..10 {
//!     jobs.send(i);
//! }
//! jobs.close();
//! done.recv().unwrap();
//! assert_eq!(worker.join().unwrap(), 45);
//! ```

pub mod chan;
pub mod context;
pub mod pipe;
pub mod select;
pub mod sync;
pub mod time;

mod park;
mod ring;
mod waitq;

pub use chan::{Chan, Iter, OptChanExt};
pub use select::{SelectCase, default_case, recv_case, select, send_case};
pub use sync::WaitGroup;
pub use time::Timer;
