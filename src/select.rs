//! Multi-way channel choice
//!
//! [`select`] blocks over any mix of send and receive cases on any set of
//! channels and returns the index of the one case that ran. A ready case is
//! chosen uniformly at random; a [`default_case`] makes the whole operation
//! non-blocking. Cases over a nil channel (`None`) never become ready.
//!
//! ## Protocol
//!
//! Cases are polled in a fresh random permutation (fairness) while channel
//! mutexes are held in address order (deadlock freedom among concurrent
//! selects sharing channels). If nothing is ready and there is no default,
//! one waiter node per case is enqueued and the thread parks; the first
//! channel to claim the thread's `select_done` flag wins, and a cleanup pass
//! unlinks the losers.
//!
//! ## Example
//!
//!```
//! use runnel::{Chan, default_case, select};
//!
//! let c1 = Chan::<i32>::new(1);
//! let c2 = Chan::<i32>::new(1);
//! c2.send(9);
//!
//! let mut v1 = None;
//! let mut v2 = None;
//! let i = select(&mut [
//!     c1.recv_case(&mut v1),
//!     c2.recv_case(&mut v2),
//!     default_case(),
//! ]);
//! assert_eq!(i, 1);
//! assert_eq!(v2, Some(9));
//! ```

use parking_lot::MutexGuard;
use rand::Rng;

use crate::{
    chan::{Chan, Core, RawChan},
    park,
    waitq::Waiter,
};

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Send,
    Recv,
    Default,
}

/// One case of a [`select`]: a direction, an optional channel, and a pointer
/// to the caller's source or destination slot.
///
/// Built with [`Chan::send_case`]/[`Chan::recv_case`], the nil-aware free
/// constructors [`send_case`]/[`recv_case`], or [`default_case`].
pub struct SelectCase<'a> {
    dir: Direction,
    chan: Option<&'a (dyn RawChan + 'a)>,
    value: *mut (),
}

impl<'a> SelectCase<'a> {
    pub(crate) fn send(chan: Option<&'a (dyn RawChan + 'a)>, value: *mut ()) -> Self {
        Self {
            dir: Direction::Send,
            chan,
            value,
        }
    }

    pub(crate) fn recv(chan: Option<&'a (dyn RawChan + 'a)>, value: *mut ()) -> Self {
        Self {
            dir: Direction::Recv,
            chan,
            value,
        }
    }
}

/// A send case over an optional channel handle; a `None` channel never
/// becomes ready. See [`Chan::send_case`].
pub fn send_case<'a, T>(chan: Option<&'a Chan<T>>, src: &'a mut Option<T>) -> SelectCase<'a> {
    SelectCase::send(chan.map(Chan::raw), (&raw mut *src).cast())
}

/// A receive case over an optional channel handle; a `None` channel never
/// becomes ready. See [`Chan::recv_case`].
pub fn recv_case<'a, T>(chan: Option<&'a Chan<T>>, dst: &'a mut Option<T>) -> SelectCase<'a> {
    SelectCase::recv(chan.map(Chan::raw), (&raw mut *dst).cast())
}

/// The non-blocking alternative: chosen iff no other case is ready.
pub fn default_case() -> SelectCase<'static> {
    SelectCase {
        dir: Direction::Default,
        chan: None,
        value: std::ptr::null_mut(),
    }
}

fn addr(c: &SelectCase<'_>) -> usize {
    c.chan.map_or(0, |c| std::ptr::from_ref(c.core()) as usize)
}

/// Locks every distinct channel in `lockorder` (which is address-sorted, so
/// duplicates are adjacent).
fn sellock<'a>(cases: &[SelectCase<'a>], lockorder: &[usize]) -> Vec<MutexGuard<'a, ()>> {
    let mut guards = Vec::with_capacity(lockorder.len());
    let mut prev = 0usize;
    for &i in lockorder {
        let core: &'a Core = cases[i].chan.expect("nil channel in lock order").core();
        if std::ptr::from_ref(core) as usize == prev {
            continue;
        }
        prev = std::ptr::from_ref(core) as usize;
        guards.push(core.mu.lock());
    }
    guards
}

/// Blocks over `cases` until one can run, and returns its index.
///
/// Guarantees, per completed call:
/// - exactly one case runs, chosen uniformly among those ready;
/// - with a [`default_case`], never blocks: the default's index is returned
///   when nothing is ready;
/// - with no cases (or only nil channels and no default), blocks forever.
///
/// # Panics
///
/// Panics on contract violations: more than one default case, or a send case
/// whose channel is (or becomes) closed.
pub fn select(cases: &mut [SelectCase<'_>]) -> usize {
    let cases = &*cases;
    if cases.is_empty() {
        park::forever_sleep();
    }

    let mut dflt = None;
    let mut actives = 0;
    for (i, c) in cases.iter().enumerate() {
        if c.dir == Direction::Default {
            if dflt.is_some() {
                panic!("multiple default cases in select");
            }
            dflt = Some(i);
        } else if c.chan.is_some() {
            actives += 1;
        }
    }
    if actives == 0 {
        // Nothing can ever become ready
        match dflt {
            Some(i) => return i,
            None => park::forever_sleep(),
        }
    }

    // Poll order: insertion shuffle of the active cases
    let mut rng = rand::thread_rng();
    let mut pollorder = Vec::with_capacity(actives);
    for (i, c) in cases.iter().enumerate() {
        if c.dir == Direction::Default || c.chan.is_none() {
            continue;
        }
        let j = rng.gen_range(0..=pollorder.len());
        pollorder.push(i);
        let last = pollorder.len() - 1;
        pollorder.swap(j, last);
    }

    // Lock order: the same cases sorted by channel address
    let mut lockorder = pollorder.clone();
    lockorder.sort_unstable_by_key(|&i| addr(&cases[i]));

    let guards = sellock(cases, &lockorder);

    // Pass 1 - complete against something already waiting or buffered
    for &i in &pollorder {
        let c = cases[i].chan.expect("nil channel in poll order");
        let core = c.core();
        match cases[i].dir {
            Direction::Send => {
                if core.is_closed() {
                    drop(guards);
                    panic!("send on closed channel");
                }
                if let Some(w) = unsafe { core.recvq().dequeue() } {
                    unsafe { c.send_to_waiter(cases[i].value, w) };
                    drop(guards);
                    return i;
                }
                if core.len() < core.cap() {
                    unsafe { c.send_to_buf(cases[i].value) };
                    drop(guards);
                    return i;
                }
            }
            Direction::Recv => {
                if let Some(w) = unsafe { core.sendq().dequeue() } {
                    unsafe { c.recv_from_waiter(cases[i].value, w) };
                    drop(guards);
                    return i;
                }
                if core.len() > 0 {
                    unsafe { c.recv_from_buf(cases[i].value) };
                    drop(guards);
                    return i;
                }
                if core.is_closed() {
                    unsafe { c.reset(cases[i].value) };
                    drop(guards);
                    return i;
                }
            }
            Direction::Default => unreachable!(),
        }
    }

    if let Some(i) = dflt {
        drop(guards);
        return i;
    }

    // Pass 2 - enqueue on every channel and park
    let waiters: Vec<Waiter> = lockorder
        .iter()
        .map(|&i| Waiter::new(cases[i].value, true))
        .collect();
    for (w, &i) in waiters.iter().zip(&lockorder) {
        let core = cases[i].chan.expect("nil channel in lock order").core();
        match cases[i].dir {
            Direction::Send => unsafe { core.sendq().enqueue(w) },
            Direction::Recv => unsafe { core.recvq().enqueue(w) },
            Direction::Default => unreachable!(),
        }
    }
    let this = park::current();
    {
        let mut guard = this.mu.lock();
        this.arm_select();
        drop(guards);
        while !this.select_done() {
            this.cv.wait(&mut guard);
        }
    }

    // Pass 3 - unlink the losers, identify the winner
    let guards = sellock(cases, &lockorder);
    let mut winner = None;
    for (w, &i) in waiters.iter().zip(&lockorder) {
        if w.done_waiting() {
            winner = Some((i, w));
        } else {
            let core = cases[i].chan.expect("nil channel in lock order").core();
            match cases[i].dir {
                Direction::Send => unsafe { core.sendq().unlink(w) },
                Direction::Recv => unsafe { core.recvq().unlink(w) },
                Direction::Default => unreachable!(),
            }
        }
    }
    let Some((casei, w)) = winner else {
        drop(guards);
        panic!("bad wakeup in select");
    };
    if cases[casei].dir == Direction::Send && w.woken_by_close() {
        drop(guards);
        panic!("send on closed channel");
    }
    drop(guards);
    casei
}
