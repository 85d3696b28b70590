//! Counting barrier
//!
//! A [`WaitGroup`] tracks a set of in-flight tasks: [`WaitGroup::add`] before
//! handing work out, [`WaitGroup::done`] as each task finishes, and
//! [`WaitGroup::wait`] blocks until the counter returns to zero.

use parking_lot::{Condvar, Mutex};

/// A counter that releases waiters when it reaches zero.
pub struct WaitGroup {
    state: Mutex<i64>,
    cv: Condvar,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::with_count(0)
    }

    /// A group that already accounts for `n` tasks.
    pub fn with_count(n: i64) -> Self {
        Self {
            state: Mutex::new(n),
            cv: Condvar::new(),
        }
    }

    /// Adjusts the counter by `n` (which may be negative). Reaching zero
    /// releases every waiter.
    ///
    /// # Panics
    ///
    /// Panics if the counter goes negative.
    pub fn add(&self, n: i64) {
        let mut state = self.state.lock();
        *state += n;
        if *state < 0 {
            panic!("negative wait group counter");
        }
        if *state == 0 {
            drop(state);
            self.cv.notify_all();
        }
    }

    /// Marks one task finished.
    pub fn done(&self) {
        self.add(-1);
    }

    /// Blocks until the counter is zero.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while *state > 0 {
            self.cv.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use super::*;

    /// wait returns only after every task called done
    #[test]
    fn test_wait_for_all() {
        let wg = Arc::new(WaitGroup::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let n = 8;
        wg.add(n as i64);
        for _ in 0..n {
            let (wg, finished) = (wg.clone(), finished.clone());
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                finished.fetch_add(1, Ordering::SeqCst);
                wg.done();
            });
        }
        wg.wait();
        assert_eq!(finished.load(Ordering::SeqCst), n);
    }

    /// wait on a zero counter does not block
    #[test]
    fn test_wait_when_zero() {
        let wg = WaitGroup::new();
        wg.wait();
        WaitGroup::with_count(2).add(-2);
    }

    /// wait blocks while the counter is positive
    #[test]
    fn test_wait_blocks() {
        let wg = Arc::new(WaitGroup::with_count(1));
        let released = Arc::new(AtomicBool::new(false));
        let (w, r) = (wg.clone(), released.clone());
        let t = thread::spawn(move || {
            w.wait();
            r.store(true, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(10));
        assert!(!released.load(Ordering::SeqCst));
        wg.done();
        t.join().unwrap();
        assert!(released.load(Ordering::SeqCst));
    }

    /// Several concurrent waiters are all released together
    #[test]
    fn test_many_waiters() {
        let wg = Arc::new(WaitGroup::with_count(1));
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let wg = wg.clone();
            waiters.push(thread::spawn(move || wg.wait()));
        }
        thread::sleep(Duration::from_millis(5));
        wg.done();
        for t in waiters {
            t.join().unwrap();
        }
    }

    /// The group is reusable across waves
    #[test]
    fn test_reuse() {
        let wg = Arc::new(WaitGroup::new());
        for _ in 0..3 {
            wg.add(2);
            for _ in 0..2 {
                let wg = wg.clone();
                thread::spawn(move || wg.done());
            }
            wg.wait();
        }
    }

    #[test]
    #[should_panic(expected = "negative wait group counter")]
    fn test_negative_counter_panics() {
        let wg = WaitGroup::new();
        wg.done();
    }
}
