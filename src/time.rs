//! Single-shot timers
//!
//! A [`Timer`] arms a worker thread that, after the duration elapses, either
//! sends the elapsed time on the timer's channel or runs a callback. A timer
//! fires at most once per arming; [`Timer::stop`] reports which side won the
//! race, and [`Timer::reset`] re-arms a timer that has fired or been stopped.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::chan::Chan;

/// A one-shot timer backed by a worker thread per arming.
pub struct Timer {
    c: Chan<Duration>,
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

struct Shared {
    /// True while armed and not yet fired or stopped.
    active: Mutex<bool>,
    cv: Condvar,
}

/// The worker's bounded sleep. Returns true when the timer was stopped
/// before the deadline, false when it should fire.
fn stopped(shared: &Shared, d: Duration) -> bool {
    let deadline = Instant::now() + d;
    let mut active = shared.active.lock();
    let mut timed_out = false;
    while *active {
        if shared.cv.wait_until(&mut active, deadline).timed_out() {
            timed_out = true;
            break;
        }
    }
    *active = false;
    !timed_out
}

impl Timer {
    /// Arms a timer that will send the elapsed duration on [`Timer::c`]
    /// once `d` has passed.
    pub fn new(d: Duration) -> Self {
        // Capacity 1: the fire never blocks, even with no receiver yet
        let c = Chan::new(1);
        let shared = Arc::new(Shared {
            active: Mutex::new(true),
            cv: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            let c = c.clone();
            thread::spawn(move || {
                let begin = Instant::now();
                if !stopped(&shared, d) {
                    trace!(target: "runnel::time", ?d, "timer fired");
                    c.send(begin.elapsed());
                }
            })
        };
        Self {
            c,
            shared,
            worker: Some(worker),
        }
    }

    /// Arms a timer that runs `f` once `d` has passed.
    pub fn with_callback<F>(d: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let c = Chan::new(1);
        let shared = Arc::new(Shared {
            active: Mutex::new(true),
            cv: Condvar::new(),
        });
        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                if !stopped(&shared, d) {
                    trace!(target: "runnel::time", ?d, "timer fired (callback)");
                    f();
                }
            })
        };
        Self {
            c,
            shared,
            worker: Some(worker),
        }
    }

    /// The channel the timer fires on. Carries one value per arming that
    /// expires; an arming that is stopped in time never produces one.
    pub fn c(&self) -> &Chan<Duration> {
        &self.c
    }

    /// Stops the timer, returning true iff it had not yet fired (or been
    /// stopped). The worker is joined either way, so after `stop` returns
    /// no callback is running.
    pub fn stop(&mut self) -> bool {
        let was_active = {
            let mut active = self.shared.active.lock();
            let was = *active;
            *active = false;
            was
        };
        if was_active {
            trace!(target: "runnel::time", "timer stopped");
            self.shared.cv.notify_one();
        }
        if let Some(w) = self.worker.take() {
            w.join().expect("timer worker panicked");
        }
        was_active
    }

    /// Re-arms a stopped or fired timer to send on [`Timer::c`] after `d`.
    ///
    /// # Panics
    ///
    /// Panics if the timer is still armed; call [`Timer::stop`] first.
    pub fn reset(&mut self, d: Duration) {
        self.rearm();
        let shared = Arc::clone(&self.shared);
        let c = self.c.clone();
        self.worker = Some(thread::spawn(move || {
            let begin = Instant::now();
            if !stopped(&shared, d) {
                trace!(target: "runnel::time", ?d, "timer fired");
                c.send(begin.elapsed());
            }
        }));
    }

    /// Re-arms a stopped or fired timer to run `f` after `d`.
    ///
    /// # Panics
    ///
    /// Panics if the timer is still armed; call [`Timer::stop`] first.
    pub fn reset_with<F>(&mut self, d: Duration, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.rearm();
        let shared = Arc::clone(&self.shared);
        self.worker = Some(thread::spawn(move || {
            if !stopped(&shared, d) {
                trace!(target: "runnel::time", ?d, "timer fired (callback)");
                f();
            }
        }));
    }

    fn rearm(&mut self) {
        {
            let active = self.shared.active.lock();
            if *active {
                panic!("reset on active timer");
            }
        }
        // The previous worker is past its wait loop; join cannot block on it
        if let Some(w) = self.worker.take() {
            w.join().expect("timer worker panicked");
        }
        *self.shared.active.lock() = true;
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
