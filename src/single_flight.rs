//! Coalesced execution: the first caller runs the operation, concurrent
//! callers wait for it and share its result.
//!
//! A flight is used exactly once. When it lands (or its leader unwinds) it is
//! detached from the [`Coalescer`], so the next call starts a new flight
//! instead of replaying a stale outcome forever.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::{Condvar, Mutex};

enum Outcome<T> {
    Pending,
    Landed(T),
    Abandoned,
}

struct Flight<T> {
    outcome: Mutex<Outcome<T>>,
    landed: Condvar,
    waiters: AtomicUsize,
}

impl<T: Clone> Flight<T> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(Outcome::Pending),
            landed: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    fn wait(&self) -> Option<T> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut outcome = self.outcome.lock();
        loop {
            match &*outcome {
                Outcome::Pending => self.landed.wait(&mut outcome),
                Outcome::Landed(value) => return Some(value.clone()),
                Outcome::Abandoned => return None,
            }
        }
    }
}

/// Holds at most one in-flight operation at a time
pub(crate) struct Coalescer<T> {
    in_flight: Mutex<Option<Arc<Flight<T>>>>,
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(None),
        }
    }
}

impl<T: Clone> Coalescer<T> {
    /// Runs `operation` unless a flight is already underway, in which case the
    /// caller blocks and receives a clone of that flight's result.
    ///
    /// Returns `None` only if the leading caller panicked before producing a
    /// result.
    pub(crate) fn run(&self, operation: impl FnOnce() -> T) -> Option<T> {
        let flight = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.as_ref() {
                Some(flight) => Some(Arc::clone(flight)),
                None => {
                    *in_flight = Some(Arc::new(Flight::new()));
                    None
                }
            }
        };

        if let Some(flight) = flight {
            return flight.wait();
        }

        let pilot = Pilot {
            in_flight: &self.in_flight,
            landed: false,
        };
        let value = operation();
        pilot.land(value.clone());
        Some(value)
    }

    /// Callers currently waiting on the in-flight operation
    #[cfg(test)]
    pub(crate) fn waiters(&self) -> usize {
        self.in_flight
            .lock()
            .as_ref()
            .map_or(0, |flight| flight.waiters.load(Ordering::SeqCst))
    }
}

/// Owned by the leading caller; detaches and resolves the flight on every exit
struct Pilot<'a, T: Clone> {
    in_flight: &'a Mutex<Option<Arc<Flight<T>>>>,
    landed: bool,
}

impl<T: Clone> Pilot<'_, T> {
    fn land(mut self, value: T) {
        self.resolve(Outcome::Landed(value));
        self.landed = true;
    }

    fn resolve(&self, outcome: Outcome<T>) {
        let Some(flight) = self.in_flight.lock().take() else {
            return;
        };
        *flight.outcome.lock() = outcome;
        flight.landed.notify_all();
    }
}

impl<T: Clone> Drop for Pilot<'_, T> {
    fn drop(&mut self) {
        if !self.landed {
            self.resolve(Outcome::Abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::time::{Duration, Instant};

    const CALLERS: usize = 100;

    /// Blocks the leader until every other caller has joined its flight
    fn wait_for_waiters<T: Clone>(coalescer: &Coalescer<T>, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while coalescer.waiters() < expected {
            assert!(Instant::now() < deadline, "callers never joined the flight");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn concurrent_callers_share_one_run() {
        let coalescer = Coalescer::<u32>::default();
        let runs = AtomicUsize::new(0);

        let results: Vec<Option<u32>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    scope.spawn(|| {
                        coalescer.run(|| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            wait_for_waiters(&coalescer, CALLERS - 1);
                            42
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == Some(42)));
    }

    #[test]
    fn errors_are_shared_too() {
        let coalescer = Coalescer::<Result<u32, String>>::default();
        let runs = AtomicUsize::new(0);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        coalescer.run(|| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            wait_for_waiters(&coalescer, 7);
                            Err("some error".to_string())
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results
            .iter()
            .all(|r| *r == Some(Err("some error".to_string()))));
    }

    #[test]
    fn each_completed_flight_is_replaced() {
        let coalescer = Coalescer::<usize>::default();
        let runs = AtomicUsize::new(0);

        for expected in 1..=100 {
            let result = coalescer.run(|| runs.fetch_add(1, Ordering::SeqCst) + 1);
            assert_eq!(result, Some(expected));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn failed_flight_does_not_block_the_next_one() {
        let coalescer = Coalescer::<Result<u32, String>>::default();
        assert_eq!(coalescer.run(|| Err("boom".into())), Some(Err("boom".into())));
        assert_eq!(coalescer.run(|| Ok(7)), Some(Ok(7)));
    }

    #[test]
    fn panicking_leader_releases_waiters() {
        let coalescer = Coalescer::<u32>::default();

        let waited = std::thread::scope(|scope| {
            let leader = scope.spawn(|| {
                catch_unwind(AssertUnwindSafe(|| {
                    coalescer.run(|| {
                        wait_for_waiters(&coalescer, 1);
                        panic!("leader crashed");
                    })
                }))
            });
            // Only start the follower once the leader owns the flight
            while coalescer.in_flight.lock().is_none() {
                std::thread::yield_now();
            }
            let follower = scope.spawn(|| coalescer.run(|| 1));

            assert!(leader.join().unwrap().is_err());
            follower.join().unwrap()
        });

        assert_eq!(waited, None);
        assert_eq!(coalescer.run(|| 9), Some(9));
    }
}
