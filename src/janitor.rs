//! Background purge of expired key records.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::{Keychain, Store};

#[derive(Default)]
struct Stop {
    requested: Mutex<bool>,
    signal: Condvar,
}

impl Stop {
    /// Sleeps for `interval` unless stopped first, returns whether to stop
    fn wait(&self, interval: Duration) -> bool {
        let mut requested = self.requested.lock();
        if !*requested {
            self.signal
                .wait_while_for(&mut requested, |requested| !*requested, interval);
        }
        *requested
    }

    fn request(&self) {
        *self.requested.lock() = true;
        self.signal.notify_all();
    }
}

/// Thread calling [`Keychain::purge_expired`] at a fixed interval.
///
/// Holds only a weak reference, so it winds down by itself once the last
/// [`Arc`] to the keychain is gone. Dropping the janitor stops it too.
pub struct Janitor {
    stop: Arc<Stop>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Janitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Janitor")
            .field("running", &self.handle.as_ref().is_some_and(|h| !h.is_finished()))
            .finish()
    }
}

impl Janitor {
    pub fn spawn<S: Store + 'static>(
        keychain: &Arc<Keychain<S>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let keychain = Arc::downgrade(keychain);
        let stop = Arc::new(Stop::default());

        let handle = std::thread::Builder::new()
            .name("keychain-janitor".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || run(keychain, &stop, interval)
            })?;

        tracing::debug!(?interval, "janitor started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for the purge in progress, if any
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.request();
        if handle.join().is_err() {
            tracing::error!("janitor thread panicked");
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run<S: Store>(keychain: Weak<Keychain<S>>, stop: &Stop, interval: Duration) {
    while !stop.wait(interval) {
        let Some(keychain) = keychain.upgrade() else {
            tracing::debug!("keychain dropped, janitor exiting");
            return;
        };
        if let Err(error) = keychain.purge_expired() {
            tracing::warn!(%error, "purging expired keys failed");
        }
    }
    tracing::debug!("janitor stopped");
}
