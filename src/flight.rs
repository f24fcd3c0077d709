//! Request coalescing.
//!
//! A [`Flight`] makes sure at most one call per key is in flight. The first
//! caller for a key becomes the leader and runs the work; callers arriving while
//! it runs wait and receive a clone of the leader's outcome.
//!
//! Dropping a waiter only stops that waiter from listening. Dropping the leader
//! abandons the call: it is removed and every waiter observes
//! [`GroupError::Cancelled`].

use crate::error::{GroupError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::watch;

type Outcome<T> = Option<Result<T>>;

pub struct Flight<T> {
    calls: Mutex<HashMap<String, Call<T>>>,
}

struct Call<T> {
    outcome: watch::Receiver<Outcome<T>>,
    waiters: usize,
}

enum Role<T> {
    Leader(watch::Sender<Outcome<T>>),
    Waiter(watch::Receiver<Outcome<T>>),
}

impl<T> Default for Flight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Flight<T> {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys with a call currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<T> Flight<T>
where
    T: Clone + Send + Sync,
{
    /// Run `work` for `key` unless a call for it is already running, in which
    /// case wait for that call and share its outcome.
    pub async fn execute<F, Fut>(&self, key: &str, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let role = {
            let mut calls = self.calls.lock();
            match calls.get_mut(key) {
                Some(call) => {
                    call.waiters += 1;
                    Role::Waiter(call.outcome.clone())
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    calls.insert(
                        key.to_string(),
                        Call {
                            outcome: rx,
                            waiters: 0,
                        },
                    );
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Waiter(mut rx) => {
                let outcome = rx
                    .wait_for(|outcome| outcome.is_some())
                    .await
                    .map_err(|_| GroupError::Cancelled)?;
                outcome.clone().unwrap_or(Err(GroupError::Cancelled))
            }
            Role::Leader(tx) => {
                let mut guard = CallGuard {
                    flight: self,
                    key,
                    armed: true,
                };
                let result = work().await;
                let waiters = guard.complete();
                if waiters > 0 {
                    tracing::trace!(key = %key, waiters, "sharing coalesced result");
                }
                // Receivers may all be gone already; the value is still stored.
                tx.send_replace(Some(result.clone()));
                result
            }
        }
    }
}

/// Removes the in-flight record when the leader finishes or is dropped.
struct CallGuard<'a, T> {
    flight: &'a Flight<T>,
    key: &'a str,
    armed: bool,
}

impl<T> CallGuard<'_, T> {
    fn complete(&mut self) -> usize {
        self.armed = false;
        self.flight
            .calls
            .lock()
            .remove(self.key)
            .map(|call| call.waiters)
            .unwrap_or(0)
    }
}

impl<T> Drop for CallGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.flight.calls.lock().remove(self.key);
            tracing::debug!(key = %self.key, "coalesced call abandoned by its leader");
        }
    }
}
