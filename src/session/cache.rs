//! Single-flight session cache
//!
//! Concurrent acquisitions for the same key share one in-flight fetch. The
//! fetch runs in its own task, so a waiter that is cancelled does not cancel
//! the fetch for everyone else.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{Session, SessionKey};
use crate::error::BrokerError;

type Outcome = Result<Arc<Session>, BrokerError>;

enum Slot {
    Ready(Arc<Session>),
    Pending {
        flight: u64,
        rx: watch::Receiver<Option<Outcome>>,
    },
}

#[derive(Default)]
struct Slots {
    entries: HashMap<SessionKey, Slot>,
    next_flight: u64,
}

/// Cache of live sessions keyed by (account, role chain, region).
///
/// Created empty; dropping it drops every entry. Nothing is persisted.
pub struct SessionCache {
    slots: Arc<Mutex<Slots>>,
    safety_margin: Duration,
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    // The map is left consistent between statements, so a poisoned lock is
    // still safe to use.
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionCache {
    pub fn new(safety_margin: std::time::Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots::default())),
            safety_margin: Duration::from_std(safety_margin).unwrap_or_else(|_| Duration::minutes(5)),
        }
    }

    /// Return a fresh session for `key`, running `fetch` at most once per
    /// refresh no matter how many callers are waiting.
    ///
    /// A cached session inside the safety margin is never returned; the
    /// caller waits on a refresh instead.
    pub async fn acquire<F, Fut>(&self, key: SessionKey, fetch: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session, BrokerError>> + Send + 'static,
    {
        let (flight, rx) = {
            let mut slots = lock(&self.slots);

            let joined = match slots.entries.get(&key) {
                Some(Slot::Ready(session)) if session.is_fresh(Utc::now(), self.safety_margin) => {
                    debug!(key = %key, "Session cache hit");
                    return Ok(Arc::clone(session));
                }
                Some(Slot::Pending { flight, rx }) => {
                    debug!(key = %key, flight = *flight, "Joining in-flight acquisition");
                    Some((*flight, rx.clone()))
                }
                Some(Slot::Ready(_)) => {
                    info!(key = %key, "Cached session inside safety margin, refreshing");
                    None
                }
                None => None,
            };

            match joined {
                Some(pending) => pending,
                None => {
                    let flight = slots.next_flight;
                    slots.next_flight += 1;

                    let (tx, rx) = watch::channel(None);
                    slots.entries.insert(
                        key.clone(),
                        Slot::Pending {
                            flight,
                            rx: rx.clone(),
                        },
                    );

                    tokio::spawn(run_flight(
                        Arc::clone(&self.slots),
                        key.clone(),
                        flight,
                        fetch(),
                        tx,
                    ));
                    (flight, rx)
                }
            }
        };

        self.wait(&key, flight, rx).await
    }

    async fn wait(
        &self,
        key: &SessionKey,
        flight: u64,
        mut rx: watch::Receiver<Option<Outcome>>,
    ) -> Outcome {
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };

        match outcome {
            Some(outcome) => outcome,
            None => {
                // Fetch task ended without publishing (panicked).
                let mut slots = lock(&self.slots);
                if matches!(slots.entries.get(key), Some(Slot::Pending { flight: f, .. }) if *f == flight)
                {
                    slots.entries.remove(key);
                }
                warn!(key = %key, "Session acquisition aborted");
                Err(BrokerError::Trust {
                    hop: 0,
                    role_arn: key.role_chain.last().cloned().unwrap_or_default(),
                    message: "session acquisition aborted".to_string(),
                })
            }
        }
    }

    /// Drop every session (ready or in flight) for `account_id`.
    ///
    /// Waiters already joined to an in-flight fetch still receive its
    /// result, but the result is not cached.
    pub fn invalidate(&self, account_id: &str) -> usize {
        let mut slots = lock(&self.slots);
        let before = slots.entries.len();
        slots.entries.retain(|key, _| key.account_id != account_id);
        let removed = before - slots.entries.len();

        if removed > 0 {
            info!(account_id = %account_id, removed, "Invalidated cached sessions");
        }
        removed
    }

    pub fn clear(&self) {
        lock(&self.slots).entries.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn run_flight<Fut>(
    slots: Arc<Mutex<Slots>>,
    key: SessionKey,
    flight: u64,
    fetch: Fut,
    tx: watch::Sender<Option<Outcome>>,
) where
    Fut: Future<Output = Result<Session, BrokerError>>,
{
    let outcome = fetch.await.map(Arc::new);

    {
        let mut slots = lock(&slots);
        let still_current = matches!(
            slots.entries.get(&key),
            Some(Slot::Pending { flight: f, .. }) if *f == flight
        );

        if still_current {
            match &outcome {
                Ok(session) => {
                    slots
                        .entries
                        .insert(key.clone(), Slot::Ready(Arc::clone(session)));
                }
                Err(_) => {
                    slots.entries.remove(&key);
                }
            }
        } else {
            debug!(key = %key, flight, "Discarding result of invalidated acquisition");
        }
    }

    tx.send_replace(Some(outcome));
}
