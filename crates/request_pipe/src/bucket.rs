//! In-flight Request Registry
//!
//! The bucket maps a request identity to the call currently holding it. With
//! `unique` enabled it guarantees at most one live call per identity inside
//! the configured grace window; what happens to the newcomer is decided by
//! the [`DuplicatePolicy`].
//!
//! Admission is a single check-and-set under the map's entry lock, so two
//! concurrent calls can never both observe an empty slot for the same key.
//!
//! Every admitted call receives a [`Slot`]. Dropping the slot releases the
//! entry, which makes release unconditional on every exit path. Each entry
//! carries a ticket, and a slot only ever removes the entry with its own
//! ticket: a superseded call finishing late cannot evict its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::config::PipeConfig;
use crate::transport::{CancelHandle, TransportResponse};

/// What a duplicate call does while the earlier call is still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// The newer call fails with `DuplicateRequest`.
    #[default]
    Reject,
    /// The earlier call is cancelled and the newer one takes over the key.
    Supersede,
    /// The newer call waits for the earlier call's result and shares it.
    Coalesce,
}

/// Result published by a leader to any coalesced followers.
pub type SharedOutcome = Result<TransportResponse, String>;

struct BucketEntry {
    ticket: u64,
    cancel: CancelHandle,
    registered_at: Instant,
    outcome: Arc<OutcomeSender>,
}

type OutcomeSender = watch::Sender<Option<SharedOutcome>>;

impl BucketEntry {
    fn new(ticket: u64, cancel: CancelHandle) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            ticket,
            cancel,
            registered_at: Instant::now(),
            outcome: Arc::new(outcome),
        }
    }
}

struct BucketInner {
    entries: DashMap<String, BucketEntry>,
    unique: bool,
    unique_interval: Option<Duration>,
    policy: DuplicatePolicy,
    next_ticket: AtomicU64,
}

impl BucketInner {
    fn release(&self, key: &str, ticket: u64) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.ticket == ticket)
            .is_some()
    }

    fn is_live(&self, entry: &BucketEntry, now: Instant) -> bool {
        match self.unique_interval {
            Some(window) => now.duration_since(entry.registered_at) < window,
            None => true,
        }
    }
}

/// Outcome of [`Bucket::register`].
pub enum Admission {
    /// The key was free (or expired); the call proceeds holding the slot.
    Accepted(Slot),
    /// An earlier call was cancelled; the call proceeds holding the slot.
    Superseded(Slot),
    /// A live call already holds the key.
    Rejected,
    /// A live call already holds the key; wait on its result instead.
    Coalesced(PendingResult),
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Admission::Accepted(slot) => f.debug_tuple("Accepted").field(slot).finish(),
            Admission::Superseded(slot) => f.debug_tuple("Superseded").field(slot).finish(),
            Admission::Rejected => f.write_str("Rejected"),
            Admission::Coalesced(_) => f.write_str("Coalesced"),
        }
    }
}

#[derive(Clone)]
pub struct Bucket {
    inner: Arc<BucketInner>,
}

impl Bucket {
    pub fn new(unique: bool, unique_interval: Option<Duration>, policy: DuplicatePolicy) -> Self {
        Self {
            inner: Arc::new(BucketInner {
                entries: DashMap::new(),
                unique,
                unique_interval,
                policy,
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_config(config: &PipeConfig) -> Self {
        Self::new(
            config.unique,
            config.unique_interval(),
            config.duplicate_policy,
        )
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.inner.policy
    }

    /// Claim `key` for a new call.
    ///
    /// With `unique` disabled this always accepts, replacing any previous
    /// entry so that [`Bucket::cancel`] targets the latest call.
    pub fn register(&self, key: &str, cancel: CancelHandle) -> Admission {
        let inner = &self.inner;
        let ticket = inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let entry = BucketEntry::new(ticket, cancel);
        let outcome = Arc::clone(&entry.outcome);

        match inner.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                debug!(key, ticket, "Bucket slot acquired");
                Admission::Accepted(self.slot(key, ticket, outcome))
            }
            Entry::Occupied(mut occupied) => {
                if !inner.unique || !inner.is_live(occupied.get(), Instant::now()) {
                    occupied.insert(entry);
                    debug!(key, ticket, "Bucket slot replaced");
                    return Admission::Accepted(self.slot(key, ticket, outcome));
                }

                match inner.policy {
                    DuplicatePolicy::Reject => {
                        debug!(key, "Duplicate rejected");
                        Admission::Rejected
                    }
                    DuplicatePolicy::Supersede => {
                        let previous = occupied.insert(entry);
                        previous.cancel.cancel();
                        debug!(key, ticket, previous = previous.ticket, "Duplicate superseded earlier call");
                        Admission::Superseded(self.slot(key, ticket, outcome))
                    }
                    DuplicatePolicy::Coalesce => {
                        debug!(key, leader = occupied.get().ticket, "Duplicate coalesced");
                        Admission::Coalesced(PendingResult {
                            receiver: occupied.get().outcome.subscribe(),
                        })
                    }
                }
            }
        }
    }

    /// Remove the entry for `key` regardless of who holds it. Missing keys are a no-op.
    pub fn pop(&self, key: &str) {
        self.inner.entries.remove(key);
    }

    /// Fire the cancel handle of the call holding `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let handle = self
            .inner
            .entries
            .get(key)
            .map(|entry| entry.cancel.clone());
        match handle {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn slot(&self, key: &str, ticket: u64, outcome: Arc<OutcomeSender>) -> Slot {
        Slot {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            ticket,
            outcome,
        }
    }
}

/// Ownership of one bucket entry. Releases the entry when dropped.
///
/// The slot shares its entry's result channel, so followers attached to the
/// entry still get the result after the entry expires and is replaced.
pub struct Slot {
    inner: Arc<BucketInner>,
    key: String,
    ticket: u64,
    outcome: Arc<OutcomeSender>,
}

impl Slot {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish the call's result to coalesced followers, then release.
    pub fn complete(self, outcome: SharedOutcome) {
        self.outcome.send_replace(Some(outcome));
        // Drop releases.
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.inner.release(&self.key, self.ticket) {
            debug!(key = %self.key, ticket = self.ticket, "Bucket slot released");
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .finish()
    }
}

/// A coalesced follower's view of the leader's eventual result.
pub struct PendingResult {
    receiver: watch::Receiver<Option<SharedOutcome>>,
}

impl PendingResult {
    pub async fn wait(mut self) -> SharedOutcome {
        let outcome = match self.receiver.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err("in-flight request ended without a result".to_string()))
    }
}
