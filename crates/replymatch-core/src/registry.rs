use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::completion::Completer;
use crate::error::{MatchError, Result};
use crate::session::SessionId;
use crate::sweeper::Sweeper;

/// Roughly a century; used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Controls registry capacity and expiry cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Outstanding requests allowed per session before `add` refuses more.
    pub max_pending_per_session: usize,
    /// How often a [`crate::Sweeper`] checks for expired entries.
    pub sweep_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_pending_per_session: 256,
            sweep_interval: Duration::from_millis(100),
        }
    }
}

/// Lifecycle of a pending entry. Every state but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryState {
    Pending = 0,
    Resolved = 1,
    Expired = 2,
    Cancelled = 3,
}

impl EntryState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => EntryState::Pending,
            1 => EntryState::Resolved,
            2 => EntryState::Expired,
            _ => EntryState::Cancelled,
        }
    }
}

/// Lifetime counters for a registry.
#[derive(Debug, Default)]
pub struct MatchStats {
    pub registered: AtomicU64,
    pub matched: AtomicU64,
    pub expired: AtomicU64,
    pub cancelled: AtomicU64,
    /// `add` calls refused because the session was at capacity.
    pub rejected: AtomicU64,
}

struct PendingEntry<Q, R> {
    seq: u64,
    request: Q,
    registered_at: Instant,
    deadline: Instant,
    timeout: Duration,
    state: AtomicU8,
    completer: Mutex<Option<Completer<R>>>,
}

impl<Q, R> PendingEntry<Q, R> {
    fn state(&self) -> EntryState {
        EntryState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_pending(&self) -> bool {
        self.state() == EntryState::Pending
    }

    /// Move out of `Pending`. Only the single winning caller gets the completer.
    fn claim(&self, outcome: EntryState) -> Option<Completer<R>> {
        debug_assert_ne!(outcome, EntryState::Pending);
        self.state
            .compare_exchange(
                EntryState::Pending as u8,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;
        self.completer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

type Bucket<Q, R> = VecDeque<Arc<PendingEntry<Q, R>>>;

/// Outstanding requests, bucketed per session.
///
/// `Q` is the stored request, `R` the response handed to completions.
/// Within a session, entries are kept in registration order and
/// [`match_response`](Self::match_response) resolves the oldest one the
/// predicate accepts.
pub struct MatchRegistry<Q, R> {
    buckets: DashMap<SessionId, Bucket<Q, R>>,
    next_seq: AtomicU64,
    config: RegistryConfig,
    stats: MatchStats,
    /// Live sweeper handed out by [`Sweeper::shared`], if any.
    pub(crate) sweeper: Mutex<Weak<Sweeper>>,
}

impl<Q, R> MatchRegistry<Q, R> {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            next_seq: AtomicU64::new(1),
            config,
            stats: MatchStats::default(),
            sweeper: Mutex::new(Weak::new()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn stats(&self) -> &MatchStats {
        &self.stats
    }

    /// Register `request` as awaiting a reply on `session`.
    ///
    /// The entry expires `timeout` from now. Returns its sequence number, which
    /// [`cancel`](Self::cancel) accepts. When the session is already at
    /// capacity nothing is stored: `completer` is failed with
    /// [`MatchError::QueueFull`] and the same error is returned.
    pub fn add(
        &self,
        session: SessionId,
        request: Q,
        timeout: Duration,
        completer: Completer<R>,
    ) -> Result<u64> {
        let capacity = self.config.max_pending_per_session;
        let mut bucket = self.buckets.entry(session).or_default();
        if bucket.len() >= capacity {
            drop(bucket);
            self.buckets.remove_if(&session, |_, bucket| bucket.is_empty());
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(%session, capacity, "pending request refused, session at capacity");
            let err = MatchError::QueueFull { capacity };
            completer.fail(err.clone());
            return Err(err);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let registered_at = Instant::now();
        let deadline = registered_at
            .checked_add(timeout)
            .unwrap_or_else(|| registered_at + FAR_FUTURE);
        bucket.push_back(Arc::new(PendingEntry {
            seq,
            request,
            registered_at,
            deadline,
            timeout,
            state: AtomicU8::new(EntryState::Pending as u8),
            completer: Mutex::new(Some(completer)),
        }));
        let pending = bucket.len();
        drop(bucket);

        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        debug!(
            %session,
            seq,
            pending,
            timeout_ms = timeout.as_millis() as u64,
            "registered pending request"
        );
        Ok(seq)
    }

    /// Resolve the oldest pending entry on `session` that `is_match` accepts.
    ///
    /// Returns `false`, leaving the registry untouched, when no entry matches.
    /// `is_match` runs while the session's bucket is locked and must not call
    /// back into this registry.
    pub fn match_response<F>(&self, session: SessionId, response: &R, is_match: F) -> bool
    where
        R: Clone,
        F: Fn(&Q, &R) -> bool,
    {
        let claimed = {
            let Some(mut bucket) = self.buckets.get_mut(&session) else {
                return false;
            };

            let mut start = 0;
            let claimed = loop {
                let Some(offset) = bucket
                    .iter()
                    .skip(start)
                    .position(|entry| entry.is_pending() && is_match(&entry.request, response))
                else {
                    break None;
                };
                let index = start + offset;
                if let Some(completer) = bucket[index].claim(EntryState::Resolved) {
                    break bucket.remove(index).map(|entry| (entry, completer));
                }
                start = index + 1;
            };
            claimed
        };
        self.buckets.remove_if(&session, |_, bucket| bucket.is_empty());

        let Some((entry, completer)) = claimed else {
            return false;
        };
        self.stats.matched.fetch_add(1, Ordering::Relaxed);
        let delivered = completer.succeed(response.clone());
        debug!(
            %session,
            seq = entry.seq,
            elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
            delivered,
            "matched response to pending request"
        );
        true
    }

    /// Expire every pending entry whose deadline is at or before `now`.
    ///
    /// Each expired completion is failed with [`MatchError::Timeout`]. Returns
    /// the number of entries expired by this call.
    pub fn expire_due(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        for mut bucket in self.buckets.iter_mut() {
            let session = *bucket.key();
            bucket.retain(|entry| {
                if entry.deadline > now {
                    return true;
                }
                if let Some(completer) = entry.claim(EntryState::Expired) {
                    expired.push((session, Arc::clone(entry), completer));
                }
                false
            });
        }
        self.buckets.retain(|_, bucket| !bucket.is_empty());

        let count = expired.len();
        for (session, entry, completer) in expired {
            completer.fail(MatchError::Timeout(entry.timeout));
            debug!(
                %session,
                seq = entry.seq,
                timeout_ms = entry.timeout.as_millis() as u64,
                "pending request expired"
            );
        }
        self.stats
            .expired
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Fail and drop everything pending on `session`.
    ///
    /// Called when the connection goes away; each completion receives
    /// [`MatchError::ConnectionClosed`]. Returns how many were cancelled.
    pub fn cancel_session(&self, session: SessionId) -> usize {
        let Some((_, bucket)) = self.buckets.remove(&session) else {
            return 0;
        };

        let mut count = 0usize;
        for entry in bucket {
            if let Some(completer) = entry.claim(EntryState::Cancelled) {
                completer.fail(MatchError::ConnectionClosed);
                count += 1;
            }
        }
        self.stats
            .cancelled
            .fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            debug!(%session, cancelled = count, "cancelled pending requests");
        }
        count
    }

    /// Fail and drop the single entry `seq` on `session`.
    ///
    /// Used when a registered request never made it onto the wire. The
    /// completion receives [`MatchError::ConnectionClosed`]. Returns `false`
    /// when the entry was already resolved, expired or cancelled.
    pub fn cancel(&self, session: SessionId, seq: u64) -> bool {
        let completer = {
            let Some(mut bucket) = self.buckets.get_mut(&session) else {
                return false;
            };
            let Some(index) = bucket.iter().position(|entry| entry.seq == seq) else {
                return false;
            };
            let completer = bucket[index].claim(EntryState::Cancelled);
            bucket.remove(index);
            completer
        };
        self.buckets.remove_if(&session, |_, bucket| bucket.is_empty());

        let Some(completer) = completer else {
            return false;
        };
        completer.fail(MatchError::ConnectionClosed);
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        debug!(%session, seq, "cancelled pending request");
        true
    }

    /// Number of requests still pending on `session`.
    pub fn pending(&self, session: SessionId) -> usize {
        self.buckets
            .get(&session)
            .map_or(0, |bucket| bucket.iter().filter(|e| e.is_pending()).count())
    }

    /// Whether any pending request on `session` satisfies `predicate`.
    pub fn any_pending<F>(&self, session: SessionId, predicate: F) -> bool
    where
        F: Fn(&Q) -> bool,
    {
        self.buckets.get(&session).is_some_and(|bucket| {
            bucket
                .iter()
                .any(|entry| entry.is_pending() && predicate(&entry.request))
        })
    }

    /// Total pending requests across all sessions.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions that currently have pending requests.
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.buckets.iter().map(|b| *b.key()).collect();
        sessions.sort_unstable();
        sessions
    }

    /// Earliest deadline among pending entries, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buckets
            .iter()
            .filter_map(|bucket| bucket.iter().map(|entry| entry.deadline).min())
            .min()
    }
}

impl<Q, R> Default for MatchRegistry<Q, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Q, R> std::fmt::Debug for MatchRegistry<Q, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchRegistry")
            .field("sessions", &self.buckets.len())
            .field("pending", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
