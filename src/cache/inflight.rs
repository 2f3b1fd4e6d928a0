//! In-flight request coordination.
//!
//! The first request for a fingerprint becomes the *leader* and performs the
//! upstream call. Concurrent requests for the same fingerprint become
//! *followers*: they wait on the leader's marker and then re-check the result
//! cache instead of issuing duplicate calls.
//!
//! A marker is a `watch` channel: the leader owns the sender, followers hold
//! receivers. After signalling, the leader keeps its marker registered for a
//! short grace window before removing it. Each marker carries a generation so
//! a delayed removal never deletes a newer marker for the same fingerprint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use super::fingerprint::Fingerprint;
use crate::config::DedupConfig;

#[derive(Debug, Clone)]
struct MarkerSlot {
    generation: u64,
    done: watch::Receiver<bool>,
}

impl MarkerSlot {
    /// A marker is live until its leader has signalled or gone away.
    fn is_live(&self) -> bool {
        !*self.done.borrow() && self.done.has_changed().is_ok()
    }

    fn follow(&self, fingerprint: &Fingerprint) -> Marker {
        Marker {
            fingerprint: fingerprint.clone(),
            generation: self.generation,
            done: self.done.clone(),
        }
    }
}

/// Outcome of [`InFlightCoordinator::try_become_leader`].
#[derive(Debug)]
pub enum Role {
    /// The caller owns the upstream call and must release the guard.
    Leader(LeaderGuard),
    /// Another request is already working on this fingerprint.
    Follower(Marker),
}

/// Result of waiting on a leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The leader finished (successfully or not). Re-check the cache.
    Completed,
    /// The leader did not finish within the timeout.
    TimedOut,
}

/// Follower side of a marker.
#[derive(Debug, Clone)]
pub struct Marker {
    fingerprint: Fingerprint,
    generation: u64,
    done: watch::Receiver<bool>,
}

impl Marker {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Generation of the leader this marker belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Suspend until the leader signals or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, self.done.wait_for(|done| *done)).await {
            // A closed channel means the leader went away, which also wakes us.
            Ok(_) => WaitOutcome::Completed,
            Err(_) => WaitOutcome::TimedOut,
        }
    }
}

/// Tracks fingerprints currently being processed.
///
/// Cheap to clone; clones share the same marker table.
#[derive(Debug, Clone)]
pub struct InFlightCoordinator {
    markers: Arc<DashMap<Fingerprint, MarkerSlot>>,
    next_generation: Arc<AtomicU64>,
    release_grace: Duration,
}

impl InFlightCoordinator {
    pub fn new(release_grace: Duration) -> Self {
        Self {
            markers: Arc::new(DashMap::new()),
            next_generation: Arc::new(AtomicU64::new(0)),
            release_grace,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.release_grace())
    }

    /// Atomically become leader for `fingerprint`, or join the live leader.
    ///
    /// A marker whose leader already signalled (or was dropped) does not count
    /// as live: it is replaced and the caller leads a fresh attempt.
    pub fn try_become_leader(&self, fingerprint: &Fingerprint) -> Role {
        match self.markers.entry(fingerprint.clone()) {
            Entry::Occupied(mut occ) => {
                if occ.get().is_live() {
                    debug!(key = %fingerprint.short(), "Duplicate request, following in-flight leader");
                    return Role::Follower(occ.get().follow(fingerprint));
                }
                let (slot, guard) = self.fresh_marker(fingerprint);
                occ.insert(slot);
                debug!(key = %fingerprint.short(), "Replacing completed marker, leading");
                Role::Leader(guard)
            }
            Entry::Vacant(vac) => {
                let (slot, guard) = self.fresh_marker(fingerprint);
                vac.insert(slot);
                debug!(key = %fingerprint.short(), "Leading new request");
                Role::Leader(guard)
            }
        }
    }

    /// Replace the marker of generation `stale_generation` and lead.
    ///
    /// Used by a follower whose wait timed out. The swap only happens while
    /// the registered marker is still the one the follower waited on (or is
    /// no longer live); if another follower already took over, the caller
    /// follows that newer marker instead. Followers of the superseded marker
    /// keep waiting on the original leader.
    pub fn take_over(&self, fingerprint: &Fingerprint, stale_generation: u64) -> Role {
        match self.markers.entry(fingerprint.clone()) {
            Entry::Occupied(mut occ) => {
                let current = occ.get();
                if current.generation != stale_generation && current.is_live() {
                    debug!(key = %fingerprint.short(), "Marker already taken over, following it");
                    return Role::Follower(current.follow(fingerprint));
                }
                let (slot, guard) = self.fresh_marker(fingerprint);
                occ.insert(slot);
                debug!(key = %fingerprint.short(), "Taking over after wait timeout");
                Role::Leader(guard)
            }
            Entry::Vacant(vac) => {
                let (slot, guard) = self.fresh_marker(fingerprint);
                vac.insert(slot);
                debug!(key = %fingerprint.short(), "Leading after wait timeout");
                Role::Leader(guard)
            }
        }
    }

    /// Whether a live (unsignalled) marker exists for `fingerprint`.
    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.markers
            .get(fingerprint)
            .map(|slot| slot.is_live())
            .unwrap_or(false)
    }

    /// Number of registered markers, including those in their grace window.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    fn fresh_marker(&self, fingerprint: &Fingerprint) -> (MarkerSlot, LeaderGuard) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(false);
        let slot = MarkerSlot {
            generation,
            done: rx,
        };
        let guard = LeaderGuard {
            fingerprint: fingerprint.clone(),
            generation,
            tx,
            markers: Arc::clone(&self.markers),
            release_grace: self.release_grace,
            released: false,
        };
        (slot, guard)
    }
}

impl Default for InFlightCoordinator {
    fn default() -> Self {
        Self::from_config(&DedupConfig::default())
    }
}

/// Leader side of a marker.
///
/// Call [`LeaderGuard::signal_and_release`] once the outcome is committed to
/// the cache (or the attempt failed). A guard dropped without release still
/// wakes followers and removes its marker at once.
#[derive(Debug)]
pub struct LeaderGuard {
    fingerprint: Fingerprint,
    generation: u64,
    tx: watch::Sender<bool>,
    markers: Arc<DashMap<Fingerprint, MarkerSlot>>,
    release_grace: Duration,
    released: bool,
}

impl LeaderGuard {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wake all followers, then remove the marker after the grace window.
    pub fn signal_and_release(mut self) {
        self.released = true;
        self.tx.send_replace(true);

        let markers = Arc::clone(&self.markers);
        let fingerprint = self.fingerprint.clone();
        let generation = self.generation;
        let grace = self.release_grace;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) if !grace.is_zero() => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    remove_marker(&markers, &fingerprint, generation);
                });
            }
            _ => remove_marker(&markers, &fingerprint, generation),
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        debug!(key = %self.fingerprint.short(), "Leader dropped without release");
        self.tx.send_replace(true);
        remove_marker(&self.markers, &self.fingerprint, self.generation);
    }
}

fn remove_marker(
    markers: &DashMap<Fingerprint, MarkerSlot>,
    fingerprint: &Fingerprint,
    generation: u64,
) {
    if markers
        .remove_if(fingerprint, |_, slot| slot.generation == generation)
        .is_some()
    {
        debug!(key = %fingerprint.short(), "Released in-flight marker");
    }
}
