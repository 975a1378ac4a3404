//! Reconciliation store.
//!
//! One store per role session holds that role's view of its orders, split
//! into the active and history buckets (plus, for couriers, the pool of
//! open offers). Two write paths feed it:
//!
//! * optimistic: `apply_optimistic` right after a gateway action succeeds,
//!   so the UI reflects the action without waiting for a poll;
//! * authoritative: `refresh` (full lists) and `apply_detail` (one record).
//!
//! Precedence: whatever an authoritative payload carries wins, including
//! status; fields it omits keep their locally known value (see
//! [`Tracked::overlay`]). The exception is a payload fetched before a later
//! optimistic write to the same order: that order keeps its local state
//! until a fetch that started after the write lands. Buckets are recomputed from status on every write,
//! and every write is passed through the change notifier.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{Rateable, Rating, Tracked};
use crate::notifier::{ChangeNotifier, Notification};
use crate::status::{bucket_for, Bucket, OrderStatus, Role};

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Read side of a role's backend surface.
#[async_trait]
pub trait RoleFeed: Send + Sync + 'static {
    type Entity: Tracked;

    fn role(&self) -> Role;

    async fn fetch_bucket(&self, bucket: Bucket) -> DeliveryResult<Vec<Self::Entity>>;

    async fn fetch_detail(&self, id: &str) -> DeliveryResult<Self::Entity>;

    /// Whether this role has an offers pool to poll alongside its buckets.
    fn has_offers(&self) -> bool {
        false
    }

    async fn fetch_offers(&self) -> DeliveryResult<Vec<Self::Entity>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoreSnapshot<E> {
    pub active: Vec<E>,
    pub history: Vec<E>,
    /// Open tasks not yet bound to anyone (courier only).
    pub offers: Vec<E>,
    /// Bumped on every write.
    pub revision: u64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl<E> StoreSnapshot<E> {
    fn empty() -> Self {
        Self {
            active: Vec::new(),
            history: Vec::new(),
            offers: Vec::new(),
            revision: 0,
            last_refreshed_at: None,
        }
    }
}

impl<E: Tracked> StoreSnapshot<E> {
    pub fn get(&self, id: &str) -> Option<&E> {
        self.active
            .iter()
            .chain(self.history.iter())
            .chain(self.offers.iter())
            .find(|e| e.id() == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied {
        active: usize,
        history: usize,
        offers: usize,
        notified: usize,
    },
    /// Another refresh was already in flight.
    Skipped,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Active,
    History,
    Offers,
}

impl From<Bucket> for Slot {
    fn from(bucket: Bucket) -> Self {
        match bucket {
            Bucket::Active => Slot::Active,
            Bucket::History => Slot::History,
        }
    }
}

struct StoreState<E> {
    active: Vec<E>,
    history: Vec<E>,
    offers: Vec<E>,
    revision: u64,
    last_refreshed_at: Option<DateTime<Utc>>,
    notifier: ChangeNotifier,
    /// Counter of optimistic writes.
    write_seq: u64,
    /// Sequence number of the latest optimistic write per order id.
    written_at: HashMap<String, u64>,
}

impl<E: Tracked> StoreState<E> {
    fn mark_written(&mut self, id: &str) {
        self.write_seq += 1;
        self.written_at.insert(id.to_string(), self.write_seq);
    }

    /// Whether `id` was written optimistically after a fetch that began at
    /// sequence `since`.
    fn written_since(&self, id: &str, since: u64) -> bool {
        self.written_at.get(id).is_some_and(|&seq| seq > since)
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Vec<E> {
        match slot {
            Slot::Active => &mut self.active,
            Slot::History => &mut self.history,
            Slot::Offers => &mut self.offers,
        }
    }

    fn locate(&self, id: &str) -> Option<(Slot, usize)> {
        [
            (Slot::Active, &self.active),
            (Slot::History, &self.history),
            (Slot::Offers, &self.offers),
        ]
        .into_iter()
        .find_map(|(slot, list)| list.iter().position(|e| e.id() == id).map(|i| (slot, i)))
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut E> {
        self.active
            .iter_mut()
            .chain(self.history.iter_mut())
            .chain(self.offers.iter_mut())
            .find(|e| e.id() == id)
    }

    /// Overlay `incoming` onto the held entity (or insert it) and place the
    /// result by status. With `keep_offer`, an entity that sits in the offers
    /// pool and is still open stays there.
    fn upsert(&mut self, role: Role, incoming: E, keep_offer: bool) -> E {
        let located = self.locate(incoming.id());
        let (previous_slot, merged) = match located {
            Some((slot, index)) => {
                let mut local = self.slot_mut(slot).remove(index);
                local.overlay(incoming);
                (Some((slot, index)), local)
            }
            None => (None, incoming),
        };

        let target = match previous_slot {
            Some((Slot::Offers, _)) if keep_offer && *merged.status() == OrderStatus::Available => {
                Slot::Offers
            }
            _ => Slot::from(bucket_for(role, merged.status())),
        };

        let list = self.slot_mut(target);
        match previous_slot {
            Some((slot, index)) if slot == target => list.insert(index.min(list.len()), merged.clone()),
            _ => list.insert(0, merged.clone()),
        }
        merged
    }

    /// Replace every bucket with the fetched sets, each entry overlaid on
    /// what was held locally. Orders written optimistically after `since`
    /// keep their local state and are left to a later refresh.
    fn apply_authoritative(&mut self, role: Role, fetched: Vec<E>, offers: Vec<E>, since: u64) {
        let mut held: HashMap<String, E> = self
            .active
            .drain(..)
            .chain(self.history.drain(..))
            .chain(self.offers.drain(..))
            .map(|e| (e.id().to_string(), e))
            .collect();

        let pinned_ids: HashSet<String> = held
            .keys()
            .filter(|id| self.written_since(id, since))
            .cloned()
            .collect();
        let pinned: Vec<E> = pinned_ids.iter().filter_map(|id| held.remove(id)).collect();
        if !pinned.is_empty() {
            debug!(role = %role, pinned = pinned.len(), "Keeping orders written after the fetch started");
        }
        self.written_at.retain(|_, seq| *seq > since);

        let mut merged: Vec<E> = Vec::with_capacity(fetched.len() + pinned.len());
        let mut index: HashMap<String, usize> = HashMap::new();
        for incoming in fetched {
            let id = incoming.id().to_string();
            if pinned_ids.contains(&id) {
                continue;
            }
            if let Some(&i) = index.get(&id) {
                merged[i].overlay(incoming);
                continue;
            }
            let entity = match held.remove(&id) {
                Some(mut local) => {
                    local.overlay(incoming);
                    local
                }
                None => incoming,
            };
            index.insert(id, merged.len());
            merged.push(entity);
        }
        for entity in pinned {
            index.insert(entity.id().to_string(), merged.len());
            merged.push(entity);
        }

        for entity in merged {
            match bucket_for(role, entity.status()) {
                Bucket::Active => self.active.push(entity),
                Bucket::History => self.history.push(entity),
            }
        }

        for incoming in offers {
            let id = incoming.id().to_string();
            if index.contains_key(&id) || self.offers.iter().any(|e| e.id() == id) {
                continue;
            }
            let entity = match held.remove(&id) {
                Some(mut local) => {
                    local.overlay(incoming);
                    local
                }
                None => incoming,
            };
            self.offers.push(entity);
        }

        if !held.is_empty() {
            debug!(role = %role, dropped = held.len(), "Orders no longer reported by backend");
        }
    }

    fn observe_all(&mut self) -> Vec<Notification> {
        let observed: Vec<(String, OrderStatus)> = self
            .active
            .iter()
            .chain(self.history.iter())
            .chain(self.offers.iter())
            .map(|e| (e.id().to_string(), e.status().clone()))
            .collect();
        observed
            .iter()
            .filter_map(|(id, status)| self.notifier.observe(id, status))
            .collect()
    }

    fn snapshot(&self) -> StoreSnapshot<E> {
        StoreSnapshot {
            active: self.active.clone(),
            history: self.history.clone(),
            offers: self.offers.clone(),
            revision: self.revision,
            last_refreshed_at: self.last_refreshed_at,
        }
    }
}

/// Clears the in-flight flag when the refresh completes or is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ReconciliationStore<F: RoleFeed> {
    feed: F,
    state: Mutex<StoreState<F::Entity>>,
    refreshing: AtomicBool,
    tx: watch::Sender<StoreSnapshot<F::Entity>>,
}

impl<F: RoleFeed> ReconciliationStore<F> {
    pub fn new(feed: F, notifier: ChangeNotifier) -> Self {
        debug_assert_eq!(feed.role(), notifier.role());
        let (tx, _rx) = watch::channel(StoreSnapshot::empty());
        Self {
            feed,
            state: Mutex::new(StoreState {
                active: Vec::new(),
                history: Vec::new(),
                offers: Vec::new(),
                revision: 0,
                last_refreshed_at: None,
                notifier,
                write_seq: 0,
                written_at: HashMap::new(),
            }),
            refreshing: AtomicBool::new(false),
            tx,
        }
    }

    pub fn role(&self) -> Role {
        self.feed.role()
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    fn lock(&self) -> MutexGuard<'_, StoreState<F::Entity>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: &mut StoreState<F::Entity>) {
        state.revision += 1;
        self.tx.send_replace(state.snapshot());
    }

    pub fn snapshot(&self) -> StoreSnapshot<F::Entity> {
        self.lock().snapshot()
    }

    /// Watch the store. The receiver always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot<F::Entity>> {
        self.tx.subscribe()
    }

    pub fn get(&self, id: &str) -> Option<F::Entity> {
        let state = self.lock();
        state
            .locate(id)
            .map(|(slot, i)| match slot {
                Slot::Active => state.active[i].clone(),
                Slot::History => state.history[i].clone(),
                Slot::Offers => state.offers[i].clone(),
            })
    }

    /// Which bucket currently holds `id`; `None` when unknown or only offered.
    pub fn bucket_of(&self, id: &str) -> Option<Bucket> {
        match self.lock().locate(id) {
            Some((Slot::Active, _)) => Some(Bucket::Active),
            Some((Slot::History, _)) => Some(Bucket::History),
            _ => None,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Fold the result of a successful local action into the store. It is
    /// provisional: the next refresh that starts after it supersedes it.
    pub fn apply_optimistic(&self, entity: F::Entity) -> Option<Notification> {
        let role = self.role();
        let mut state = self.lock();
        state.mark_written(entity.id());
        let merged = state.upsert(role, entity, false);
        let notification = state.notifier.observe(merged.id(), merged.status());
        debug!(role = %role, order_id = %merged.id(), status = %merged.status(), "Applied optimistic update");
        self.publish(&mut state);
        notification
    }

    /// Fold a detail record (full page fetch) into the store.
    pub fn apply_detail(&self, entity: F::Entity) -> Option<Notification> {
        let role = self.role();
        let mut state = self.lock();
        let merged = state.upsert(role, entity, true);
        let notification = state.notifier.observe(merged.id(), merged.status());
        self.publish(&mut state);
        notification
    }

    /// Fetch one order's detail record and fold it in. A record fetched
    /// before a later optimistic write to the same order is not applied.
    pub async fn load_detail(&self, id: &str) -> DeliveryResult<F::Entity> {
        let started = self.lock().write_seq;
        let detail = self.feed.fetch_detail(id).await?;
        if self.lock().written_since(id, started) {
            debug!(role = %self.role(), order_id = %id, "Dropping detail fetched before a local write");
        } else {
            self.apply_detail(detail);
        }
        self.get(id).ok_or_else(|| DeliveryError::NotFound(id.to_string()))
    }

    /// Re-fetch the role's lists and reconcile.
    ///
    /// A call made while another refresh is in flight returns
    /// [`RefreshOutcome::Skipped`] without touching the network. On failure
    /// the store keeps its previous contents.
    pub async fn refresh(&self) -> DeliveryResult<RefreshOutcome> {
        let role = self.role();
        let Some(_in_flight) = InFlight::acquire(&self.refreshing) else {
            debug!(role = %role, "Refresh already in flight, skipping");
            return Ok(RefreshOutcome::Skipped);
        };
        let started = self.lock().write_seq;

        let offers_fut = async {
            if self.feed.has_offers() {
                self.feed.fetch_offers().await
            } else {
                Ok(Vec::new())
            }
        };
        let (active, history, offers) = tokio::join!(
            self.feed.fetch_bucket(Bucket::Active),
            self.feed.fetch_bucket(Bucket::History),
            offers_fut,
        );

        let (active, history, offers) = match (active, history, offers) {
            (Ok(a), Ok(h), Ok(o)) => (a, h, o),
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                warn!(role = %role, error = %e, "Refresh failed, keeping last known orders");
                return Err(e);
            }
        };

        let mut fetched = active;
        fetched.extend(history);

        let mut state = self.lock();
        state.apply_authoritative(role, fetched, offers, started);
        state.last_refreshed_at = Some(Utc::now());
        let notifications = state.observe_all();
        let outcome = RefreshOutcome::Applied {
            active: state.active.len(),
            history: state.history.len(),
            offers: state.offers.len(),
            notified: notifications.len(),
        };
        self.publish(&mut state);
        drop(state);

        info!(role = %role, outcome = ?outcome, "Refresh applied");
        Ok(outcome)
    }

    /// Number of notifications fired by this store's notifier.
    pub fn notifications_emitted(&self) -> u64 {
        self.lock().notifier.emitted_count()
    }
}

impl<F> ReconciliationStore<F>
where
    F: RoleFeed,
    F::Entity: Rateable,
{
    /// Record a rating locally after the backend accepted it.
    pub fn update_rating(&self, id: &str, rating: Rating) -> DeliveryResult<()> {
        let mut state = self.lock();
        let entity = state
            .find_mut(id)
            .ok_or_else(|| DeliveryError::NotFound(id.to_string()))?;
        entity.set_rating(rating);
        self.publish(&mut state);
        Ok(())
    }
}
