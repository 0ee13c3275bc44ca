//! pipedash store: collections kept current by version-ordered live update events.
//!
//! A [`Collection`] is the plain data structure; [`LiveCollection`] shares one behind a
//! lock, publishes immutable snapshots through `arc-swap` and notifies subscribers after
//! every change. [`spawn_ingest`] feeds it from a stream of raw JSON payloads.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::{Stream, StreamExt};
use pipedash_core::{
    CollectionKey, EventOp, ListMeta, Listeners, Resource, ResourceEvent, ResourceVersion, Subscription,
};
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unexpected operation tag: {0}")]
    UnknownOperation(String),
    #[error("event payload has no operation tag")]
    MissingOperation,
}

/// Decode `{ "operation": "created"|"updated"|"deleted", "resource": {...} }`.
pub fn decode_event(payload: &str) -> Result<ResourceEvent, EventError> {
    let value: serde_json::Value = serde_json::from_str(payload)?;
    let tag = value
        .get("operation")
        .or_else(|| value.get("type"))
        .and_then(|v| v.as_str())
        .ok_or(EventError::MissingOperation)?;
    if !EventOp::is_known_tag(tag) {
        return Err(EventError::UnknownOperation(tag.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

/// Result of applying one event to a [`Collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    /// Version not newer than the cached one; dropped.
    Stale,
    /// No uid, or a delete for an unknown object.
    Ignored,
}

impl Applied {
    pub fn changed(self) -> bool {
        matches!(self, Applied::Inserted | Applied::Updated | Applied::Removed)
    }
}

/// Immutable view of a collection handed to readers.
#[derive(Debug, Clone, Default)]
pub struct CollectionSnapshot {
    pub key: CollectionKey,
    pub epoch: u64,
    pub items: Vec<Resource>,
    pub metadata: ListMeta,
}

/// Deleted uids remembered per collection before the oldest are folded into a floor.
pub const DEFAULT_TOMBSTONE_CAP: usize = 4096;

pub struct Collection {
    key: CollectionKey,
    epoch: u64,
    items: Vec<Resource>,
    // uid -> position in `items`
    index: FxHashMap<String, usize>,
    // last version seen for deleted uids, so late updates cannot resurrect them
    tombstones: FxHashMap<String, ResourceVersion>,
    tombstone_order: VecDeque<String>,
    tombstone_cap: usize,
    // highest version among evicted tombstones; unknown uids at or below it are stale
    tombstone_floor: Option<ResourceVersion>,
    metadata: ListMeta,
}

impl Collection {
    pub fn new(key: CollectionKey) -> Self {
        Self::from_list(key, Vec::new(), ListMeta::default())
    }

    pub fn from_list(key: CollectionKey, items: Vec<Resource>, metadata: ListMeta) -> Self {
        let mut c = Self {
            key,
            epoch: 0,
            items: Vec::new(),
            index: FxHashMap::default(),
            tombstones: FxHashMap::default(),
            tombstone_order: VecDeque::new(),
            tombstone_cap: DEFAULT_TOMBSTONE_CAP,
            tombstone_floor: None,
            metadata: ListMeta::default(),
        };
        c.reset(items, metadata);
        c
    }

    pub fn with_tombstone_cap(mut self, cap: usize) -> Self {
        self.tombstone_cap = cap.max(1);
        self.prune_tombstones();
        self
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
    pub fn items(&self) -> &[Resource] {
        &self.items
    }
    pub fn metadata(&self) -> &ListMeta {
        &self.metadata
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, uid: &str) -> Option<&Resource> {
        self.index.get(uid).and_then(|i| self.items.get(*i))
    }

    /// Wholesale refresh (cache invalidation / relist).
    pub fn replace(&mut self, items: Vec<Resource>, metadata: ListMeta) {
        self.reset(items, metadata);
        self.epoch = self.epoch.saturating_add(1);
        debug!(key = %self.key, items = self.items.len(), epoch = self.epoch, "collection replaced");
    }

    fn reset(&mut self, items: Vec<Resource>, metadata: ListMeta) {
        self.items = items;
        self.metadata = metadata;
        self.tombstones.clear();
        self.tombstone_order.clear();
        self.tombstone_floor = None;
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, r) in self.items.iter().enumerate() {
            if let Some(uid) = r.uid() {
                self.index.entry(uid.to_string()).or_insert(i);
            }
        }
    }

    fn bury(&mut self, uid: String, v: ResourceVersion) {
        if self.tombstones.insert(uid.clone(), v).is_none() {
            self.tombstone_order.push_back(uid);
        }
        self.prune_tombstones();
    }

    fn prune_tombstones(&mut self) {
        let mut evicted = 0usize;
        while self.tombstones.len() > self.tombstone_cap {
            let Some(uid) = self.tombstone_order.pop_front() else { break };
            if let Some(v) = self.tombstones.remove(&uid) {
                evicted += 1;
                if self.tombstone_floor.as_ref().map_or(true, |f| v > *f) {
                    self.tombstone_floor = Some(v);
                }
            }
        }
        // entries of re-created uids linger in the order queue
        if self.tombstone_order.len() > self.tombstone_cap.saturating_mul(2) {
            let live = &self.tombstones;
            self.tombstone_order.retain(|uid| live.contains_key(uid));
        }
        if evicted > 0 {
            debug!(key = %self.key, evicted, floor = ?self.tombstone_floor, "tombstones pruned");
        }
    }

    fn advance_watermark(&mut self, v: ResourceVersion) {
        let newer = match self.metadata.resource_version.as_deref() {
            Some(cur) if !cur.is_empty() => v > ResourceVersion::from(cur),
            _ => true,
        };
        if newer {
            self.metadata.resource_version = Some(v.as_str().to_string());
        }
    }

    /// Apply one event if its version is newer than what is cached for its uid.
    pub fn apply(&mut self, ev: ResourceEvent) -> Applied {
        let Some(uid) = ev.resource.uid().map(str::to_string) else {
            debug!(key = %self.key, "event without uid ignored");
            return Applied::Ignored;
        };
        let incoming = ev.resource.resource_version();
        let pos = self.index.get(&uid).copied();
        let cached = match pos {
            Some(i) => self.items[i].resource_version(),
            None => match self.tombstones.get(&uid) {
                Some(v) => Some(v.clone()),
                None => incoming.as_ref().and(self.tombstone_floor.clone()),
            },
        };
        if let Some(cur) = cached.as_ref() {
            let newer = matches!(incoming.as_ref(), Some(next) if next > cur);
            if !newer {
                metrics::counter!("events_stale_total", 1);
                debug!(key = %self.key, uid = %uid, cached = %cur, "stale event dropped");
                return Applied::Stale;
            }
        }

        let outcome = match (ev.operation, pos) {
            (EventOp::Deleted, Some(i)) => {
                self.items.remove(i);
                self.reindex();
                if let Some(v) = incoming.clone() {
                    self.bury(uid, v);
                }
                Applied::Removed
            }
            (EventOp::Deleted, None) => {
                if let Some(v) = incoming.clone() {
                    self.bury(uid, v);
                }
                Applied::Ignored
            }
            (_, Some(i)) => {
                self.items[i] = ev.resource;
                Applied::Updated
            }
            (_, None) => {
                self.tombstones.remove(&uid);
                self.index.insert(uid, self.items.len());
                self.items.push(ev.resource);
                Applied::Inserted
            }
        };
        if let Some(v) = incoming {
            self.advance_watermark(v);
        }
        if outcome.changed() {
            self.epoch = self.epoch.saturating_add(1);
            metrics::counter!("events_applied_total", 1);
        }
        outcome
    }

    pub fn freeze(&self) -> Arc<CollectionSnapshot> {
        Arc::new(CollectionSnapshot {
            key: self.key.clone(),
            epoch: self.epoch,
            items: self.items.clone(),
            metadata: self.metadata.clone(),
        })
    }
}

/// Coalescing queue keyed by uid with FIFO order. Keeps the newest version per uid.
pub struct Coalescer {
    map: FxHashMap<String, ResourceEvent>,
    order: VecDeque<String>,
    cap: usize,
    skipped: u64,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), skipped: 0 }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
    /// The owner should drain before pushing more.
    pub fn is_full(&self) -> bool {
        self.map.len() >= self.cap
    }
    /// Events skipped because they carried no uid.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn push(&mut self, ev: ResourceEvent) {
        let Some(uid) = ev.resource.uid().map(str::to_string) else {
            self.skipped += 1;
            return;
        };
        match self.map.get(&uid) {
            Some(queued) => {
                let replace = match (queued.resource.resource_version(), ev.resource.resource_version()) {
                    (None, _) => true,
                    (Some(_), None) => false,
                    (Some(old), Some(new)) => new >= old,
                };
                if replace {
                    self.map.insert(uid, ev);
                }
            }
            None => {
                self.order.push_back(uid.clone());
                self.map.insert(uid, ev);
            }
        }
    }

    pub fn drain_ready(&mut self) -> Vec<ResourceEvent> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(uid) = self.order.pop_front() {
            if let Some(ev) = self.map.remove(&uid) {
                out.push(ev);
            }
        }
        out
    }
}

struct Shared {
    state: Mutex<Collection>,
    snap: ArcSwap<CollectionSnapshot>,
    epoch_tx: watch::Sender<u64>,
    listeners: Listeners<u64>,
}

/// Shared handle to a collection that changes under live updates.
///
/// Readers load the current snapshot without locking; subscribers are called with the new
/// epoch after each change, outside the collection lock.
#[derive(Clone)]
pub struct LiveCollection {
    shared: Arc<Shared>,
}

impl LiveCollection {
    pub fn new(collection: Collection) -> Self {
        let epoch = collection.epoch();
        let snap = ArcSwap::new(collection.freeze());
        let (epoch_tx, _epoch_rx) = watch::channel(epoch);
        Self {
            shared: Arc::new(Shared { state: Mutex::new(collection), snap, epoch_tx, listeners: Listeners::new() }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Collection> {
        self.shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn key(&self) -> CollectionKey {
        self.shared.snap.load().key.clone()
    }

    pub fn current(&self) -> Arc<CollectionSnapshot> {
        self.shared.snap.load_full()
    }

    pub fn epoch(&self) -> u64 {
        self.shared.snap.load().epoch
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&u64) + Send + Sync + 'static,
    {
        self.shared.listeners.subscribe(callback)
    }

    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> {
        self.shared.epoch_tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.listeners.len()
    }

    fn update<R>(&self, f: impl FnOnce(&mut Collection) -> R) -> R {
        let (out, changed) = {
            let mut c = self.lock();
            let before = c.epoch();
            let out = f(&mut *c);
            if c.epoch() != before {
                let snap = c.freeze();
                metrics::gauge!("collection_items", snap.items.len() as f64);
                self.shared.snap.store(snap);
                (out, Some(c.epoch()))
            } else {
                (out, None)
            }
        };
        if let Some(epoch) = changed {
            self.shared.epoch_tx.send_replace(epoch);
            self.shared.listeners.emit(&epoch);
        }
        out
    }

    pub fn replace(&self, items: Vec<Resource>, metadata: ListMeta) {
        self.update(|c| c.replace(items, metadata))
    }

    pub fn apply(&self, ev: ResourceEvent) -> Applied {
        self.update(|c| c.apply(ev))
    }

    /// Apply a batch under one lock; subscribers hear about it once. Returns the number of
    /// events that changed the collection.
    pub fn apply_batch(&self, batch: Vec<ResourceEvent>) -> usize {
        self.update(|c| batch.into_iter().map(|ev| c.apply(ev)).filter(|a| a.changed()).count())
    }

    /// Decode and apply a raw payload. Malformed payloads are logged, counted and returned
    /// as errors without touching the collection.
    pub fn apply_raw(&self, payload: &str) -> Result<Applied, EventError> {
        match decode_event(payload) {
            Ok(ev) => Ok(self.apply(ev)),
            Err(e) => {
                metrics::counter!("events_dropped_total", 1);
                warn!(error = %e, "dropping malformed update event");
                Err(e)
            }
        }
    }
}

fn flush(live: &LiveCollection, coalescer: &mut Coalescer) {
    let batch = coalescer.drain_ready();
    if !batch.is_empty() {
        let n = batch.len();
        let changed = live.apply_batch(batch);
        debug!(events = n, changed, "applied update batch");
    }
}

/// Spawn an ingest loop that decodes raw payloads, coalesces them by uid and applies them
/// to `collection` every few milliseconds. Dropping every sender drains and stops it.
pub fn spawn_ingest(collection: &LiveCollection, cap: usize) -> (mpsc::Sender<String>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<String>(cap.max(1));
    let live = collection.clone();

    let handle = tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cap);
        let mut ticker = tokio::time::interval(Duration::from_millis(8));
        info!(key = %live.key(), "ingest loop started");
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(payload) => match decode_event(&payload) {
                            Ok(ev) => {
                                coalescer.push(ev);
                                if coalescer.is_full() {
                                    flush(&live, &mut coalescer);
                                }
                            }
                            Err(e) => {
                                metrics::counter!("events_dropped_total", 1);
                                warn!(error = %e, "dropping malformed update event");
                            }
                        },
                        None => {
                            debug!("update channel closed; draining and exiting ingest loop");
                            flush(&live, &mut coalescer);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => flush(&live, &mut coalescer),
            }
        }
        info!(key = %live.key(), skipped = coalescer.skipped(), "ingest loop stopped");
    });

    (tx, handle)
}

/// Pump a stream of raw payloads into an ingest sender. Returns how many were sent.
pub async fn forward<S>(stream: S, tx: &mpsc::Sender<String>) -> usize
where
    S: Stream<Item = String>,
{
    futures::pin_mut!(stream);
    let mut sent = 0usize;
    while let Some(payload) = stream.next().await {
        if tx.send(payload).await.is_err() {
            break;
        }
        sent += 1;
    }
    sent
}
