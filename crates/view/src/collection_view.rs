//! A filtered, live view over one collection.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use pipedash_core::{CollectionKey, ListMeta, Resource, Subscription};
use pipedash_search::{filter_resources, FilterPolicy};
use pipedash_store::LiveCollection;
use tracing::{debug, info};

use crate::channel::QueryChannel;

/// The list a view hands out: the filtered items plus the collection's list metadata.
#[derive(Debug, Clone, Default)]
pub struct FilteredList {
    pub items: Vec<Resource>,
    pub metadata: ListMeta,
}

/// Bare item sequence of a [`FilteredList`], sharing the same allocation.
#[derive(Debug, Clone)]
pub struct ItemsView(Arc<FilteredList>);

impl ItemsView {
    pub fn metadata(&self) -> &ListMeta {
        &self.0.metadata
    }
}

impl Deref for ItemsView {
    type Target = [Resource];

    fn deref(&self) -> &[Resource] {
        &self.0.items
    }
}

struct ViewState {
    list: Arc<FilteredList>,
    query: String,
    epoch: u64,
    passes: u64,
}

struct Shared {
    key: CollectionKey,
    collection: LiveCollection,
    filterable: bool,
    state: Mutex<ViewState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn rebuild(&self, st: &mut ViewState) {
        let snap = self.collection.current();
        let items = if self.filterable { filter_resources(&snap.items, &st.query) } else { snap.items.clone() };
        st.list = Arc::new(FilteredList { items, metadata: snap.metadata.clone() });
        st.epoch = snap.epoch;
        st.passes += 1;
        debug!(key = %self.key, query = %st.query, items = st.list.items.len(), of = snap.items.len(), "view recomputed");
    }

    fn on_query(&self, query: &str) {
        if !self.filterable {
            return;
        }
        let mut st = self.lock();
        if st.query == query {
            return;
        }
        st.query = query.to_string();
        self.rebuild(&mut st);
    }

    fn on_epoch(&self, epoch: u64) {
        let mut st = self.lock();
        if epoch <= st.epoch {
            return;
        }
        self.rebuild(&mut st);
    }
}

/// Subscribes to the query channel and the collection while open; each change of either
/// recomputes the list once. Collections the policy exempts pass through unfiltered.
pub struct CollectionView {
    shared: Arc<Shared>,
    query_sub: Subscription,
    collection_sub: Subscription,
}

impl CollectionView {
    pub fn open(collection: LiveCollection, channel: &QueryChannel, policy: &FilterPolicy) -> Self {
        let key = collection.key();
        let filterable = policy.is_filterable(&key.group, &key.kind);
        let query = if filterable { channel.current_value() } else { String::new() };
        let shared = Arc::new(Shared {
            key,
            collection,
            filterable,
            state: Mutex::new(ViewState { list: Arc::default(), query, epoch: 0, passes: 0 }),
        });
        {
            let mut st = shared.lock();
            shared.rebuild(&mut st);
        }

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let query_sub = channel.subscribe(move |q: &String| {
            if let Some(s) = weak.upgrade() {
                s.on_query(q);
            }
        });
        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let collection_sub = shared.collection.subscribe(move |epoch: &u64| {
            if let Some(s) = weak.upgrade() {
                s.on_epoch(*epoch);
            }
        });
        // a change may have landed between the first pass and subscribing
        shared.on_query(&channel.current_value());
        shared.on_epoch(shared.collection.epoch());

        info!(key = %shared.key, filterable, "collection view opened");
        Self { shared, query_sub, collection_sub }
    }

    pub fn key(&self) -> &CollectionKey {
        &self.shared.key
    }

    pub fn is_filterable(&self) -> bool {
        self.shared.filterable
    }

    pub fn list(&self) -> Arc<FilteredList> {
        Arc::clone(&self.shared.lock().list)
    }

    pub fn items(&self) -> ItemsView {
        ItemsView(self.list())
    }

    /// Query the current list was filtered with (always empty for exempt collections).
    pub fn query(&self) -> String {
        self.shared.lock().query.clone()
    }

    /// Number of recomputations so far, including the initial one.
    pub fn passes(&self) -> u64 {
        self.shared.lock().passes
    }

    /// Recompute from the current snapshot regardless of change tracking.
    pub fn refresh(&self) {
        let mut st = self.shared.lock();
        self.shared.rebuild(&mut st);
    }

    /// Stop following the channel and the collection.
    pub fn close(self) {
        let CollectionView { shared, query_sub, collection_sub } = self;
        query_sub.unsubscribe();
        collection_sub.unsubscribe();
        info!(key = %shared.key, "collection view closed");
    }
}
