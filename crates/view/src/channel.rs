//! The process-wide text query, injected wherever a view or an input needs it.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use pipedash_core::{Listeners, Subscription};
use tokio::sync::watch;
use tracing::debug;

use crate::page_state::{NoPageState, PageState};

struct Inner {
    tx: watch::Sender<String>,
    // set once the page state has been consulted
    init: OnceCell<()>,
    page: Arc<dyn PageState>,
    listeners: Listeners<String>,
}

/// Broadcast channel for the current free-text query.
///
/// Publishing the value already held is a no-op, which keeps a subscriber that publishes
/// back from looping. Subscribers run synchronously on the publishing thread, outside any
/// lock of the channel.
#[derive(Clone)]
pub struct QueryChannel {
    inner: Arc<Inner>,
}

impl QueryChannel {
    pub fn new(page: Arc<dyn PageState>) -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self { inner: Arc::new(Inner { tx, init: OnceCell::new(), page, listeners: Listeners::new() }) }
    }

    /// A channel with no addressable page state.
    pub fn detached() -> Self {
        Self::new(Arc::new(NoPageState))
    }

    fn ensure_init(&self) {
        self.inner.init.get_or_init(|| {
            if let Some(q) = self.inner.page.read_query() {
                debug!(query = %q, "query restored from page state");
                self.inner.tx.send_replace(q);
            }
        });
    }

    /// Returns `false` when `query` equals the current value.
    pub fn publish(&self, query: impl Into<String>) -> bool {
        let query = query.into();
        self.ensure_init();
        let changed = self.inner.tx.send_if_modified(|cur| {
            if *cur == query {
                false
            } else {
                cur.clone_from(&query);
                true
            }
        });
        if !changed {
            return false;
        }
        self.inner.page.write_query(&query);
        let notified = self.inner.listeners.emit(&query);
        debug!(query = %query, subscribers = notified, "query published");
        true
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(callback)
    }

    pub fn current_value(&self) -> String {
        self.ensure_init();
        self.inner.tx.borrow().clone()
    }

    /// Receiver for async consumers; starts at the current value.
    pub fn watch(&self) -> watch::Receiver<String> {
        self.ensure_init();
        self.inner.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

impl std::fmt::Debug for QueryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryChannel")
            .field("current", &*self.inner.tx.borrow())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
