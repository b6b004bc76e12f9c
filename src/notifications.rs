// file: src/notifications.rs
// description: unread counter and recent notification list fed by inbox events

//! Unread notification tracking derived from the inbox event stream.
//!
//! The aggregator keeps an O(1) unread counter and a bounded list of recent
//! items. Read-state changes are applied locally first and then persisted
//! through a [`NotificationStore`]; if persisting keeps failing the local
//! change is reverted and the failure is returned as
//! [`AggregatorError::Persistence`]. Pages fetched by [`refresh`] or pushed
//! over the store's stream replace local state wholesale.
//!
//! [`refresh`]: NotificationAggregator::refresh

use crate::{
    config::NotificationsConfig,
    dispatcher::{EventDispatcher, ListenerHandle},
    error::{AggregatorError, StoreError},
    events::Event,
    monitoring,
    store::{NotificationPage, NotificationStore},
    types,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemOrigin {
    /// Built locally from a realtime event.
    Push,
    /// Loaded from the notifications service.
    #[default]
    Fetched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationItem {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "body")]
    pub message: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub clicked: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(skip)]
    pub origin: ItemOrigin,
}

impl NotificationItem {
    pub fn is_unread(&self) -> bool {
        !self.clicked
            && !self
                .status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("read"))
    }

    fn from_event(event: &Event) -> Self {
        Self {
            id: event
                .message_id()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            title: Some("New message".to_string()),
            message: event.message_text().map(str::to_owned),
            created_at: Some(event.timestamp),
            clicked: false,
            status: None,
            origin: ItemOrigin::Push,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Size of the in-memory recent list; oldest items are evicted first.
    pub recent_limit: usize,
    pub persist_attempts: u32,
    pub persist_retry_delay: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            recent_limit: 20,
            persist_attempts: 3,
            persist_retry_delay: Duration::from_millis(500),
        }
    }
}

impl From<&NotificationsConfig> for AggregatorConfig {
    fn from(config: &NotificationsConfig) -> Self {
        Self {
            recent_limit: config.recent_limit,
            persist_attempts: config.persist_attempts,
            persist_retry_delay: config.persist_retry_delay,
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    unread: u64,
    // Newest first.
    items: VecDeque<NotificationItem>,
    // Locally known unread ids, including items evicted from `items`.
    unread_ids: HashSet<String>,
    // Bumped whenever a server page replaces local state.
    generation: u64,
}

impl AggregatorState {
    /// Trim `items` to `limit`, evicting the oldest read item first.
    fn evict(&mut self, limit: usize) {
        while self.items.len() > limit {
            match self.items.iter().rposition(|item| !item.is_unread()) {
                Some(index) => {
                    self.items.remove(index);
                }
                None => {
                    self.items.pop_back();
                }
            }
        }
    }
}

pub struct NotificationAggregator {
    config: AggregatorConfig,
    session_user_id: Option<String>,
    store: Option<Arc<dyn NotificationStore>>,
    state: Mutex<AggregatorState>,
    unread_tx: watch::Sender<u64>,
}

impl std::fmt::Debug for NotificationAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationAggregator")
            .field("session_user_id", &self.session_user_id)
            .field("has_store", &self.store.is_some())
            .field("unread", &self.unread_count())
            .finish()
    }
}

impl NotificationAggregator {
    pub fn new(config: AggregatorConfig, session_user_id: Option<String>) -> Self {
        let (unread_tx, _) = watch::channel(0);
        Self {
            config,
            session_user_id,
            store: None,
            state: Mutex::new(AggregatorState::default()),
            unread_tx,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Subscribe to `new_message` events on `dispatcher`.
    ///
    /// The listener holds only a weak reference; once the aggregator is
    /// dropped it ignores further events.
    pub fn attach(self: &Arc<Self>, dispatcher: &EventDispatcher) -> ListenerHandle {
        let aggregator: Weak<Self> = Arc::downgrade(self);
        dispatcher.add_event_listener(types::NEW_MESSAGE, move |event| {
            if let Some(aggregator) = aggregator.upgrade() {
                aggregator.handle_event(event);
            }
            Ok(())
        })
    }

    /// Apply one event. Returns `true` if it counted as a new unread item.
    ///
    /// The displayed list stays within `recent_limit`, but an unread item
    /// pushed out of it can still be marked read by id.
    pub fn handle_event(&self, event: &Event) -> bool {
        if event.event_type() != types::NEW_MESSAGE {
            return false;
        }
        if event.user_id.is_empty() || self.session_user_id.as_deref() == Some(&event.user_id) {
            debug!(user_id = %event.user_id, "Ignoring self-originated message");
            return false;
        }

        let item = NotificationItem::from_event(event);
        let mut state = self.lock();
        state.unread += 1;
        state.unread_ids.insert(item.id.clone());
        state.items.push_front(item);
        state.evict(self.config.recent_limit);
        self.publish(&state);
        true
    }

    pub fn unread_count(&self) -> u64 {
        self.lock().unread
    }

    /// Receiver notified whenever the unread count changes.
    pub fn subscribe_unread(&self) -> watch::Receiver<u64> {
        self.unread_tx.subscribe()
    }

    /// Snapshot of the recent items, newest first.
    pub fn items(&self) -> Vec<NotificationItem> {
        self.lock().items.iter().cloned().collect()
    }

    pub fn increment_unread(&self) {
        let mut state = self.lock();
        state.unread += 1;
        self.publish(&state);
    }

    pub fn decrement_unread(&self) {
        let mut state = self.lock();
        state.unread = state.unread.saturating_sub(1);
        self.publish(&state);
    }

    pub fn reset_unread(&self) {
        let mut state = self.lock();
        state.unread = 0;
        self.publish(&state);
    }

    /// Mark every known item read and zero the counter, then persist.
    pub async fn mark_all_as_read(&self) -> Result<(), AggregatorError> {
        let (flipped, previous_unread, generation) = {
            let mut state = self.lock();
            let previous_unread = state.unread;
            let flipped = std::mem::take(&mut state.unread_ids);
            for item in state.items.iter_mut().filter(|item| item.is_unread()) {
                item.clicked = true;
            }
            state.unread = 0;
            self.publish(&state);
            (flipped, previous_unread, state.generation)
        };
        info!(items = flipped.len(), "Marked all notifications as read");

        let Some(store) = self.store.clone() else {
            return Ok(());
        };

        if let Err(e) = self
            .persist(|| {
                let store = Arc::clone(&store);
                async move { store.mark_all_clicked().await }
            })
            .await
        {
            let mut state = self.lock();
            if state.generation == generation {
                for item in state.items.iter_mut() {
                    if item.clicked && flipped.contains(&item.id) {
                        item.clicked = false;
                    }
                }
                state.unread += previous_unread;
                state.unread_ids.extend(flipped);
                self.publish(&state);
                warn!("Reverted mark-all-as-read: {}", e);
            } else {
                warn!("Mark-all-as-read failed after a server refresh, keeping server state: {}", e);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Mark one item read, then persist.
    ///
    /// Returns whether a locally known unread item was flipped. The counter
    /// drops by one only in that case and never goes below zero.
    pub async fn mark_one_as_read(&self, id: &str) -> Result<bool, AggregatorError> {
        let (flipped, generation) = {
            let mut state = self.lock();
            let flipped = state.unread_ids.remove(id);
            if flipped {
                if let Some(item) = state.items.iter_mut().find(|item| item.id == id) {
                    item.clicked = true;
                }
                state.unread = state.unread.saturating_sub(1);
                self.publish(&state);
            }
            (flipped, state.generation)
        };
        debug!(%id, flipped, "Marked notification as read");

        let Some(store) = self.store.clone() else {
            return Ok(flipped);
        };

        if let Err(e) = self
            .persist(|| {
                let store = Arc::clone(&store);
                let id = id.to_owned();
                async move { store.mark_clicked(&id).await }
            })
            .await
        {
            let mut state = self.lock();
            if flipped && state.generation == generation && state.unread_ids.insert(id.to_owned())
            {
                if let Some(item) = state.items.iter_mut().find(|item| item.id == id) {
                    item.clicked = false;
                }
                state.unread += 1;
                self.publish(&state);
            }
            warn!(%id, "Reverted mark-as-read: {}", e);
            return Err(e);
        }
        Ok(flipped)
    }

    /// Replace local state with the server's latest page.
    pub async fn refresh(&self) -> Result<(), AggregatorError> {
        let store = self.store.clone().ok_or(AggregatorError::NoStore)?;
        let page = store.fetch_latest(self.config.recent_limit).await?;
        self.apply_page(page);
        Ok(())
    }

    /// Apply pages pushed by the store until its stream ends.
    ///
    /// Empty pages and malformed pushes are skipped; transport errors end the
    /// call so the caller can reopen the stream.
    pub async fn follow_stream(&self) -> Result<(), AggregatorError> {
        let store = self.store.clone().ok_or(AggregatorError::NoStore)?;
        let mut pages = store.subscribe().await?;
        info!("Following notification stream");

        while let Some(page) = pages.next().await {
            match page {
                Ok(page) if page.items.is_empty() => debug!("Ignoring empty notification push"),
                Ok(page) => self.apply_page(page),
                Err(StoreError::Decode(e)) => warn!("Dropping malformed notification push: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
        debug!("Notification stream ended");
        Ok(())
    }

    /// The server's view wins: its `unread_count` if reported, otherwise the
    /// number of unread items on the page.
    pub fn apply_page(&self, page: NotificationPage) {
        let unread_ids: HashSet<String> = page
            .items
            .iter()
            .filter(|item| item.is_unread())
            .map(|item| item.id.clone())
            .collect();
        let unread = page.unread_count.unwrap_or(unread_ids.len() as u64);

        let mut state = self.lock();
        if state.unread != unread {
            info!(local = state.unread, server = unread, "Reconciled unread count");
        }
        state.generation += 1;
        state.unread = unread;
        state.unread_ids = unread_ids;
        state.items = page.items.into_iter().collect();
        state.evict(self.config.recent_limit);
        self.publish(&state);
    }

    async fn persist<F, Fut>(&self, mut op: F) -> Result<(), AggregatorError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(), StoreError>>,
    {
        let attempts = self.config.persist_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => {
                    return Err(AggregatorError::Persistence {
                        attempts,
                        source: e,
                    });
                }
                Err(e) => {
                    warn!(attempt, attempts, "Persisting read state failed: {}", e);
                    attempt += 1;
                    tokio::time::sleep(self.config.persist_retry_delay).await;
                }
            }
        }
    }

    fn publish(&self, state: &AggregatorState) {
        monitoring::UNREAD_GAUGE.set(state.unread as f64);
        self.unread_tx.send_if_modified(|unread| {
            let changed = *unread != state.unread;
            *unread = state.unread;
            changed
        });
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
