//! Event collection sync.
//!
//! Keeps the best-known list of events for a set of [`SearchFilters`]:
//!
//! - the list is fetched on mount and whenever the filters change by value,
//!   and every fetch replaces the whole list;
//! - one push subscription to the `events` table lives as long as the view
//!   and merges inserts, updates and deletes into the list, without
//!   re-applying the filters;
//! - fetches carry a sequence number so a slow response can never overwrite
//!   a newer one.

use crate::environment::SyncEnvironment;
use crate::error::SyncError;
use crate::queries::{event_list_query, events_channel};
use crate::types::{Event, SearchFilters, SortBy};
use futures::StreamExt;
use gather_core::effect::{Effect, EffectId};
use gather_core::reducer::Reducer;
use gather_core::remote::{Change, ChangeKind, Table};
use gather_core::{SmallVec, smallvec};
use gather_runtime::store::Store;
use std::time::Duration;
use tokio::sync::broadcast;

/// Id of the push subscription effect
pub const EVENTS_FEED: &str = "events-feed";

/// State of an event list view
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventListState {
    /// Filters of the current list (normalized)
    pub filters: SearchFilters,
    /// Best-known events, in display order
    pub events: Vec<Event>,
    /// A fetch is in flight
    pub loading: bool,
    /// Message of the last failure, cleared by the next successful fetch
    pub error: Option<String>,
    /// The push subscription is joined
    pub live: bool,
    /// Sequence number of the most recently issued fetch
    pub fetch_seq: u64,
    /// Between `Mount` and `Unmount`
    pub mounted: bool,
}

/// Inputs of the event list
#[derive(Clone, Debug, PartialEq)]
pub enum EventListAction {
    /// Fetch with `filters` and open the push subscription
    Mount {
        /// Initial filters
        filters: SearchFilters,
    },
    /// Replace the filters; an equal value is ignored
    SetFilters {
        /// New filters
        filters: SearchFilters,
    },
    /// Fetch again with the current filters
    Refetch,
    /// A fetch completed
    Loaded {
        /// Sequence number of the fetch
        seq: u64,
        /// Events in display order, or the failure
        result: Result<Vec<Event>, SyncError>,
    },
    /// The push subscription is joined
    FeedReady,
    /// A change was pushed on the `events` table
    Pushed(Change),
    /// The push subscription could not be opened or broke
    FeedFailed {
        /// What went wrong
        error: String,
    },
    /// Release the push subscription
    Unmount,
}

/// Sort fetched events for display
///
/// Rows arrive in remote order (by date, or newest first). Popularity is a
/// stable sort by descending `rsvp_count`, so ties keep the date order.
pub fn apply_sort(events: &mut [Event], sort_by: SortBy) {
    if sort_by == SortBy::Popularity {
        events.sort_by(|a, b| b.rsvp_count.cmp(&a.rsvp_count));
    }
}

/// Merge one pushed change into `events`
///
/// Returns whether the list changed.
pub fn merge_change(events: &mut Vec<Event>, change: &Change) -> bool {
    if change.table != Table::Events {
        return false;
    }

    match change.kind {
        ChangeKind::Insert => {
            let Some(event) = decode_pushed(change) else {
                return false;
            };
            events.retain(|existing| existing.id != event.id);
            events.insert(0, event);
            true
        },
        ChangeKind::Update => {
            let Some(event) = decode_pushed(change) else {
                return false;
            };
            match events.iter_mut().find(|existing| existing.id == event.id) {
                Some(existing) => {
                    *existing = event;
                    true
                },
                None => false,
            }
        },
        ChangeKind::Delete => {
            let Some(id) = change.id() else {
                return false;
            };
            let before = events.len();
            events.retain(|existing| existing.id != id);
            events.len() != before
        },
    }
}

fn decode_pushed(change: &Change) -> Option<Event> {
    let row = change.record.clone()?;
    match Event::from_row(row) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(kind = ?change.kind, error = %e, "Ignoring undecodable event push");
            None
        },
    }
}

/// Reducer of the event list
#[derive(Clone, Debug, Default)]
pub struct EventListReducer;

impl EventListReducer {
    /// Creates a new `EventListReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn fetch(state: &mut EventListState, env: &SyncEnvironment) -> Effect<EventListAction> {
        state.fetch_seq += 1;
        state.loading = true;

        let seq = state.fetch_seq;
        let filters = state.filters.clone();
        let client = env.client.clone();
        let notices = env.notices.clone();

        tracing::debug!(seq, ?filters, "Fetching events");

        Effect::Future(Box::pin(async move {
            let result = async {
                let rows = client.select(event_list_query(&filters)).await?;
                let mut events = rows
                    .into_iter()
                    .map(Event::from_row)
                    .collect::<Result<Vec<_>, _>>()?;
                apply_sort(&mut events, filters.sort_by);
                Ok::<_, SyncError>(events)
            }
            .await;

            if let Err(e) = &result {
                notices.error(e.to_string());
            }
            Some(EventListAction::Loaded { seq, result })
        }))
    }

    fn subscribe(env: &SyncEnvironment) -> Effect<EventListAction> {
        let client = env.client.clone();

        Effect::Stream(Box::pin(async_stream::stream! {
            match client.subscribe(events_channel()).await {
                Ok(mut subscription) => {
                    yield EventListAction::FeedReady;
                    while let Some(change) = subscription.next().await {
                        yield EventListAction::Pushed(change);
                    }
                    yield EventListAction::FeedFailed {
                        error: "Realtime channel closed".to_string(),
                    };
                },
                Err(e) => {
                    yield EventListAction::FeedFailed { error: e.to_string() };
                },
            }
        }))
        .cancellable(EVENTS_FEED)
    }
}

impl Reducer for EventListReducer {
    type State = EventListState;
    type Action = EventListAction;
    type Environment = SyncEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            EventListAction::Mount { filters } => {
                let filters = filters.normalized();
                if state.mounted {
                    if filters == state.filters {
                        return SmallVec::new();
                    }
                    state.filters = filters;
                    return smallvec![Self::fetch(state, env)];
                }

                state.mounted = true;
                state.filters = filters;
                smallvec![
                    Self::fetch(state, env),
                    Effect::Cancel(EffectId::new(EVENTS_FEED)),
                    Self::subscribe(env),
                ]
            },

            EventListAction::SetFilters { filters } => {
                let filters = filters.normalized();
                if filters == state.filters {
                    tracing::debug!("Filters unchanged, not refetching");
                    return SmallVec::new();
                }
                state.filters = filters;
                smallvec![Self::fetch(state, env)]
            },

            EventListAction::Refetch => smallvec![Self::fetch(state, env)],

            EventListAction::Loaded { seq, result } => {
                if seq != state.fetch_seq {
                    tracing::debug!(seq, latest = state.fetch_seq, "Discarding stale event list");
                    return SmallVec::new();
                }
                state.loading = false;
                match result {
                    Ok(events) => {
                        tracing::debug!(count = events.len(), "Event list loaded");
                        state.events = events;
                        state.error = None;
                    },
                    Err(e) => state.error = Some(e.to_string()),
                }
                SmallVec::new()
            },

            EventListAction::FeedReady => {
                tracing::debug!("Events feed joined");
                state.live = true;
                SmallVec::new()
            },

            EventListAction::Pushed(change) => {
                if merge_change(&mut state.events, &change) {
                    tracing::debug!(kind = ?change.kind, id = ?change.id(), "Merged event push");
                }
                SmallVec::new()
            },

            EventListAction::FeedFailed { error } => {
                tracing::warn!(%error, "Events feed unavailable");
                state.live = false;
                SmallVec::new()
            },

            EventListAction::Unmount => {
                state.mounted = false;
                state.live = false;
                smallvec![Effect::Cancel(EffectId::new(EVENTS_FEED))]
            },
        }
    }
}

type EventListStore = Store<EventListState, EventListAction, SyncEnvironment, EventListReducer>;

/// A mounted event list
///
/// Dropping the view releases its push subscription.
pub struct EventListView {
    store: EventListStore,
}

impl EventListView {
    /// Mount a list and wait for its first fetch
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the store rejects the action.
    /// Fetch failures are reported in the state, not here.
    pub async fn mount(env: SyncEnvironment, filters: SearchFilters) -> Result<Self, SyncError> {
        let store = Store::with_broadcast_capacity(
            EventListState::default(),
            EventListReducer::new(),
            env,
            64,
        );
        let mut handle = store.send(EventListAction::Mount { filters }).await?;
        handle.wait().await;
        Ok(Self { store })
    }

    /// Change the filters and wait for the resulting fetch
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the store rejects the action.
    pub async fn set_filters(&self, filters: SearchFilters) -> Result<(), SyncError> {
        let mut handle = self.store.send(EventListAction::SetFilters { filters }).await?;
        handle.wait().await;
        Ok(())
    }

    /// Fetch again and wait for the result
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the store rejects the action.
    pub async fn refetch(&self) -> Result<(), SyncError> {
        let mut handle = self.store.send(EventListAction::Refetch).await?;
        handle.wait().await;
        Ok(())
    }

    /// Current state
    pub async fn snapshot(&self) -> EventListState {
        self.store.state(Clone::clone).await
    }

    /// Current events
    pub async fn events(&self) -> Vec<Event> {
        self.store.state(|s| s.events.clone()).await
    }

    /// Every action produced by the view's effects, after it is reduced
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<EventListAction> {
        self.store.subscribe_actions()
    }

    /// Wait until the push subscription is joined
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] if the subscription failed and
    /// [`SyncError::Unavailable`] on timeout.
    pub async fn wait_live(&self, timeout: Duration) -> Result<(), SyncError> {
        let mut updates = self.store.subscribe_actions();
        if self.store.state(|s| s.live).await {
            return Ok(());
        }

        tokio::time::timeout(timeout, async {
            loop {
                match updates.recv().await {
                    Ok(EventListAction::FeedReady) => return Ok(()),
                    Ok(EventListAction::FeedFailed { error }) => return Err(SyncError::Remote(error)),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SyncError::Unavailable("Event list closed".to_string()));
                    },
                }
            }
        })
        .await
        .map_err(|_| SyncError::Unavailable("Timed out joining the events feed".to_string()))?
    }

    /// Release the push subscription
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the store rejects the action.
    pub async fn unmount(&self) -> Result<(), SyncError> {
        self.store.send(EventListAction::Unmount).await?;
        Ok(())
    }
}

impl Drop for EventListView {
    fn drop(&mut self) {
        self.store.cancel_all();
    }
}

impl std::fmt::Debug for EventListView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListView").finish_non_exhaustive()
    }
}
