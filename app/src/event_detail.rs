//! Single event sync.
//!
//! Shows one event with its organizer, comments and RSVPs. The event is
//! fetched in full when the view opens or switches to another id, and again
//! on every comment or RSVP change pushed for it. Changes are never merged
//! incrementally.

use crate::environment::SyncEnvironment;
use crate::error::SyncError;
use crate::queries::{event_channel, event_detail_query};
use crate::types::Event;
use futures::StreamExt;
use gather_core::effect::{Effect, EffectId};
use gather_core::reducer::Reducer;
use gather_core::remote::{Change, RemoteError};
use gather_core::{SmallVec, smallvec};
use gather_runtime::store::Store;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;

/// Id of the push subscription effect
pub const EVENT_FEED: &str = "event-feed";

/// State of an event page
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventDetailState {
    /// Id being shown
    pub event_id: Option<String>,
    /// The event, once fetched
    pub event: Option<Event>,
    /// A fetch is in flight
    pub loading: bool,
    /// Message of the last failure, cleared by the next successful fetch
    pub error: Option<String>,
    /// The push subscription is joined
    pub live: bool,
    /// Sequence number of the most recently issued fetch
    pub fetch_seq: u64,
}

/// Inputs of the event page
#[derive(Clone, Debug, PartialEq)]
pub enum EventDetailAction {
    /// Show `event_id`, replacing whatever was shown
    Open {
        /// Event to show
        event_id: String,
    },
    /// Fetch the current event again
    Refetch,
    /// A fetch completed
    Loaded {
        /// Sequence number of the fetch
        seq: u64,
        /// The event, or the failure
        result: Result<Event, SyncError>,
    },
    /// The push subscription for `event_id` is joined
    FeedReady {
        /// Event the subscription belongs to
        event_id: String,
    },
    /// A comment or RSVP change was pushed
    ChangeReceived {
        /// Event the subscription belongs to
        event_id: String,
        /// The change
        change: Change,
    },
    /// The push subscription could not be opened or broke
    FeedFailed {
        /// Event the subscription belongs to
        event_id: String,
        /// What went wrong
        error: String,
    },
    /// Stop showing the event
    Close,
}

/// Whether `change` concerns `event_id`
///
/// Deletes may only carry the primary key; those are assumed to match, since
/// the channel itself is filtered by event.
fn concerns(change: &Change, event_id: &str) -> bool {
    change
        .row()
        .and_then(|row| row.get("event_id"))
        .and_then(Value::as_str)
        .is_none_or(|id| id == event_id)
}

/// Reducer of the event page
#[derive(Clone, Debug, Default)]
pub struct EventDetailReducer;

impl EventDetailReducer {
    /// Creates a new `EventDetailReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn fetch(
        state: &mut EventDetailState,
        event_id: String,
        env: &SyncEnvironment,
    ) -> Effect<EventDetailAction> {
        state.fetch_seq += 1;
        state.loading = true;

        let seq = state.fetch_seq;
        let client = env.client.clone();
        let notices = env.notices.clone();

        tracing::debug!(seq, %event_id, "Fetching event");

        Effect::Future(Box::pin(async move {
            let result = match client.select_single(event_detail_query(&event_id)).await {
                Ok(row) => Event::from_row(row).map_err(SyncError::from),
                Err(RemoteError::NotFound(_)) => Err(SyncError::Remote("Event not found".to_string())),
                Err(e) => Err(SyncError::from(e)),
            };

            if let Err(e) = &result {
                notices.error(e.to_string());
            }
            Some(EventDetailAction::Loaded { seq, result })
        }))
    }

    fn subscribe(event_id: String, env: &SyncEnvironment) -> Effect<EventDetailAction> {
        let client = env.client.clone();

        Effect::Stream(Box::pin(async_stream::stream! {
            match client.subscribe(event_channel(&event_id)).await {
                Ok(mut subscription) => {
                    yield EventDetailAction::FeedReady { event_id: event_id.clone() };
                    while let Some(change) = subscription.next().await {
                        yield EventDetailAction::ChangeReceived {
                            event_id: event_id.clone(),
                            change,
                        };
                    }
                    yield EventDetailAction::FeedFailed {
                        event_id: event_id.clone(),
                        error: "Realtime channel closed".to_string(),
                    };
                },
                Err(e) => {
                    yield EventDetailAction::FeedFailed {
                        event_id: event_id.clone(),
                        error: e.to_string(),
                    };
                },
            }
        }))
        .cancellable(EVENT_FEED)
    }

    fn is_current(state: &EventDetailState, event_id: &str) -> bool {
        state.event_id.as_deref() == Some(event_id)
    }
}

impl Reducer for EventDetailReducer {
    type State = EventDetailState;
    type Action = EventDetailAction;
    type Environment = SyncEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            EventDetailAction::Open { event_id } => {
                if Self::is_current(state, &event_id) {
                    return SmallVec::new();
                }

                tracing::debug!(%event_id, previous = ?state.event_id, "Opening event");
                state.event_id = Some(event_id.clone());
                state.event = None;
                state.error = None;
                state.live = false;

                smallvec![
                    Effect::Cancel(EffectId::new(EVENT_FEED)),
                    Self::fetch(state, event_id.clone(), env),
                    Self::subscribe(event_id, env),
                ]
            },

            EventDetailAction::Refetch => match state.event_id.clone() {
                Some(event_id) => smallvec![Self::fetch(state, event_id, env)],
                None => SmallVec::new(),
            },

            EventDetailAction::Loaded { seq, result } => {
                if seq != state.fetch_seq {
                    tracing::debug!(seq, latest = state.fetch_seq, "Discarding stale event");
                    return SmallVec::new();
                }
                state.loading = false;
                match result {
                    Ok(event) => {
                        state.event = Some(event);
                        state.error = None;
                    },
                    Err(e) => state.error = Some(e.to_string()),
                }
                SmallVec::new()
            },

            EventDetailAction::FeedReady { event_id } => {
                if Self::is_current(state, &event_id) {
                    tracing::debug!(%event_id, "Event feed joined");
                    state.live = true;
                }
                SmallVec::new()
            },

            EventDetailAction::ChangeReceived { event_id, change } => {
                if !Self::is_current(state, &event_id) || !concerns(&change, &event_id) {
                    tracing::debug!(%event_id, table = %change.table, "Ignoring change for another event");
                    return SmallVec::new();
                }
                tracing::debug!(%event_id, table = %change.table, kind = ?change.kind, "Refetching after push");
                smallvec![Self::fetch(state, event_id, env)]
            },

            EventDetailAction::FeedFailed { event_id, error } => {
                if Self::is_current(state, &event_id) {
                    tracing::warn!(%event_id, %error, "Event feed unavailable");
                    state.live = false;
                }
                SmallVec::new()
            },

            EventDetailAction::Close => {
                state.event_id = None;
                state.event = None;
                state.live = false;
                smallvec![Effect::Cancel(EffectId::new(EVENT_FEED))]
            },
        }
    }
}

type EventDetailStore =
    Store<EventDetailState, EventDetailAction, SyncEnvironment, EventDetailReducer>;

/// An open event page
///
/// Dropping the view releases its push subscription.
pub struct EventDetailView {
    store: EventDetailStore,
}

impl EventDetailView {
    /// Open `event_id` and wait for its first fetch
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the store rejects the action.
    /// Fetch failures are reported in the state.
    pub async fn open(env: SyncEnvironment, event_id: impl Into<String>) -> Result<Self, SyncError> {
        let view = Self {
            store: Store::with_broadcast_capacity(
                EventDetailState::default(),
                EventDetailReducer::new(),
                env,
                64,
            ),
        };
        view.switch(event_id).await?;
        Ok(view)
    }

    /// Show another event and wait for its first fetch
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the store rejects the action.
    pub async fn switch(&self, event_id: impl Into<String>) -> Result<(), SyncError> {
        let mut handle = self
            .store
            .send(EventDetailAction::Open {
                event_id: event_id.into(),
            })
            .await?;
        handle.wait().await;
        Ok(())
    }

    /// Fetch again and wait for the result
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the store rejects the action.
    pub async fn refetch(&self) -> Result<(), SyncError> {
        let mut handle = self.store.send(EventDetailAction::Refetch).await?;
        handle.wait().await;
        Ok(())
    }

    /// Current state
    pub async fn snapshot(&self) -> EventDetailState {
        self.store.state(Clone::clone).await
    }

    /// The event, once fetched
    pub async fn event(&self) -> Option<Event> {
        self.store.state(|s| s.event.clone()).await
    }

    /// Every action produced by the view's effects, after it is reduced
    #[must_use]
    pub fn updates(&self) -> broadcast::Receiver<EventDetailAction> {
        self.store.subscribe_actions()
    }

    /// Wait until the push subscription of the current event is joined
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] if the subscription failed and
    /// [`SyncError::Unavailable`] on timeout.
    pub async fn wait_live(&self, timeout: Duration) -> Result<(), SyncError> {
        let mut updates = self.store.subscribe_actions();
        let (live, current) = self.store.state(|s| (s.live, s.event_id.clone())).await;
        if live {
            return Ok(());
        }

        tokio::time::timeout(timeout, async {
            loop {
                match updates.recv().await {
                    Ok(EventDetailAction::FeedReady { event_id }) if Some(&event_id) == current.as_ref() => {
                        return Ok(());
                    },
                    Ok(EventDetailAction::FeedFailed { event_id, error })
                        if Some(&event_id) == current.as_ref() =>
                    {
                        return Err(SyncError::Remote(error));
                    },
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(SyncError::Unavailable("Event page closed".to_string()));
                    },
                }
            }
        })
        .await
        .map_err(|_| SyncError::Unavailable("Timed out joining the event feed".to_string()))?
    }

    /// Stop showing the event and release the push subscription
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Unavailable`] if the store rejects the action.
    pub async fn close(&self) -> Result<(), SyncError> {
        self.store.send(EventDetailAction::Close).await?;
        Ok(())
    }
}

impl Drop for EventDetailView {
    fn drop(&mut self) {
        self.store.cancel_all();
    }
}

impl std::fmt::Debug for EventDetailView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDetailView").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testkit;
    use gather_core::remote::{ChangeKind, Table};
    use gather_testing::ReducerTest;
    use gather_testing::assertions::{
        assert_cancels, assert_effects_count, assert_has_cancellable, assert_has_future_effect,
        assert_no_effects,
    };
    use serde_json::json;

    fn comment_change(event_id: &str) -> Change {
        Change {
            table: Table::EventComments,
            kind: ChangeKind::Insert,
            record: Some(json!({ "id": "c1", "event_id": event_id, "content": "hi" })),
            old_record: None,
        }
    }

    fn showing(event_id: &str) -> EventDetailState {
        EventDetailState {
            event_id: Some(event_id.to_string()),
            fetch_seq: 1,
            ..EventDetailState::default()
        }
    }

    #[test]
    fn open_cancels_then_fetches_and_subscribes() {
        ReducerTest::new(EventDetailReducer::new())
            .with_env(testkit::offline_env())
            .given_state(showing("e1"))
            .when_action(EventDetailAction::Open {
                event_id: "e2".to_string(),
            })
            .then_state(|state| {
                assert_eq!(state.event_id.as_deref(), Some("e2"));
                assert_eq!(state.event, None);
                assert_eq!(state.fetch_seq, 2);
            })
            .then_effects(|effects| {
                assert_effects_count(effects, 3);
                assert!(matches!(&effects[0], Effect::Cancel(id) if id.as_str() == EVENT_FEED));
                assert_has_future_effect(effects);
                assert_has_cancellable(effects, EVENT_FEED);
            })
            .run();
    }

    #[test]
    fn reopening_the_same_id_does_nothing() {
        ReducerTest::new(EventDetailReducer::new())
            .with_env(testkit::offline_env())
            .given_state(showing("e1"))
            .when_action(EventDetailAction::Open {
                event_id: "e1".to_string(),
            })
            .then_effects(assert_no_effects)
            .run();
    }

    #[test]
    fn matching_change_triggers_one_refetch() {
        ReducerTest::new(EventDetailReducer::new())
            .with_env(testkit::offline_env())
            .given_state(showing("e1"))
            .when_action(EventDetailAction::ChangeReceived {
                event_id: "e1".to_string(),
                change: comment_change("e1"),
            })
            .then_state(|state| assert_eq!(state.fetch_seq, 2))
            .then_effects(|effects| {
                assert_effects_count(effects, 1);
                assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn changes_for_other_events_are_ignored() {
        ReducerTest::new(EventDetailReducer::new())
            .with_env(testkit::offline_env())
            .given_state(showing("e1"))
            .when_actions([
                EventDetailAction::ChangeReceived {
                    event_id: "e1".to_string(),
                    change: comment_change("e2"),
                },
                EventDetailAction::ChangeReceived {
                    event_id: "e0".to_string(),
                    change: comment_change("e0"),
                },
            ])
            .then_state(|state| assert_eq!(state.fetch_seq, 1))
            .then_effects(assert_no_effects)
            .run();
    }

    #[test]
    fn deletes_without_event_id_still_refetch() {
        let delete = Change {
            table: Table::EventRsvps,
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(json!({ "id": "r1" })),
        };
        assert!(concerns(&delete, "e1"));
    }

    #[test]
    fn not_found_keeps_the_error_message() {
        ReducerTest::new(EventDetailReducer::new())
            .with_env(testkit::offline_env())
            .given_state(showing("e1"))
            .when_action(EventDetailAction::Loaded {
                seq: 1,
                result: Err(SyncError::Remote("Event not found".to_string())),
            })
            .then_state(|state| {
                assert_eq!(state.error.as_deref(), Some("Event not found"));
                assert!(!state.loading);
            })
            .run();
    }

    #[test]
    fn close_cancels_the_feed() {
        ReducerTest::new(EventDetailReducer::new())
            .with_env(testkit::offline_env())
            .given_state(showing("e1"))
            .when_action(EventDetailAction::Close)
            .then_state(|state| assert_eq!(state.event_id, None))
            .then_effects(|effects| assert_cancels(effects, EVENT_FEED))
            .run();
    }
}
