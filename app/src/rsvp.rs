//! RSVP mutation.
//!
//! One row per (event, user): answering again replaces the status. Nothing
//! is merged locally; an open event page picks the change up through its
//! push subscription.

use crate::environment::SyncEnvironment;
use crate::error::SyncError;
use crate::mutation::{MUTATION_TIMEOUT, Pending, RequestId, reject, request_id, settle};
use crate::queries::RSVP_CONFLICT;
use crate::types::{EventRsvp, RsvpStatus};
use chrono::NaiveDate;
use gather_core::effect::Effect;
use gather_core::reducer::Reducer;
use gather_core::remote::{Filter, Selection, Table};
use gather_core::{SmallVec, smallvec};
use gather_runtime::store::Store;
use serde_json::json;

const SIGN_IN_REQUIRED: &str = "Please sign in to RSVP";
const EVENT_PASSED: &str = "This event has already passed";

/// State of the RSVP controls
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RsvpState {
    /// Mutations in flight
    pub pending: Pending,
    /// Message of the last failure
    pub last_error: Option<String>,
}

impl RsvpState {
    /// Whether a mutation is in flight
    #[must_use]
    pub fn loading(&self) -> bool {
        self.pending.is_loading()
    }
}

/// Inputs of the RSVP controls
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RsvpAction {
    /// Answer `event_id` with `status`
    Submit {
        /// Correlation id
        request_id: RequestId,
        /// Event
        event_id: String,
        /// Day the event takes place; past events take no answers
        event_date: NaiveDate,
        /// Answer
        status: RsvpStatus,
    },
    /// Withdraw the answer to `event_id`
    Remove {
        /// Correlation id
        request_id: RequestId,
        /// Event
        event_id: String,
    },
    /// `Submit` finished
    Submitted {
        /// Correlation id
        request_id: RequestId,
        /// The stored row, or the failure
        result: Result<EventRsvp, SyncError>,
    },
    /// `Remove` finished
    Removed {
        /// Correlation id
        request_id: RequestId,
        /// Outcome
        result: Result<(), SyncError>,
    },
}

impl RsvpAction {
    /// Correlation id of a result action
    #[must_use]
    pub const fn settled(&self) -> Option<&RequestId> {
        match self {
            Self::Submitted { request_id, .. } | Self::Removed { request_id, .. } => Some(request_id),
            Self::Submit { .. } | Self::Remove { .. } => None,
        }
    }
}

/// Reducer of the RSVP controls
#[derive(Clone, Debug, Default)]
pub struct RsvpReducer;

impl RsvpReducer {
    /// Creates a new `RsvpReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for RsvpReducer {
    type State = RsvpState;
    type Action = RsvpAction;
    type Environment = SyncEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            RsvpAction::Submit {
                request_id,
                event_id,
                event_date,
                status,
            } => {
                state.pending.start(request_id);
                let done = move |result: Result<EventRsvp, SyncError>| RsvpAction::Submitted {
                    request_id,
                    result,
                };

                let Some(user_id) = env.session.user_id() else {
                    return smallvec![reject(
                        env.notices.clone(),
                        SyncError::unauthenticated(SIGN_IN_REQUIRED),
                        done,
                    )];
                };

                if event_date < env.clock.today() {
                    tracing::debug!(%event_id, %event_date, "Refusing RSVP to a past event");
                    return smallvec![reject(
                        env.notices.clone(),
                        SyncError::validation(EVENT_PASSED),
                        done,
                    )];
                }

                tracing::info!(%event_id, %user_id, status = status.as_str(), "Submitting RSVP");
                let client = env.client.clone();
                let row = json!({
                    "event_id": event_id,
                    "user_id": user_id,
                    "status": status.as_str(),
                });

                smallvec![settle(
                    env.notices.clone(),
                    async move {
                        let row = client
                            .upsert(
                                Table::EventRsvps,
                                row,
                                RSVP_CONFLICT.iter().map(ToString::to_string).collect(),
                                Selection::all(),
                            )
                            .await?;
                        Ok::<_, SyncError>(serde_json::from_value::<EventRsvp>(row)?)
                    },
                    move |_| format!("RSVP updated to {}", status.words()),
                    done,
                )]
            },

            RsvpAction::Remove {
                request_id,
                event_id,
            } => {
                state.pending.start(request_id);
                let done = move |result: Result<(), SyncError>| RsvpAction::Removed { request_id, result };

                let Some(user_id) = env.session.user_id() else {
                    return smallvec![reject(
                        env.notices.clone(),
                        SyncError::unauthenticated(SIGN_IN_REQUIRED),
                        done,
                    )];
                };

                tracing::info!(%event_id, %user_id, "Removing RSVP");
                let client = env.client.clone();

                smallvec![settle(
                    env.notices.clone(),
                    async move {
                        client
                            .delete(
                                Table::EventRsvps,
                                vec![Filter::eq("event_id", event_id), Filter::eq("user_id", user_id)],
                            )
                            .await?;
                        Ok::<_, SyncError>(())
                    },
                    |_| "RSVP removed".to_string(),
                    done,
                )]
            },

            RsvpAction::Submitted { request_id, result } => {
                state.pending.finish(&request_id);
                state.last_error = result.err().map(|e| e.to_string());
                SmallVec::new()
            },

            RsvpAction::Removed { request_id, result } => {
                state.pending.finish(&request_id);
                state.last_error = result.err().map(|e| e.to_string());
                SmallVec::new()
            },
        }
    }
}

/// RSVP controls of one page
#[derive(Clone)]
pub struct RsvpView {
    store: Store<RsvpState, RsvpAction, SyncEnvironment, RsvpReducer>,
}

impl RsvpView {
    /// Create the controls
    #[must_use]
    pub fn new(env: SyncEnvironment) -> Self {
        Self {
            store: Store::new(RsvpState::default(), RsvpReducer::new(), env),
        }
    }

    async fn run(&self, action: RsvpAction, id: RequestId) -> Result<RsvpAction, SyncError> {
        Ok(self
            .store
            .send_and_wait_for(action, |a| a.settled() == Some(&id), MUTATION_TIMEOUT)
            .await?)
    }

    /// Answer `event_id`, held on `event_date`, as the signed-in user
    ///
    /// # Errors
    ///
    /// - [`SyncError::Unauthenticated`]: nobody is signed in (the remote is
    ///   not contacted)
    /// - [`SyncError::Validation`]: the event is in the past (the remote is
    ///   not contacted)
    /// - [`SyncError::Remote`]: the upsert was rejected
    pub async fn rsvp_to_event(
        &self,
        event_id: impl Into<String>,
        event_date: NaiveDate,
        status: RsvpStatus,
    ) -> Result<EventRsvp, SyncError> {
        let id = request_id();
        let action = RsvpAction::Submit {
            request_id: id,
            event_id: event_id.into(),
            event_date,
            status,
        };
        match self.run(action, id).await? {
            RsvpAction::Submitted { result, .. } => result,
            other => Err(SyncError::Unavailable(format!("Unexpected result: {other:?}"))),
        }
    }

    /// Withdraw the signed-in user's answer to `event_id`
    ///
    /// # Errors
    ///
    /// - [`SyncError::Unauthenticated`]: nobody is signed in (the remote is
    ///   not contacted)
    /// - [`SyncError::Remote`]: the delete was rejected
    pub async fn remove_rsvp(&self, event_id: impl Into<String>) -> Result<(), SyncError> {
        let id = request_id();
        let action = RsvpAction::Remove {
            request_id: id,
            event_id: event_id.into(),
        };
        match self.run(action, id).await? {
            RsvpAction::Removed { result, .. } => result,
            other => Err(SyncError::Unavailable(format!("Unexpected result: {other:?}"))),
        }
    }

    /// Whether a mutation is in flight
    pub async fn loading(&self) -> bool {
        self.store.state(RsvpState::loading).await
    }

    /// Message of the last failure
    pub async fn last_error(&self) -> Option<String> {
        self.store.state(|s| s.last_error.clone()).await
    }
}

impl std::fmt::Debug for RsvpView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsvpView").finish_non_exhaustive()
    }
}
