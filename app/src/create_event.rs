//! Event creation.

use crate::environment::SyncEnvironment;
use crate::error::SyncError;
use crate::mutation::{MUTATION_TIMEOUT, Pending, RequestId, reject, request_id, settle};
use crate::types::{Event, EventCategory, EventDraft, wire_time};
use chrono::NaiveDate;
use gather_core::effect::Effect;
use gather_core::reducer::Reducer;
use gather_core::remote::{Selection, Table};
use gather_core::{SmallVec, smallvec};
use gather_runtime::store::Store;
use serde_json::{Value, json};
use std::str::FromStr;

const SIGN_IN_REQUIRED: &str = "You must be signed in to create an event";

fn required<'a>(value: &'a str, message: &str) -> Result<&'a str, SyncError> {
    let value = value.trim();
    if value.is_empty() {
        Err(SyncError::validation(message))
    } else {
        Ok(value)
    }
}

/// Largest capacity the `events.max_attendees` integer column holds
pub const MAX_ATTENDEES: i64 = 2_147_483_647;

/// Check `draft` and build the row to insert for `organizer_id`
///
/// # Errors
///
/// Returns [`SyncError::Validation`] naming the first problem found.
pub fn event_row(draft: &EventDraft, organizer_id: &str, today: NaiveDate) -> Result<Value, SyncError> {
    let title = required(&draft.title, "Title is required")?;
    let description = required(&draft.description, "Description is required")?;
    let date = draft.date.ok_or_else(|| SyncError::validation("Date is required"))?;
    let time = draft.time.ok_or_else(|| SyncError::validation("Time is required"))?;
    let location = required(&draft.location, "Location is required")?;
    let category = EventCategory::from_str(required(&draft.category, "Category is required")?)?;

    if date < today {
        return Err(SyncError::validation("Event date cannot be in the past"));
    }
    let max_attendees = match draft.max_attendees {
        Some(n) if n <= 0 => {
            return Err(SyncError::validation("Max attendees must be a positive number"));
        },
        Some(n) if n > MAX_ATTENDEES => {
            return Err(SyncError::validation(format!(
                "Max attendees cannot exceed {MAX_ATTENDEES}"
            )));
        },
        Some(n) => json!(n),
        None => Value::Null,
    };
    let image_url = match draft.image_url.trim() {
        "" => Value::Null,
        url => json!(url),
    };

    Ok(json!({
        "title": title,
        "description": description,
        "date": date.to_string(),
        "time": time.format(wire_time::FORMAT).to_string(),
        "location": location,
        "category": category.as_str(),
        "max_attendees": max_attendees,
        "image_url": image_url,
        "organizer_id": organizer_id,
    }))
}

/// State of the creation form
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateEventState {
    /// Submissions in flight
    pub pending: Pending,
    /// Last event created from this form
    pub created: Option<Event>,
    /// Message of the last failure
    pub last_error: Option<String>,
}

/// Inputs of the creation form
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateEventAction {
    /// Submit the form
    Submit {
        /// Correlation id
        request_id: RequestId,
        /// Form contents
        draft: EventDraft,
    },
    /// `Submit` finished
    Created {
        /// Correlation id
        request_id: RequestId,
        /// The new event, or the failure
        result: Result<Event, SyncError>,
    },
}

/// Reducer of the creation form
#[derive(Clone, Debug, Default)]
pub struct CreateEventReducer;

impl CreateEventReducer {
    /// Creates a new `CreateEventReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for CreateEventReducer {
    type State = CreateEventState;
    type Action = CreateEventAction;
    type Environment = SyncEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            CreateEventAction::Submit { request_id, draft } => {
                state.pending.start(request_id);
                let done = move |result: Result<Event, SyncError>| CreateEventAction::Created {
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
                let row = match event_row(&draft, &user_id, env.clock.today()) {
                    Ok(row) => row,
                    Err(e) => return smallvec![reject(env.notices.clone(), e, done)],
                };

                tracing::info!(organizer_id = %user_id, title = %draft.title.trim(), "Creating event");
                let client = env.client.clone();

                smallvec![settle(
                    env.notices.clone(),
                    async move {
                        let row = client.insert(Table::Events, row, Selection::all()).await?;
                        Ok::<_, SyncError>(Event::from_row(row)?)
                    },
                    |_| "Event created successfully!".to_string(),
                    done,
                )]
            },

            CreateEventAction::Created { request_id, result } => {
                state.pending.finish(&request_id);
                match result {
                    Ok(event) => {
                        tracing::info!(event_id = %event.id, "Event created");
                        state.created = Some(event);
                        state.last_error = None;
                    },
                    Err(e) => state.last_error = Some(e.to_string()),
                }
                SmallVec::new()
            },
        }
    }
}

/// The event creation form
#[derive(Clone)]
pub struct CreateEventView {
    store: Store<CreateEventState, CreateEventAction, SyncEnvironment, CreateEventReducer>,
}

impl CreateEventView {
    /// Create the form
    #[must_use]
    pub fn new(env: SyncEnvironment) -> Self {
        Self {
            store: Store::new(CreateEventState::default(), CreateEventReducer::new(), env),
        }
    }

    /// Submit `draft` as the signed-in user
    ///
    /// # Errors
    ///
    /// - [`SyncError::Unauthenticated`]: nobody is signed in
    /// - [`SyncError::Validation`]: the draft is incomplete or invalid
    /// - [`SyncError::Remote`]: the insert was rejected
    pub async fn create_event(&self, draft: EventDraft) -> Result<Event, SyncError> {
        let id = request_id();
        let settled = self
            .store
            .send_and_wait_for(
                CreateEventAction::Submit { request_id: id, draft },
                |a| matches!(a, CreateEventAction::Created { request_id, .. } if *request_id == id),
                MUTATION_TIMEOUT,
            )
            .await?;
        match settled {
            CreateEventAction::Created { result, .. } => result,
            other => Err(SyncError::Unavailable(format!("Unexpected result: {other:?}"))),
        }
    }

    /// Whether a submission is in flight
    pub async fn loading(&self) -> bool {
        self.store.state(|s| s.pending.is_loading()).await
    }
}

impl std::fmt::Debug for CreateEventView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateEventView").finish_non_exhaustive()
    }
}
