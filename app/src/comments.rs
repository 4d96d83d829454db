//! Comment mutation.
//!
//! Adding requires a signed-in user and non-blank content, both checked
//! before the remote is contacted. Deleting goes by id only: who may delete
//! what (the author, the event's organizer, any organizer) is decided by the
//! backend's row policies, and a delete that removed nothing is a failure.

use crate::environment::SyncEnvironment;
use crate::error::SyncError;
use crate::mutation::{MUTATION_TIMEOUT, Pending, RequestId, reject, request_id, settle};
use crate::queries::comment_returning;
use crate::types::EventComment;
use gather_core::effect::Effect;
use gather_core::reducer::Reducer;
use gather_core::remote::{Filter, Table};
use gather_core::{SmallVec, smallvec};
use gather_runtime::store::Store;
use serde_json::json;

const SIGN_IN_REQUIRED: &str = "Please sign in to comment";
const EMPTY_COMMENT: &str = "Comment cannot be empty";

/// State of the comment controls
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommentsState {
    /// Mutations in flight
    pub pending: Pending,
    /// Message of the last failure
    pub last_error: Option<String>,
}

/// Inputs of the comment controls
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommentsAction {
    /// Post `content` on `event_id`
    Add {
        /// Correlation id
        request_id: RequestId,
        /// Event
        event_id: String,
        /// Raw text as typed
        content: String,
    },
    /// Delete comment `comment_id`
    Delete {
        /// Correlation id
        request_id: RequestId,
        /// Comment
        comment_id: String,
    },
    /// `Add` finished
    Added {
        /// Correlation id
        request_id: RequestId,
        /// The stored comment with its author, or the failure
        result: Result<EventComment, SyncError>,
    },
    /// `Delete` finished
    Deleted {
        /// Correlation id
        request_id: RequestId,
        /// Outcome
        result: Result<(), SyncError>,
    },
}

impl CommentsAction {
    /// Correlation id of a result action
    #[must_use]
    pub const fn settled(&self) -> Option<&RequestId> {
        match self {
            Self::Added { request_id, .. } | Self::Deleted { request_id, .. } => Some(request_id),
            Self::Add { .. } | Self::Delete { .. } => None,
        }
    }
}

/// Reducer of the comment controls
#[derive(Clone, Debug, Default)]
pub struct CommentsReducer;

impl CommentsReducer {
    /// Creates a new `CommentsReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Reducer for CommentsReducer {
    type State = CommentsState;
    type Action = CommentsAction;
    type Environment = SyncEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            CommentsAction::Add {
                request_id,
                event_id,
                content,
            } => {
                state.pending.start(request_id);
                let done = move |result: Result<EventComment, SyncError>| CommentsAction::Added {
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
                let content = content.trim();
                if content.is_empty() {
                    return smallvec![reject(
                        env.notices.clone(),
                        SyncError::validation(EMPTY_COMMENT),
                        done,
                    )];
                }

                tracing::info!(%event_id, %user_id, "Adding comment");
                let client = env.client.clone();
                let row = json!({
                    "event_id": event_id,
                    "user_id": user_id,
                    "content": content,
                });

                smallvec![settle(
                    env.notices.clone(),
                    async move {
                        let row = client
                            .insert(Table::EventComments, row, comment_returning())
                            .await?;
                        Ok::<_, SyncError>(serde_json::from_value::<EventComment>(row)?)
                    },
                    |_| "Comment added".to_string(),
                    done,
                )]
            },

            CommentsAction::Delete {
                request_id,
                comment_id,
            } => {
                state.pending.start(request_id);
                let done = move |result: Result<(), SyncError>| CommentsAction::Deleted {
                    request_id,
                    result,
                };

                if env.session.user_id().is_none() {
                    return smallvec![reject(
                        env.notices.clone(),
                        SyncError::unauthenticated(SIGN_IN_REQUIRED),
                        done,
                    )];
                }

                tracing::info!(%comment_id, "Deleting comment");
                let client = env.client.clone();

                smallvec![settle(
                    env.notices.clone(),
                    async move {
                        let removed = client
                            .delete(Table::EventComments, vec![Filter::eq("id", comment_id.clone())])
                            .await?;
                        if removed.is_empty() {
                            tracing::warn!(%comment_id, "Comment delete removed nothing");
                            return Err(SyncError::Remote(
                                "Comment not found or you are not allowed to delete it".to_string(),
                            ));
                        }
                        Ok::<_, SyncError>(())
                    },
                    |_| "Comment deleted".to_string(),
                    done,
                )]
            },

            CommentsAction::Added { request_id, result } => {
                state.pending.finish(&request_id);
                state.last_error = result.err().map(|e| e.to_string());
                SmallVec::new()
            },

            CommentsAction::Deleted { request_id, result } => {
                state.pending.finish(&request_id);
                state.last_error = result.err().map(|e| e.to_string());
                SmallVec::new()
            },
        }
    }
}

/// Comment controls of one page
#[derive(Clone)]
pub struct CommentsView {
    store: Store<CommentsState, CommentsAction, SyncEnvironment, CommentsReducer>,
}

impl CommentsView {
    /// Create the controls
    #[must_use]
    pub fn new(env: SyncEnvironment) -> Self {
        Self {
            store: Store::new(CommentsState::default(), CommentsReducer::new(), env),
        }
    }

    async fn run(&self, action: CommentsAction, id: RequestId) -> Result<CommentsAction, SyncError> {
        Ok(self
            .store
            .send_and_wait_for(action, |a| a.settled() == Some(&id), MUTATION_TIMEOUT)
            .await?)
    }

    /// Post a comment as the signed-in user
    ///
    /// # Errors
    ///
    /// - [`SyncError::Unauthenticated`]: nobody is signed in
    /// - [`SyncError::Validation`]: the content is blank
    /// - [`SyncError::Remote`]: the insert was rejected
    pub async fn add_comment(
        &self,
        event_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<EventComment, SyncError> {
        let id = request_id();
        let action = CommentsAction::Add {
            request_id: id,
            event_id: event_id.into(),
            content: content.into(),
        };
        match self.run(action, id).await? {
            CommentsAction::Added { result, .. } => result,
            other => Err(SyncError::Unavailable(format!("Unexpected result: {other:?}"))),
        }
    }

    /// Delete a comment
    ///
    /// # Errors
    ///
    /// - [`SyncError::Unauthenticated`]: nobody is signed in
    /// - [`SyncError::Remote`]: the delete was rejected or removed nothing
    pub async fn delete_comment(&self, comment_id: impl Into<String>) -> Result<(), SyncError> {
        let id = request_id();
        let action = CommentsAction::Delete {
            request_id: id,
            comment_id: comment_id.into(),
        };
        match self.run(action, id).await? {
            CommentsAction::Deleted { result, .. } => result,
            other => Err(SyncError::Unavailable(format!("Unexpected result: {other:?}"))),
        }
    }

    /// Whether a mutation is in flight
    pub async fn loading(&self) -> bool {
        self.store.state(|s| s.pending.is_loading()).await
    }
}

impl std::fmt::Debug for CommentsView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentsView").finish_non_exhaustive()
    }
}
