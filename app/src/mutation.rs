//! Building blocks shared by the mutation views (RSVP, comments, event
//! creation).
//!
//! Every mutation carries a request id. The reducer records it as pending,
//! emits one future effect that performs the call, posts the outcome notice
//! and feeds back a result action carrying the same id. Views wait for that
//! action with [`Store::send_and_wait_for`](gather_runtime::store::Store::send_and_wait_for).

use crate::error::SyncError;
use crate::notice::NoticeBoard;
use gather_core::effect::Effect;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// How long a view waits for a mutation result
pub const MUTATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Correlates a mutation with its result action
pub type RequestId = Uuid;

/// Fresh request id
#[must_use]
pub fn request_id() -> RequestId {
    Uuid::new_v4()
}

/// Mutations in flight
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pending {
    requests: HashSet<RequestId>,
}

impl Pending {
    /// Record `id` as in flight
    pub fn start(&mut self, id: RequestId) {
        self.requests.insert(id);
    }

    /// Record `id` as settled
    pub fn finish(&mut self, id: &RequestId) {
        self.requests.remove(id);
    }

    /// Whether anything is in flight
    #[must_use]
    pub fn is_loading(&self) -> bool {
        !self.requests.is_empty()
    }
}

/// Run `work`, post its outcome and feed back `done(result)`
pub fn settle<A, T, W, S, D>(notices: NoticeBoard, work: W, success: S, done: D) -> Effect<A>
where
    A: Send + 'static,
    T: Send + 'static,
    W: Future<Output = Result<T, SyncError>> + Send + 'static,
    S: FnOnce(&T) -> String + Send + 'static,
    D: FnOnce(Result<T, SyncError>) -> A + Send + 'static,
{
    Effect::Future(Box::pin(async move {
        let result = work.await;
        match &result {
            Ok(value) => notices.success(success(value)),
            Err(error) => notices.error(error.to_string()),
        }
        Some(done(result))
    }))
}

/// Fail without contacting the remote: post `error` and feed back
/// `done(Err(error))`
pub fn reject<A, T, D>(notices: NoticeBoard, error: SyncError, done: D) -> Effect<A>
where
    A: Send + 'static,
    T: Send + 'static,
    D: FnOnce(Result<T, SyncError>) -> A + Send + 'static,
{
    Effect::Future(Box::pin(async move {
        notices.error(error.to_string());
        Some(done(Err(error)))
    }))
}
