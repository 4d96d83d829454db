//! # Gather Runtime
//!
//! The [`Store`] behind every Gather view.
//!
//! A store owns a view's state, runs its reducer under a write lock and
//! executes the returned effects on spawned tasks. Actions produced by those
//! effects are fed back into the reducer and then broadcast to observers.
//!
//! Long-lived effects (change feeds) are wrapped in
//! [`Effect::Cancellable`]: they belong to the store rather than to the
//! action that started them, and stop on [`Effect::Cancel`] or
//! [`Store::cancel_all`].
//!
//! ```ignore
//! use gather_runtime::Store;
//!
//! let store = Store::new(EventListState::default(), EventListReducer::new(), env);
//! let mut handle = store.send(EventListAction::Mount { filters }).await?;
//! handle.wait().await;
//! let count = store.state(|s| s.events.len()).await;
//! ```

use gather_core::{
    effect::{Effect, EffectId},
    reducer::Reducer,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{RwLock, watch};
use tokio::task::AbortHandle;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors of [`Store::send_and_wait_for`](crate::Store::send_and_wait_for)
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// No matching action arrived in time
        #[error("Timeout waiting for action")]
        Timeout,

        /// The action broadcast closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Completion of the effects started by one [`Store::send`]
///
/// Cancellable effects are not counted: a view's change feed never makes
/// the action that opened it look unfinished.
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let tracking = EffectTracking::new();
        let handle = Self {
            effects: Arc::clone(&tracking.counter),
            completion: tracking.notifier.subscribe(),
        };
        (handle, tracking)
    }

    /// Wait until every tracked effect, and the action it fed back, is done
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("running", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Counter shared by the tasks of one `send`
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    fn new() -> Self {
        let (notifier, _) = watch::channel(());
        Self {
            counter: Arc::new(AtomicUsize::new(0)),
            notifier,
        }
    }

    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Decrements on drop, so aborted and panicking tasks are counted too
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Abort handles of running cancellable effects, keyed by id
#[derive(Default)]
struct CancelRegistry {
    tasks: Mutex<HashMap<EffectId, Vec<AbortHandle>>>,
}

impl CancelRegistry {
    fn register(&self, id: &EffectId, handle: AbortHandle) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let handles = tasks.entry(id.clone()).or_default();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Abort every task registered under `id`; returns how many were running
    fn cancel(&self, id: &EffectId) -> usize {
        let handles = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .unwrap_or_default();
        abort_all(handles)
    }

    fn cancel_all(&self) -> usize {
        let handles: Vec<AbortHandle> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .flat_map(|(_, handles)| handles)
            .collect();
        abort_all(handles)
    }
}

fn abort_all(handles: Vec<AbortHandle>) -> usize {
    handles
        .into_iter()
        .filter(|handle| !handle.is_finished())
        .map(|handle| handle.abort())
        .count()
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        Arc, CancelRegistry, DecrementGuard, Effect, EffectHandle, EffectId, EffectTracking,
        Reducer, RwLock, StoreError,
    };
    use futures::StreamExt;
    use std::future::Future;
    use std::time::Duration;
    use tokio::sync::broadcast;

    /// State, reducer and environment of one view, plus its running effects
    ///
    /// Clones share state, effects and the action broadcast.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        cancellables: Arc<CancelRegistry>,
        /// Fed-back actions, sent after they are reduced
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Clone + Send + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a store whose action broadcast buffers 16 actions
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(initial_state, reducer, environment, 16)
        }

        /// Create a store with a larger action broadcast, for views whose
        /// observers would otherwise lag
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity);

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                cancellables: Arc::new(CancelRegistry::default()),
                action_broadcast,
            }
        }

        /// Reduce `action` and start its effects
        ///
        /// Returns once the effects are started. Concurrent sends serialize
        /// on the state lock; their effects finish in any order.
        ///
        /// # Errors
        ///
        /// Never fails today; the `Result` keeps call sites uniform with
        /// [`Store::send_and_wait_for`].
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            metrics::counter!("store.commands.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!(effects = effects.len(), "Reduced action");
                effects
            };

            for effect in effects {
                self.execute_effect(effect, &tracking, None);
            }

            Ok(handle)
        }

        /// Send `action` and return the first fed-back action matching
        /// `predicate`
        ///
        /// Mutations carry a request id and match their result on it.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: nothing matched within `timeout`
        /// - [`StoreError::ChannelClosed`]: the action broadcast closed
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            // Subscribed before sending so a fast result is not missed
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Observe every action fed back by an effect
        ///
        /// Actions passed to [`Store::send`] directly are not broadcast.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read the state through `f`
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Abort every running cancellable effect
        ///
        /// Returns the number of tasks aborted.
        pub fn cancel_all(&self) -> usize {
            let aborted = self.cancellables.cancel_all();
            if aborted > 0 {
                tracing::debug!(aborted, "Cancelled all effects");
                metrics::counter!("store.effects.cancelled").increment(aborted as u64);
            }
            aborted
        }

        fn cancel(&self, id: &EffectId) {
            let aborted = self.cancellables.cancel(id);
            if aborted > 0 {
                tracing::debug!(effect_id = %id, aborted, "Cancelled effect");
                metrics::counter!("store.effects.cancelled").increment(aborted as u64);
            }
        }

        async fn feed_back(&self, action: A) {
            if self.send(action.clone()).await.is_ok() {
                let _ = self.action_broadcast.send(action);
            }
        }

        fn spawn_effect<F>(&self, tracking: &EffectTracking, scope: Option<&EffectId>, task: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            tracking.increment();
            let guard = DecrementGuard(tracking.clone());

            let join = tokio::spawn(async move {
                let _guard = guard;
                task.await;
            });

            if let Some(id) = scope {
                self.cancellables.register(id, join.abort_handle());
            }
        }

        /// Run one effect
        ///
        /// `scope` is the id of the enclosing [`Effect::Cancellable`]; tasks
        /// spawned under it are aborted when that id is cancelled. A
        /// panicking task is isolated by `tokio::spawn`.
        #[tracing::instrument(skip(self, effect, tracking, scope), name = "execute_effect")]
        fn execute_effect(&self, effect: Effect<A>, tracking: &EffectTracking, scope: Option<&EffectId>) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);

                    let store = self.clone();
                    self.spawn_effect(tracking, scope, async move {
                        if let Some(action) = fut.await {
                            store.feed_back(action).await;
                        }
                    });
                },
                Effect::Stream(mut stream) => {
                    metrics::counter!("store.effects.executed", "type" => "stream").increment(1);

                    let store = self.clone();
                    self.spawn_effect(tracking, scope, async move {
                        while let Some(action) = stream.next().await {
                            store.feed_back(action).await;
                        }
                        tracing::trace!("Effect stream ended");
                    });
                },
                Effect::Cancellable { id, effect } => {
                    metrics::counter!("store.effects.executed", "type" => "cancellable")
                        .increment(1);
                    tracing::debug!(effect_id = %id, "Starting cancellable effect");

                    // Owned by the store; nobody waits on this tracking
                    self.execute_effect(*effect, &EffectTracking::new(), Some(&id));
                },
                Effect::Cancel(id) => {
                    metrics::counter!("store.effects.executed", "type" => "cancel").increment(1);
                    self.cancel(&id);
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                cancellables: Arc::clone(&self.cancellables),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

pub use store::Store;
