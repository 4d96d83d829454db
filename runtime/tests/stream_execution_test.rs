//! Integration tests for long-lived effects: `Effect::Stream`,
//! `Effect::Cancellable` and `Effect::Cancel`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::stream;
use gather_core::{SmallVec, effect::Effect, effect::EffectId, reducer::Reducer, smallvec};
use gather_runtime::{EffectHandle, Store};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

const FEED: &str = "feed";

#[derive(Clone, Debug, Default, PartialEq)]
struct FeedState {
    items: Vec<u32>,
    completed: bool,
}

#[derive(Clone, Debug, PartialEq)]
enum FeedAction {
    /// Replay a fixed list of items
    Replay { items: Vec<u32> },
    /// Listen to the shared channel until cancelled
    Listen,
    /// Stop listening
    StopListening,
    Item { value: u32 },
    Completed,
}

/// Environment carrying the receiving half of a test channel
#[derive(Clone)]
struct FeedEnv {
    source: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<u32>>>>,
    released: Arc<AtomicUsize>,
}

/// Increments `released` when dropped, like a subscription releasing its channel
struct ReleaseOnDrop(Arc<AtomicUsize>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct FeedReducer;

impl Reducer for FeedReducer {
    type State = FeedState;
    type Action = FeedAction;
    type Environment = FeedEnv;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            FeedAction::Replay { items } => smallvec![Effect::Stream(Box::pin(stream::iter(
                items
                    .into_iter()
                    .map(|value| FeedAction::Item { value })
                    .chain(std::iter::once(FeedAction::Completed)),
            )))],
            FeedAction::Listen => {
                let source = Arc::clone(&env.source);
                let release = ReleaseOnDrop(Arc::clone(&env.released));
                let feed = async_stream::stream! {
                    let _release = release;
                    let Some(mut rx) = source.lock().await.take() else {
                        return;
                    };
                    while let Some(value) = rx.recv().await {
                        yield FeedAction::Item { value };
                    }
                };
                smallvec![Effect::Stream(Box::pin(feed)).cancellable(FEED)]
            },
            FeedAction::StopListening => smallvec![Effect::Cancel(EffectId::new(FEED))],
            FeedAction::Item { value } => {
                state.items.push(value);
                SmallVec::new()
            },
            FeedAction::Completed => {
                state.completed = true;
                SmallVec::new()
            },
        }
    }
}

fn feed_store() -> (
    Store<FeedState, FeedAction, FeedEnv, FeedReducer>,
    mpsc::UnboundedSender<u32>,
    Arc<AtomicUsize>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let released = Arc::new(AtomicUsize::new(0));
    let env = FeedEnv {
        source: Arc::new(tokio::sync::Mutex::new(Some(rx))),
        released: Arc::clone(&released),
    };
    (Store::new(FeedState::default(), FeedReducer, env), tx, released)
}

async fn settle(handle: &mut EffectHandle) {
    tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .expect("effects did not finish");
}

async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn stream_items_are_reduced_in_order() {
    let (store, _tx, _released) = feed_store();

    let mut handle = store
        .send(FeedAction::Replay {
            items: (0..100).collect(),
        })
        .await
        .unwrap();
    settle(&mut handle).await;

    let state = store.state(Clone::clone).await;
    assert_eq!(state.items, (0..100).collect::<Vec<_>>());
    assert!(state.completed);
}

#[tokio::test]
async fn empty_stream_only_completes() {
    let (store, _tx, _released) = feed_store();

    let mut handle = store.send(FeedAction::Replay { items: vec![] }).await.unwrap();
    settle(&mut handle).await;

    let state = store.state(Clone::clone).await;
    assert!(state.items.is_empty());
    assert!(state.completed);
}

#[tokio::test]
async fn cancellable_stream_is_not_tracked_by_handle() {
    let (store, tx, released) = feed_store();

    let mut handle = store.send(FeedAction::Listen).await.unwrap();
    tokio::time::timeout(Duration::from_millis(50), handle.wait())
        .await
        .expect("a running feed must not hold up the handle");
    assert_eq!(released.load(Ordering::SeqCst), 0);

    let mut rx = store.subscribe_actions();
    tx.send(1).unwrap();
    tx.send(2).unwrap();

    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(store.state(|s| s.items.clone()).await, vec![1, 2]);
}

#[tokio::test]
async fn cancel_effect_aborts_stream_and_releases_it() {
    let (store, tx, released) = feed_store();

    let mut rx = store.subscribe_actions();
    store.send(FeedAction::Listen).await.unwrap();
    tx.send(1).unwrap();
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();

    store.send(FeedAction::StopListening).await.unwrap();
    eventually(|| released.load(Ordering::SeqCst) == 1).await;
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(store.cancel_all(), 0);

    // Items sent after cancellation never reach the reducer
    let _ = tx.send(2);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.state(|s| s.items.clone()).await, vec![1]);
}

#[tokio::test]
async fn cancel_all_releases_feeds_and_reports_them() {
    let (store, _tx, released) = feed_store();

    store.send(FeedAction::Listen).await.unwrap();
    assert_eq!(store.cancel_all(), 1);
    assert_eq!(store.cancel_all(), 0);

    eventually(|| released.load(Ordering::SeqCst) == 1).await;
    assert_eq!(released.load(Ordering::SeqCst), 1);
}
