//! Integration tests for the event list view: filtering, ordering and the
//! live feed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{SETTLE, anonymous, event_row, quiesce, world};
use gather::{EventListView, SearchFilters, SortBy};
use gather_core::remote::{RemoteError, Table};
use gather_testing::Operation;
use gather_testing::helpers::eventually;
use serde_json::json;

fn ids(events: &[gather::Event]) -> Vec<String> {
    events.iter().map(|e| e.id.clone()).collect()
}

#[tokio::test]
async fn mount_lists_events_by_date() {
    let world = world();
    let env = anonymous(&world.backend).await;

    let view = EventListView::mount(env, SearchFilters::default()).await.unwrap();

    let state = view.snapshot().await;
    assert_eq!(ids(&state.events), ["e1", "e2", "e3"]);
    assert!(!state.loading);
    assert_eq!(state.error, None);
    assert_eq!(world.backend.request_count(Operation::Select, Table::Events), 1);
}

#[tokio::test]
async fn each_filter_change_issues_one_query() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let view = EventListView::mount(env, SearchFilters::default()).await.unwrap();

    view.set_filters(SearchFilters::default().with_category("music"))
        .await
        .unwrap();
    assert_eq!(ids(&view.events().await), ["e2"]);
    assert_eq!(world.backend.request_count(Operation::Select, Table::Events), 2);

    // Same filters after trimming
    view.set_filters(SearchFilters::default().with_category("  music "))
        .await
        .unwrap();
    quiesce().await;
    assert_eq!(world.backend.request_count(Operation::Select, Table::Events), 2);

    view.set_filters(SearchFilters::default().with_query("RUST"))
        .await
        .unwrap();
    assert_eq!(ids(&view.events().await), ["e1"]);
    assert_eq!(world.backend.request_count(Operation::Select, Table::Events), 3);
}

#[tokio::test]
async fn location_and_date_filters_narrow_the_list() {
    let world = world();
    world.backend.seed(
        Table::Events,
        [json!({
            "id": "e4",
            "title": "Picnic",
            "description": "Bring food",
            "date": "2030-02-15",
            "time": "12:00:00",
            "location": "Riverside Park",
            "category": "social",
            "organizer_id": world.organizer_id,
        })],
    );
    let env = anonymous(&world.backend).await;

    let filters = SearchFilters::default()
        .with_location("park")
        .with_date(chrono::NaiveDate::from_ymd_opt(2030, 2, 1).unwrap());
    let view = EventListView::mount(env, filters).await.unwrap();

    assert_eq!(ids(&view.events().await), ["e4"]);
}

#[tokio::test]
async fn popularity_orders_by_rsvp_count() {
    let world = world();
    world.backend.seed(
        Table::EventRsvps,
        [
            json!({ "event_id": "e3", "user_id": world.member_id, "status": "attending" }),
            json!({ "event_id": "e3", "user_id": world.other_id, "status": "maybe" }),
            json!({ "event_id": "e2", "user_id": world.member_id, "status": "attending" }),
        ],
    );
    let env = anonymous(&world.backend).await;

    let view = EventListView::mount(env, SearchFilters::default().sorted_by(SortBy::Popularity))
        .await
        .unwrap();

    let events = view.events().await;
    assert_eq!(ids(&events), ["e3", "e2", "e1"]);
    assert_eq!(
        events.iter().map(|e| e.rsvp_count).collect::<Vec<_>>(),
        [2, 1, 0]
    );
}

#[tokio::test]
async fn newest_first_when_sorted_by_creation() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let view = EventListView::mount(env, SearchFilters::default().sorted_by(SortBy::CreatedAt))
        .await
        .unwrap();
    view.wait_live(SETTLE).await.unwrap();

    world
        .backend
        .push_insert(
            Table::Events,
            event_row("e9", "Late addition", "2030-06-01", "other", &world.organizer_id),
        )
        .unwrap();
    view.refetch().await.unwrap();

    assert_eq!(view.events().await[0].id, "e9");
}

#[tokio::test]
async fn pushed_insert_leads_the_list_regardless_of_filters() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let view = EventListView::mount(env, SearchFilters::default().with_category("music"))
        .await
        .unwrap();
    view.wait_live(SETTLE).await.unwrap();

    world
        .backend
        .push_insert(
            Table::Events,
            event_row("e9", "Hack day", "2030-05-01", "technology", &world.organizer_id),
        )
        .unwrap();

    assert!(
        eventually(SETTLE, || async { view.events().await.len() == 2 }).await,
        "pushed event never arrived"
    );
    assert_eq!(ids(&view.events().await), ["e9", "e2"]);
    // Pushes never trigger a query
    assert_eq!(world.backend.request_count(Operation::Select, Table::Events), 1);
}

#[tokio::test]
async fn pushed_update_replaces_in_place() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let view = EventListView::mount(env, SearchFilters::default()).await.unwrap();
    view.wait_live(SETTLE).await.unwrap();

    world
        .backend
        .push_update(Table::Events, "e2", &json!({ "title": "Jazz night (moved)" }))
        .unwrap();

    assert!(
        eventually(SETTLE, || async {
            view.events().await[1].title == "Jazz night (moved)"
        })
        .await
    );
    assert_eq!(ids(&view.events().await), ["e1", "e2", "e3"]);
}

#[tokio::test]
async fn pushed_delete_removes_exactly_one() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let view = EventListView::mount(env, SearchFilters::default()).await.unwrap();
    view.wait_live(SETTLE).await.unwrap();

    world.backend.push_delete(Table::Events, "e2").unwrap();
    assert!(eventually(SETTLE, || async { view.events().await.len() == 2 }).await);
    assert_eq!(ids(&view.events().await), ["e1", "e3"]);

    // Gone already: nothing to delete, nothing pushed
    assert!(world.backend.push_delete(Table::Events, "e2").is_none());
    quiesce().await;
    assert_eq!(ids(&view.events().await), ["e1", "e3"]);
}

#[tokio::test]
async fn fetch_failure_is_reported_then_cleared_by_refetch() {
    let world = world();
    let env = anonymous(&world.backend).await;
    world.backend.fail_next(
        Operation::Select,
        Table::Events,
        RemoteError::Transport("connection reset".to_string()),
    );

    let view = EventListView::mount(env.clone(), SearchFilters::default())
        .await
        .unwrap();

    let state = view.snapshot().await;
    assert!(state.error.is_some());
    assert!(state.events.is_empty());
    assert!(!state.loading);
    assert_eq!(env.notices.visible().len(), 1);

    view.refetch().await.unwrap();
    let state = view.snapshot().await;
    assert_eq!(state.error, None);
    assert_eq!(state.events.len(), 3);
}

#[tokio::test]
async fn unmount_releases_the_feed() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let view = EventListView::mount(env, SearchFilters::default()).await.unwrap();
    assert!(world.backend.wait_for_subscriptions(1, SETTLE).await);

    view.unmount().await.unwrap();

    assert!(world.backend.wait_for_subscriptions(0, SETTLE).await);
    assert_eq!(world.backend.released_subscriptions(), 1);
    assert!(!view.snapshot().await.live);
}

#[tokio::test]
async fn dropping_the_view_releases_the_feed() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let view = EventListView::mount(env, SearchFilters::default()).await.unwrap();
    assert!(world.backend.wait_for_subscriptions(1, SETTLE).await);

    drop(view);

    assert!(world.backend.wait_for_subscriptions(0, SETTLE).await);
}

#[tokio::test]
async fn filter_changes_keep_a_single_feed() {
    let world = world();
    let env = anonymous(&world.backend).await;
    let view = EventListView::mount(env, SearchFilters::default()).await.unwrap();
    view.wait_live(SETTLE).await.unwrap();

    view.set_filters(SearchFilters::default().with_query("jazz"))
        .await
        .unwrap();
    quiesce().await;

    assert_eq!(world.backend.active_subscriptions(), 1);
}
