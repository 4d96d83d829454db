//! Fixtures shared by the view integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use gather::{NoticeBoard, NoticeDurations, SyncEnvironment};
use gather_core::remote::Table;
use gather_testing::{InMemoryBackend, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Generous bound for anything the views do in the background
pub const SETTLE: Duration = Duration::from_secs(2);

/// Backend with an organizer, two participants and three events
pub struct World {
    pub backend: InMemoryBackend,
    pub organizer_id: String,
    pub member_id: String,
    pub other_id: String,
}

pub const ORGANIZER: &str = "olive@example.com";
pub const MEMBER: &str = "pat@example.com";
pub const OTHER: &str = "sam@example.com";
pub const PASSWORD: &str = "password";

pub fn world() -> World {
    gather_testing::helpers::init_tracing();
    let backend = InMemoryBackend::new();
    let organizer_id = backend
        .register(ORGANIZER, PASSWORD, "Olive", "organizer")
        .unwrap();
    let member_id = backend.register(MEMBER, PASSWORD, "Pat", "participant").unwrap();
    let other_id = backend.register(OTHER, PASSWORD, "Sam", "participant").unwrap();

    backend.seed(
        Table::Events,
        [
            event_row("e2", "Jazz night", "2030-02-01", "music", &organizer_id),
            event_row("e1", "Rust meetup", "2030-01-01", "technology", &organizer_id),
            event_row("e3", "Founders breakfast", "2030-03-01", "business", &organizer_id),
        ],
    );

    World {
        backend,
        organizer_id,
        member_id,
        other_id,
    }
}

pub fn event_row(id: &str, title: &str, date: &str, category: &str, organizer_id: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "description": format!("All about {title}"),
        "date": date,
        "time": "18:00:00",
        "location": "Hall A",
        "category": category,
        "organizer_id": organizer_id,
    })
}

fn notices() -> (NoticeBoard, Arc<gather_testing::FixedClock>) {
    let clock = Arc::new(test_clock());
    (NoticeBoard::new(clock.clone(), NoticeDurations::default()), clock)
}

/// Environment signed in as `email`
pub async fn signed_in(backend: &InMemoryBackend, email: &str) -> SyncEnvironment {
    let client = Arc::new(backend.sign_in(email, PASSWORD).await.unwrap());
    let (board, clock) = notices();
    SyncEnvironment::start(client, board, clock).await.unwrap()
}

/// Environment with nobody signed in
pub async fn anonymous(backend: &InMemoryBackend) -> SyncEnvironment {
    let (board, clock) = notices();
    SyncEnvironment::start(Arc::new(backend.client()), board, clock)
        .await
        .unwrap()
}

/// Date of the seeded `e1`
pub fn e1_date() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
}

/// Let in-flight background work reach the backend
pub async fn quiesce() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
