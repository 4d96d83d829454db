//! Shared fixtures for unit tests.

use crate::environment::SyncEnvironment;
use crate::notice::{NoticeBoard, NoticeDurations};
use crate::session::Session;
use gather_testing::{InMemoryBackend, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;

/// Complete `events` row
pub fn event_row(id: &str, date: &str) -> Value {
    json!({
        "id": id,
        "title": format!("Event {id}"),
        "description": "Details",
        "date": date,
        "time": "10:00",
        "location": "Hall A",
        "category": "technology",
        "max_attendees": null,
        "image_url": null,
        "organizer_id": "u1",
        "created_at": "2025-01-01T00:00:00Z",
        "updated_at": "2025-01-01T00:00:00Z",
    })
}

fn env_for(backend: &InMemoryBackend, session: Session) -> SyncEnvironment {
    let clock = Arc::new(test_clock());
    SyncEnvironment::new(
        Arc::new(backend.client()),
        session,
        NoticeBoard::new(clock.clone(), NoticeDurations::default()),
        clock,
    )
}

/// Signed-out environment over an empty backend
pub fn anonymous_env() -> (InMemoryBackend, SyncEnvironment) {
    let backend = InMemoryBackend::new();
    let client = Arc::new(backend.client());
    let session = Session::signed_out(client.clone(), client, Arc::new(test_clock()));
    let env = env_for(&backend, session);
    (backend, env)
}

/// Environment for reducer tests, whose effects never run
pub fn offline_env() -> SyncEnvironment {
    anonymous_env().1
}

/// Environment signed in as a registered participant
#[allow(clippy::unwrap_used)]
pub async fn member_env() -> (InMemoryBackend, SyncEnvironment) {
    let backend = InMemoryBackend::new();
    backend
        .register("grace@example.com", "password", "Grace", "participant")
        .unwrap();
    let client = Arc::new(backend.sign_in("grace@example.com", "password").await.unwrap());
    let clock = Arc::new(test_clock());
    let env = SyncEnvironment::start(
        client,
        NoticeBoard::new(clock.clone(), NoticeDurations::default()),
        clock,
    )
    .await
    .unwrap();
    (backend, env)
}
