//! Seeded in-memory backend for `gather --demo`.

use crate::error::SyncError;
use chrono::{Days, NaiveDate};
use gather_core::remote::Table;
use gather_testing::InMemoryBackend;
use serde_json::json;

/// Password of every demo account
pub const DEMO_PASSWORD: &str = "gather-demo";
/// Demo organizer account
pub const DEMO_ORGANIZER: &str = "ada@gather.dev";
/// Demo participant account
pub const DEMO_MEMBER: &str = "grace@gather.dev";

/// Backend with two accounts, a handful of upcoming events, RSVPs and
/// comments, dated relative to `today`
///
/// # Errors
///
/// Returns [`SyncError::Remote`] if an account cannot be registered.
pub fn seeded_backend(today: NaiveDate) -> Result<InMemoryBackend, SyncError> {
    let backend = InMemoryBackend::new();
    let ada = backend.register(DEMO_ORGANIZER, DEMO_PASSWORD, "Ada Lovelace", "organizer")?;
    let grace = backend.register(DEMO_MEMBER, DEMO_PASSWORD, "Grace Hopper", "participant")?;

    let day = |offset: u64| {
        today
            .checked_add_days(Days::new(offset))
            .unwrap_or(today)
            .to_string()
    };

    backend.seed(
        Table::Events,
        [
            json!({
                "id": "rust-meetup",
                "title": "Rust Meetup",
                "description": "Lightning talks on async Rust and embedded work",
                "date": day(3),
                "time": "18:30:00",
                "location": "Hall A, Innovation Hub",
                "category": "technology",
                "max_attendees": 80,
                "organizer_id": ada,
            }),
            json!({
                "id": "founders-breakfast",
                "title": "Founders Breakfast",
                "description": "Informal breakfast for early-stage founders",
                "date": day(7),
                "time": "08:00:00",
                "location": "Corner Cafe",
                "category": "business",
                "organizer_id": ada,
            }),
            json!({
                "id": "jazz-night",
                "title": "Jazz in the Park",
                "description": "Open-air evening with the city big band",
                "date": day(10),
                "time": "20:00:00",
                "location": "Riverside Park",
                "category": "music",
                "organizer_id": ada,
            }),
        ],
    );

    backend.seed(
        Table::EventRsvps,
        [
            json!({ "event_id": "rust-meetup", "user_id": grace, "status": "attending" }),
            json!({ "event_id": "rust-meetup", "user_id": ada, "status": "attending" }),
            json!({ "event_id": "jazz-night", "user_id": grace, "status": "maybe" }),
        ],
    );

    backend.seed(
        Table::EventComments,
        [json!({
            "event_id": "rust-meetup",
            "user_id": grace,
            "content": "Will the talks be recorded?",
        })],
    );

    tracing::info!(%today, "Seeded demo backend");
    Ok(backend)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_accounts_can_sign_in() {
        let backend = seeded_backend(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()).unwrap();

        assert_eq!(backend.rows(Table::Events).len(), 3);
        assert!(backend.sign_in(DEMO_ORGANIZER, DEMO_PASSWORD).await.is_ok());
        assert!(backend.sign_in(DEMO_MEMBER, DEMO_PASSWORD).await.is_ok());
    }
}
