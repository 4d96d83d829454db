//! Domain records exchanged with the hosted backend.
//!
//! Records mirror the remote rows. Embedded relations (`organizer`, `user`,
//! `comments`, `rsvps`) are only present when the query asked for them.

use crate::error::SyncError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Alias of the `event_rsvps(count)` embed in list queries
pub const RSVP_TOTALS: &str = "rsvp_totals";

/// `null` and missing both mean "empty"
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Time of day on the wire: `HH:MM` or `HH:MM:SS`
pub mod wire_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Format written to the wire
    pub const FORMAT: &str = "%H:%M:%S";

    /// Parse `HH:MM:SS` or `HH:MM`
    ///
    /// # Errors
    ///
    /// Returns the parse error of the `HH:MM` attempt.
    pub fn parse(text: &str) -> Result<NaiveTime, chrono::ParseError> {
        NaiveTime::parse_from_str(text, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
    }

    /// Serialize as `HH:MM:SS`
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    /// Deserialize from `HH:MM` or `HH:MM:SS`
    ///
    /// # Errors
    ///
    /// Fails on any other format.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Account role
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Creates events and moderates their comments
    Organizer,
    /// Browses, RSVPs and comments
    #[default]
    Participant,
}

impl UserRole {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            UserRole::Organizer => "organizer",
            UserRole::Participant => "participant",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "organizer" => Ok(UserRole::Organizer),
            "participant" => Ok(UserRole::Participant),
            other => Err(SyncError::validation(format!("Unknown role: {other}"))),
        }
    }
}

/// Profile row of the `users` table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Same id as the auth account
    pub id: String,
    /// Account email
    pub email: String,
    /// Display name
    #[serde(default)]
    pub full_name: Option<String>,
    /// Avatar image
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Free-text bio
    #[serde(default)]
    pub bio: Option<String>,
    /// Skills, as picked from a fixed list
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<String>,
    /// Interests, as picked from a fixed list
    #[serde(default, deserialize_with = "null_as_default")]
    pub interests: Vec<String>,
    /// Role
    #[serde(default)]
    pub role: UserRole,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Name to show: the full name, else the email
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}

/// Author or organizer embedded in another record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// User id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub full_name: Option<String>,
    /// Avatar image
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Role, when the query selected it
    #[serde(default)]
    pub role: Option<UserRole>,
}

/// Fixed event categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Technology
    Technology,
    /// Business
    Business,
    /// Social
    Social,
    /// Education
    Education,
    /// Sports
    Sports,
    /// Arts
    Arts,
    /// Food
    Food,
    /// Music
    Music,
}

impl EventCategory {
    /// Every category, in display order
    pub const ALL: [EventCategory; 8] = [
        EventCategory::Technology,
        EventCategory::Business,
        EventCategory::Social,
        EventCategory::Education,
        EventCategory::Sports,
        EventCategory::Arts,
        EventCategory::Food,
        EventCategory::Music,
    ];

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EventCategory::Technology => "technology",
            EventCategory::Business => "business",
            EventCategory::Social => "social",
            EventCategory::Education => "education",
            EventCategory::Sports => "sports",
            EventCategory::Arts => "arts",
            EventCategory::Food => "food",
            EventCategory::Music => "music",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        EventCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| SyncError::validation(format!("Unknown category: {}", s.trim())))
    }
}

/// Community event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event id
    pub id: String,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Calendar date
    pub date: NaiveDate,
    /// Start time
    #[serde(with = "wire_time")]
    pub time: NaiveTime,
    /// Venue
    pub location: String,
    /// Category name (see [`EventCategory`])
    pub category: String,
    /// Capacity, when limited
    #[serde(default)]
    pub max_attendees: Option<u32>,
    /// Cover image
    #[serde(default)]
    pub image_url: Option<String>,
    /// Organizer's user id
    pub organizer_id: String,
    /// Organizer summary, when embedded
    #[serde(default)]
    pub organizer: Option<UserSummary>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update
    pub updated_at: DateTime<Utc>,
    /// Number of RSVP rows, whatever their status
    #[serde(default)]
    pub rsvp_count: usize,
    /// Comments, when embedded
    #[serde(default, deserialize_with = "null_as_default")]
    pub comments: Vec<EventComment>,
    /// RSVPs, when embedded
    #[serde(default, deserialize_with = "null_as_default")]
    pub rsvps: Vec<EventRsvp>,
}

impl Event {
    /// Decode a remote row
    ///
    /// `rsvp_count` comes from the `rsvp_totals` aggregate when present,
    /// else from the embedded RSVPs, else defaults to 0.
    ///
    /// # Errors
    ///
    /// Returns the decoding error when the row lacks required columns.
    pub fn from_row(row: Value) -> Result<Self, serde_json::Error> {
        let totals = row
            .get(RSVP_TOTALS)
            .and_then(|totals| totals.get(0))
            .and_then(|total| total.get("count"))
            .and_then(Value::as_u64);
        let embeds_rsvps = row.get("rsvps").is_some_and(Value::is_array);

        let mut event: Event = serde_json::from_value(row)?;
        if let Some(count) = totals {
            event.rsvp_count = usize::try_from(count).unwrap_or(usize::MAX);
        } else if embeds_rsvps {
            event.rsvp_count = event.rsvps.len();
        }
        Ok(event)
    }

    /// RSVPs with status `attending`
    pub fn attendees(&self) -> impl Iterator<Item = &EventRsvp> {
        self.rsvps
            .iter()
            .filter(|rsvp| rsvp.status == RsvpStatus::Attending)
    }

    /// The RSVP of `user_id`, if embedded
    #[must_use]
    pub fn rsvp_for(&self, user_id: &str) -> Option<&EventRsvp> {
        self.rsvps.iter().find(|rsvp| rsvp.user_id == user_id)
    }
}

/// RSVP answer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    /// Going
    Attending,
    /// Might go
    Maybe,
    /// Not going
    NotAttending,
}

impl RsvpStatus {
    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RsvpStatus::Attending => "attending",
            RsvpStatus::Maybe => "maybe",
            RsvpStatus::NotAttending => "not_attending",
        }
    }

    /// Human form, e.g. `not attending`
    #[must_use]
    pub const fn words(self) -> &'static str {
        match self {
            RsvpStatus::Attending => "attending",
            RsvpStatus::Maybe => "maybe",
            RsvpStatus::NotAttending => "not attending",
        }
    }
}

impl fmt::Display for RsvpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.words())
    }
}

impl FromStr for RsvpStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "attending" => Ok(RsvpStatus::Attending),
            "maybe" => Ok(RsvpStatus::Maybe),
            "not_attending" => Ok(RsvpStatus::NotAttending),
            _ => Err(SyncError::validation(format!("Unknown RSVP status: {}", s.trim()))),
        }
    }
}

/// One user's answer for one event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRsvp {
    /// RSVP id
    pub id: String,
    /// Event
    pub event_id: String,
    /// User
    pub user_id: String,
    /// Answer
    pub status: RsvpStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// User summary, when embedded
    #[serde(default)]
    pub user: Option<UserSummary>,
}

/// Comment on an event page
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventComment {
    /// Comment id
    pub id: String,
    /// Event
    pub event_id: String,
    /// Author
    pub user_id: String,
    /// Text
    pub content: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update
    pub updated_at: DateTime<Utc>,
    /// Author summary, when embedded
    #[serde(default)]
    pub user: Option<UserSummary>,
}

/// Ordering of the event list
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    /// Soonest first
    #[default]
    Date,
    /// Most RSVPs first; ties keep date order
    Popularity,
    /// Newest first
    CreatedAt,
}

impl FromStr for SortBy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "date" => Ok(SortBy::Date),
            "popularity" => Ok(SortBy::Popularity),
            "created_at" | "newest" => Ok(SortBy::CreatedAt),
            _ => Err(SyncError::validation(format!("Unknown sort order: {}", s.trim()))),
        }
    }
}

/// Event list filters
///
/// Compared by value: setting an equal value again is not a change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Free text matched against title and description
    pub query: Option<String>,
    /// Exact category
    pub category: Option<String>,
    /// Earliest date
    pub date: Option<NaiveDate>,
    /// Substring of the location
    pub location: Option<String>,
    /// Ordering
    pub sort_by: SortBy,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl SearchFilters {
    /// Trimmed copy with blank text fields removed
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            query: non_blank(self.query),
            category: non_blank(self.category),
            location: non_blank(self.location),
            ..self
        }
    }

    /// Set the free-text query
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the category
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Set the earliest date
    #[must_use]
    pub const fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Set the location substring
    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the ordering
    #[must_use]
    pub const fn sorted_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }
}

/// Event creation form
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventDraft {
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Date
    pub date: Option<NaiveDate>,
    /// Start time
    pub time: Option<NaiveTime>,
    /// Venue
    pub location: String,
    /// Category name
    pub category: String,
    /// Capacity
    pub max_attendees: Option<i64>,
    /// Cover image; blank means none
    pub image_url: String,
}

/// Profile form
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// Display name; blank clears it
    pub full_name: String,
    /// Bio; blank clears it
    pub bio: String,
    /// Skills
    pub skills: Vec<String>,
    /// Interests
    pub interests: Vec<String>,
    /// New avatar, if changing it
    pub avatar_url: Option<String>,
}

/// Sign-up form
#[derive(Clone, PartialEq, Eq)]
pub struct SignUpDetails {
    /// Email
    pub email: String,
    /// Password
    pub password: String,
    /// Display name
    pub full_name: String,
    /// Role
    pub role: UserRole,
}

impl fmt::Debug for SignUpDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpDetails")
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_row() -> Value {
        json!({
            "id": "e1",
            "title": "Rust meetup",
            "description": "Talks",
            "date": "2030-01-01",
            "time": "18:30:00",
            "location": "Hall A",
            "category": "technology",
            "max_attendees": null,
            "image_url": null,
            "organizer_id": "u1",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00.000001+00:00",
        })
    }

    #[test]
    fn list_row_takes_count_from_aggregate() {
        let mut row = event_row();
        row[RSVP_TOTALS] = json!([{ "count": 3 }]);
        row["organizer"] = json!({ "id": "u1", "full_name": "Olive", "avatar_url": null });

        let event = Event::from_row(row).unwrap();

        assert_eq!(event.rsvp_count, 3);
        assert_eq!(event.organizer.unwrap().full_name.as_deref(), Some("Olive"));
    }

    #[test]
    fn pushed_row_defaults_count_to_zero() {
        let event = Event::from_row(event_row()).unwrap();
        assert_eq!(event.rsvp_count, 0);
        assert!(event.comments.is_empty());
        assert_eq!(event.time, NaiveTime::from_hms_opt(18, 30, 0).unwrap());
    }

    #[test]
    fn detail_row_counts_embedded_rsvps() {
        let mut row = event_row();
        row["rsvps"] = json!([
            { "id": "r1", "event_id": "e1", "user_id": "u2", "status": "attending", "created_at": "2025-01-01T00:00:00Z" },
            { "id": "r2", "event_id": "e1", "user_id": "u3", "status": "maybe", "created_at": "2025-01-01T00:00:00Z" },
        ]);

        let event = Event::from_row(row).unwrap();

        assert_eq!(event.rsvp_count, 2);
        assert_eq!(event.attendees().count(), 1);
        assert_eq!(event.rsvp_for("u3").unwrap().status, RsvpStatus::Maybe);
    }

    #[test]
    fn time_accepts_minutes_only() {
        assert_eq!(
            wire_time::parse("10:00").unwrap(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap()
        );
        assert!(wire_time::parse("10am").is_err());
    }

    #[test]
    fn null_skills_become_empty() {
        let user: User = serde_json::from_value(json!({
            "id": "u1",
            "email": "a@example.com",
            "skills": null,
            "role": "organizer",
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z",
        }))
        .unwrap();

        assert!(user.skills.is_empty());
        assert!(user.interests.is_empty());
        assert_eq!(user.role, UserRole::Organizer);
        assert_eq!(user.display_name(), "a@example.com");
    }

    #[test]
    fn rsvp_status_words() {
        assert_eq!(RsvpStatus::NotAttending.words(), "not attending");
        assert_eq!("not-attending".parse::<RsvpStatus>().unwrap(), RsvpStatus::NotAttending);
        assert!("later".parse::<RsvpStatus>().is_err());
    }

    #[test]
    fn filters_normalize_blank_text() {
        let filters = SearchFilters::default()
            .with_query("  ")
            .with_location(" Hall ")
            .normalized();

        assert_eq!(filters.query, None);
        assert_eq!(filters.location.as_deref(), Some("Hall"));
    }

    #[test]
    fn categories_parse_case_insensitively() {
        assert_eq!("Music".parse::<EventCategory>().unwrap(), EventCategory::Music);
        assert!(matches!(
            "knitting".parse::<EventCategory>(),
            Err(SyncError::Validation(_))
        ));
    }
}
