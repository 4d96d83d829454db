//! Plain-text rendering of views for the terminal.

use gather::{Event, User};
use std::fmt::Write;

fn name(full_name: Option<&str>) -> &str {
    full_name.unwrap_or("Anonymous")
}

/// One line per event
pub fn event_lines(events: &[Event]) -> String {
    if events.is_empty() {
        return "No events found.\n".to_string();
    }

    let mut out = String::new();
    for event in events {
        let organizer = event
            .organizer
            .as_ref()
            .map_or("?", |o| name(o.full_name.as_deref()));
        let _ = writeln!(
            out,
            "{} {}  {:<32} {:<24} [{}] {} RSVPs, by {}  ({})",
            event.date,
            event.time.format("%H:%M"),
            event.title,
            event.location,
            event.category,
            event.rsvp_count,
            organizer,
            event.id,
        );
    }
    out
}

/// Full event page
pub fn event_page(event: &Event) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", event.title);
    let _ = writeln!(out, "{}", "=".repeat(event.title.chars().count()));
    let _ = writeln!(
        out,
        "{} at {}  ·  {}  ·  {}",
        event.date,
        event.time.format("%H:%M"),
        event.location,
        event.category
    );
    if let Some(organizer) = &event.organizer {
        let _ = writeln!(out, "Organized by {}", name(organizer.full_name.as_deref()));
    }
    let attending = event.attendees().count();
    match event.max_attendees {
        Some(max) => {
            let _ = writeln!(out, "{attending}/{max} attending, {} RSVPs", event.rsvp_count);
        },
        None => {
            let _ = writeln!(out, "{attending} attending, {} RSVPs", event.rsvp_count);
        },
    }
    let _ = writeln!(out, "\n{}\n", event.description);

    let _ = writeln!(out, "RSVPs:");
    if event.rsvps.is_empty() {
        let _ = writeln!(out, "  none yet");
    }
    for rsvp in &event.rsvps {
        let who = rsvp.user.as_ref().and_then(|u| u.full_name.as_deref());
        let _ = writeln!(out, "  {:<24} {}", name(who), rsvp.status);
    }

    let _ = writeln!(out, "\nComments ({}):", event.comments.len());
    let mut comments: Vec<_> = event.comments.iter().collect();
    comments.sort_by_key(|c| c.created_at);
    for comment in comments {
        let who = comment.user.as_ref().and_then(|u| u.full_name.as_deref());
        let _ = writeln!(
            out,
            "  [{}] {}: {}  ({})",
            comment.created_at.format("%Y-%m-%d %H:%M"),
            name(who),
            comment.content,
            comment.id
        );
    }
    out
}

/// Profile summary
pub fn profile(user: &User) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} <{}>", user.display_name(), user.email);
    let _ = writeln!(out, "role:      {}", user.role);
    if let Some(bio) = &user.bio {
        let _ = writeln!(out, "bio:       {bio}");
    }
    if !user.skills.is_empty() {
        let _ = writeln!(out, "skills:    {}", user.skills.join(", "));
    }
    if !user.interests.is_empty() {
        let _ = writeln!(out, "interests: {}", user.interests.join(", "));
    }
    let _ = writeln!(out, "member since {}", user.created_at.format("%Y-%m-%d"));
    out
}
