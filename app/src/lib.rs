//! # Gather
//!
//! Data-sync layer of a community events application.
//!
//! Every page of the application is backed by a view: a [`Store`] running
//! one of the reducers below against a [`SyncEnvironment`] (remote data
//! client, [`Session`], notices, clock).
//!
//! | view | reducer | what it keeps |
//! |------|---------|---------------|
//! | [`EventListView`] | [`event_list`] | events matching a set of filters, live |
//! | [`EventDetailView`] | [`event_detail`] | one event with organizer, comments and RSVPs, live |
//! | [`RsvpView`] | [`rsvp`] | RSVP mutations in flight |
//! | [`CommentsView`] | [`comments`] | comment mutations in flight |
//! | [`CreateEventView`] | [`create_event`] | event creation in flight |
//!
//! [`Store`]: gather_runtime::store::Store

pub mod comments;
pub mod config;
pub mod create_event;
pub mod demo;
pub mod environment;
pub mod error;
pub mod event_detail;
pub mod event_list;
pub mod mutation;
pub mod notice;
pub mod queries;
pub mod rsvp;
pub mod session;
pub mod types;

#[cfg(test)]
mod testkit;

pub use comments::CommentsView;
pub use config::{Config, ConfigError};
pub use create_event::CreateEventView;
pub use environment::SyncEnvironment;
pub use error::SyncError;
pub use event_detail::EventDetailView;
pub use event_list::EventListView;
pub use notice::{Notice, NoticeBoard, NoticeDurations, NoticeLevel, Notifier, TerminalNotifier};
pub use rsvp::RsvpView;
pub use session::Session;
pub use types::{
    Event, EventCategory, EventComment, EventDraft, EventRsvp, ProfileUpdate, RsvpStatus,
    SearchFilters, SignUpDetails, SortBy, User, UserRole, UserSummary,
};
