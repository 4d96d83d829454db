//! Remote data client abstraction.
//!
//! The application never owns its database. Records live in a hosted backend
//! that exposes named tables, row-level security and realtime change feeds.
//! This module describes that surface in Rust terms so that views can be
//! written once and run against any implementation:
//!
//! - [`Query`]: declarative select with filters, ordering, limits and embedded relations
//! - [`DataClient`]: select, insert, upsert, update, delete and subscribe
//! - [`Change`]: a typed insert/update/delete notification
//! - [`Subscription`]: a handle over a change feed that releases the server
//!   channel when dropped
//!
//! # Implementations
//!
//! - `InMemoryBackend` (gather-testing) - in-process backend for tests and demos
//! - `SupabaseClient` (gather-supabase) - PostgREST + Realtime over HTTP and websockets
//!
//! # Example
//!
//! ```ignore
//! use gather_core::remote::{DataClient, Query, Table, Order};
//!
//! async fn upcoming(client: &dyn DataClient) -> Result<(), RemoteError> {
//!     let rows = client
//!         .select(
//!             Query::table(Table::Events)
//!                 .gte("date", "2030-01-01")
//!                 .order(Order::asc("date")),
//!         )
//!         .await?;
//!     println!("{} events", rows.len());
//!     Ok(())
//! }
//! ```

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use thiserror::Error;

/// Tables exposed by the hosted backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// User profiles
    Users,
    /// Community events
    Events,
    /// RSVPs, one per (event, user)
    EventRsvps,
    /// Comments on event pages
    EventComments,
}

impl Table {
    /// Every table, in dependency order
    pub const ALL: [Table; 4] = [
        Table::Users,
        Table::Events,
        Table::EventRsvps,
        Table::EventComments,
    ];

    /// Remote table name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Events => "events",
            Table::EventRsvps => "event_rsvps",
            Table::EventComments => "event_comments",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown table name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown table: {0}")]
pub struct ParseTableError(String);

impl FromStr for Table {
    type Err = ParseTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| ParseTableError(s.to_string()))
    }
}

/// Text form of a filter value as it appears on the wire
///
/// Strings are used verbatim; every other JSON value uses its JSON text.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Row filter
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq {
        /// Column name
        column: String,
        /// Value to compare against
        value: Value,
    },
    /// `column >= value`
    Gte {
        /// Column name
        column: String,
        /// Lower bound (inclusive)
        value: Value,
    },
    /// Case-insensitive `LIKE`; `%` matches any run of characters
    ILike {
        /// Column name
        column: String,
        /// Pattern, e.g. `%hall%`
        pattern: String,
    },
    /// Any of the nested filters matches
    Or(Vec<Filter>),
}

impl Filter {
    /// `column = value`
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column >= value`
    #[must_use]
    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            column: column.into(),
            value: value.into(),
        }
    }

    /// `column ILIKE pattern`
    #[must_use]
    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::ILike {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    /// `column ILIKE %needle%`
    #[must_use]
    pub fn contains(column: impl Into<String>, needle: &str) -> Self {
        Self::ilike(column, format!("%{needle}%"))
    }
}

/// Sort key
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    /// Column to sort by
    pub column: String,
    /// Ascending when true
    pub ascending: bool,
}

impl Order {
    /// Ascending order on `column`
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    /// Descending order on `column`
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// Columns returned for a table
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Columns {
    /// Every column (`*`)
    #[default]
    All,
    /// Only the listed columns
    Only(Vec<String>),
}

/// How an embedded table relates to its parent row
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Relation {
    /// `parent.column` references `embedded.id` (one row or null)
    BelongsTo {
        /// Foreign key column on the parent
        column: String,
    },
    /// `embedded.column` references `parent.id` (many rows)
    HasMany {
        /// Foreign key column on the embedded table
        column: String,
    },
}

/// Related table fetched in the same round-trip as its parent
#[derive(Clone, Debug, PartialEq)]
pub struct Embed {
    /// Key under which the relation appears in the parent row
    pub alias: String,
    /// Embedded table
    pub table: Table,
    /// Join between parent and embedded table
    pub relation: Relation,
    /// Columns and nested embeds of the embedded rows
    pub selection: Selection,
    /// Return `[{"count": n}]` instead of rows
    pub count_only: bool,
}

impl Embed {
    /// Embed the row referenced by `parent.column`
    #[must_use]
    pub fn belongs_to(
        alias: impl Into<String>,
        table: Table,
        column: impl Into<String>,
        selection: Selection,
    ) -> Self {
        Self {
            alias: alias.into(),
            table,
            relation: Relation::BelongsTo {
                column: column.into(),
            },
            selection,
            count_only: false,
        }
    }

    /// Embed the rows whose `column` references the parent
    #[must_use]
    pub fn has_many(
        alias: impl Into<String>,
        table: Table,
        column: impl Into<String>,
        selection: Selection,
    ) -> Self {
        Self {
            alias: alias.into(),
            table,
            relation: Relation::HasMany {
                column: column.into(),
            },
            selection,
            count_only: false,
        }
    }

    /// Embed the number of rows whose `column` references the parent
    #[must_use]
    pub fn count(alias: impl Into<String>, table: Table, column: impl Into<String>) -> Self {
        Self {
            count_only: true,
            ..Self::has_many(alias, table, column, Selection::all())
        }
    }
}

/// Columns plus embedded relations
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Selection {
    /// Own columns
    pub columns: Columns,
    /// Embedded relations
    pub embeds: Vec<Embed>,
}

impl Selection {
    /// Every column, no embeds
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only the given columns
    #[must_use]
    pub fn only(columns: &[&str]) -> Self {
        Self {
            columns: Columns::Only(columns.iter().map(|c| (*c).to_string()).collect()),
            embeds: Vec::new(),
        }
    }

    /// Add an embedded relation
    #[must_use]
    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }
}

/// Declarative select against one table
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Table to read
    pub table: Table,
    /// Columns and embeds
    pub selection: Selection,
    /// Filters, all of which must match
    pub filters: Vec<Filter>,
    /// Sort keys, most significant first
    pub order: Vec<Order>,
    /// Maximum number of rows
    pub limit: Option<usize>,
    /// Exactly one row is expected
    pub single: bool,
}

impl Query {
    /// Select every column of `table`
    #[must_use]
    pub fn table(table: Table) -> Self {
        Self {
            table,
            selection: Selection::all(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            single: false,
        }
    }

    /// Replace the selection
    #[must_use]
    pub fn select(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Add a filter
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add `column = value`
    #[must_use]
    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    /// Add `column >= value`
    #[must_use]
    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::gte(column, value))
    }

    /// Add `column ILIKE pattern`
    #[must_use]
    pub fn ilike(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filter(Filter::ilike(column, pattern))
    }

    /// Add a disjunction
    #[must_use]
    pub fn or(self, filters: Vec<Filter>) -> Self {
        self.filter(Filter::Or(filters))
    }

    /// Add a sort key
    #[must_use]
    pub fn order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    /// Limit the number of rows
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Expect exactly one row
    #[must_use]
    pub const fn single(mut self) -> Self {
        self.single = true;
        self
    }
}

/// Kind of row change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
}

impl ChangeKind {
    /// Wire name (`INSERT`, `UPDATE`, `DELETE`)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// Realtime notification for one row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Table the row belongs to
    pub table: Table,
    /// What happened
    pub kind: ChangeKind,
    /// New row (insert and update)
    pub record: Option<Value>,
    /// Previous row (update and delete); may only carry the primary key
    pub old_record: Option<Value>,
}

impl Change {
    /// The row the change is about: the new row, or the old one for deletes
    #[must_use]
    pub fn row(&self) -> Option<&Value> {
        match self.kind {
            ChangeKind::Delete => self.old_record.as_ref(),
            ChangeKind::Insert | ChangeKind::Update => self.record.as_ref(),
        }
    }

    /// Primary key of the affected row
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.row()?.get("id")?.as_str()
    }
}

/// Equality filter applied to realtime notifications (`column=eq.value`)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowFilter {
    /// Column name
    pub column: String,
    /// Expected value, in wire text form
    pub value: String,
}

impl RowFilter {
    /// `column=eq.value`
    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// One table (and optionally one row filter) a channel listens to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeBinding {
    /// Table to watch
    pub table: Table,
    /// Only this kind of change; all kinds when `None`
    pub kind: Option<ChangeKind>,
    /// Only rows matching this filter
    pub filter: Option<RowFilter>,
}

impl ChangeBinding {
    /// Every change on `table`
    #[must_use]
    pub const fn table(table: Table) -> Self {
        Self {
            table,
            kind: None,
            filter: None,
        }
    }

    /// Restrict to rows where `column` equals `value`
    #[must_use]
    pub fn filter_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some(RowFilter::eq(column, value));
        self
    }

    /// Whether `change` is delivered through this binding
    ///
    /// Deletes are matched against the old row.
    #[must_use]
    pub fn matches(&self, change: &Change) -> bool {
        if change.table != self.table {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != change.kind) {
            return false;
        }
        match &self.filter {
            None => true,
            Some(filter) => change
                .row()
                .and_then(|row| row.get(&filter.column))
                .is_some_and(|value| value_text(value) == filter.value),
        }
    }
}

/// Named channel with one or more bindings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel name, unique per subscriber
    pub topic: String,
    /// What the channel listens to
    pub bindings: Vec<ChangeBinding>,
}

impl ChannelSpec {
    /// New channel without bindings
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            bindings: Vec::new(),
        }
    }

    /// Add a binding
    #[must_use]
    pub fn on(mut self, binding: ChangeBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Whether any binding delivers `change`
    #[must_use]
    pub fn matches(&self, change: &Change) -> bool {
        self.bindings.iter().any(|binding| binding.matches(change))
    }
}

/// Stream of changes delivered to a subscription
pub type ChangeStream = Pin<Box<dyn Stream<Item = Change> + Send>>;

/// Live change feed
///
/// The server side of the channel stays open for as long as the handle is
/// alive. Dropping the handle (or calling [`Subscription::unsubscribe`])
/// releases it exactly once.
pub struct Subscription {
    topic: String,
    changes: ChangeStream,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a change stream together with the action that releases it
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        changes: ChangeStream,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            changes,
            release: Some(Box::new(release)),
        }
    }

    /// Channel name
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Release the channel now
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for Subscription {
    type Item = Change;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Change>> {
        self.get_mut().changes.as_mut().poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("released", &self.release.is_none())
            .finish_non_exhaustive()
    }
}

/// Errors reported by a remote data client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The request never produced a response
    #[error("Request failed: {0}")]
    Transport(String),

    /// Missing or expired credentials
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Row-level security rejected the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A single row was requested but none matched
    #[error("{0}")]
    NotFound(String),

    /// A uniqueness constraint was violated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request was malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Any other error reported by the backend
    #[error("{message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Backend error code, when provided
        code: Option<String>,
        /// Error message from the backend
        message: String,
    },

    /// The realtime channel could not be joined or broke
    #[error("Subscription failed: {0}")]
    Subscription(String),

    /// The response did not have the expected shape
    #[error("Response decoding failed: {0}")]
    Decode(String),
}

/// Boxed future returned by [`DataClient`] methods
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Trait for remote data client implementations.
///
/// Rows are exchanged as JSON objects whose keys are column names; embedded
/// relations appear under their alias. Authorization is the backend's job:
/// implementations act as whichever user is currently signed in.
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so that it can be used as `Arc<dyn DataClient>`.
pub trait DataClient: Send + Sync {
    /// Run a select
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the backend rejects the query.
    fn select(&self, query: Query) -> RemoteFuture<'_, Vec<Value>>;

    /// Run a select that must return exactly one row
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] when no row matches, or any error
    /// from [`DataClient::select`].
    fn select_single(&self, query: Query) -> RemoteFuture<'_, Value> {
        Box::pin(async move {
            let mut rows = self.select(query.single()).await?;
            match rows.len() {
                1 => Ok(rows.remove(0)),
                0 => Err(RemoteError::NotFound("No rows returned".to_string())),
                n => Err(RemoteError::InvalidRequest(format!(
                    "Expected a single row, got {n}"
                ))),
            }
        })
    }

    /// Insert one row and return it shaped by `returning`
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the insert is rejected.
    fn insert(&self, table: Table, row: Value, returning: Selection) -> RemoteFuture<'_, Value>;

    /// Insert one row, or update the row that conflicts on `on_conflict`
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the upsert is rejected.
    fn upsert(
        &self,
        table: Table,
        row: Value,
        on_conflict: Vec<String>,
        returning: Selection,
    ) -> RemoteFuture<'_, Value>;

    /// Patch every row matching `filters`, returning the updated rows
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the update is rejected.
    fn update(
        &self,
        table: Table,
        patch: Value,
        filters: Vec<Filter>,
        returning: Selection,
    ) -> RemoteFuture<'_, Vec<Value>>;

    /// Delete every row matching `filters`, returning the deleted rows
    ///
    /// Rows hidden by row-level security are silently skipped, so an empty
    /// result can mean "not permitted".
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError`] when the delete is rejected.
    fn delete(&self, table: Table, filters: Vec<Filter>) -> RemoteFuture<'_, Vec<Value>>;

    /// Open a realtime channel
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Subscription`] when the channel cannot be joined.
    fn subscribe(&self, channel: ChannelSpec) -> RemoteFuture<'_, Subscription>;
}
