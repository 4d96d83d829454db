//! In-memory stand-in for the hosted backend
//!
//! Provides fast, deterministic infrastructure for data-sync tests and the
//! CLI's demo mode:
//! - [`InMemoryBackend`]: shared tables, accounts, row-level policies and a
//!   realtime change feed
//! - [`InMemoryClient`]: one signed-in (or anonymous) connection to it,
//!   implementing [`DataClient`] and [`AuthProvider`]
//!
//! Row-level policies mirror the hosted schema:
//!
//! | table            | insert              | update              | delete |
//! |------------------|---------------------|---------------------|--------|
//! | `users`          | never (sign-up only)| own row             | never  |
//! | `events`         | as organizer        | own events          | own events |
//! | `event_rsvps`    | as self             | own rows            | own rows |
//! | `event_comments` | as self             | own rows            | author, event organizer, or any organizer |
//!
//! Rows hidden by a policy are skipped silently by update and delete, like
//! a `USING` clause; inserts that violate a policy are rejected.

use crate::matching::{self, Tables};
use chrono::{DateTime, SecondsFormat, Utc};
use gather_core::auth::{AuthError, AuthFuture, AuthIdentity, AuthProvider, SignUpRequest};
use gather_core::remote::{
    Change, ChangeKind, ChannelSpec, DataClient, Filter, Query, RemoteError, RemoteFuture,
    Selection, Subscription, Table, value_text,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

/// Kind of request received by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `select`
    Select,
    /// `insert`
    Insert,
    /// `upsert`
    Upsert,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `subscribe` (one record per binding)
    Subscribe,
}

/// One request as seen by the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestRecord {
    /// What was requested
    pub operation: Operation,
    /// Table it targeted
    pub table: Table,
}

struct Account {
    user_id: String,
    password: String,
}

struct Inner {
    tables: RwLock<Tables>,
    accounts: RwLock<HashMap<String, Account>>,
    changes: broadcast::Sender<Change>,
    requests: Mutex<Vec<RequestRecord>>,
    failures: Mutex<Vec<(Operation, Table, RemoteError)>>,
    subscriptions: watch::Sender<usize>,
    released: AtomicUsize,
    last_stamp: Mutex<DateTime<Utc>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Text value of a non-null column
fn field(row: &Value, column: &str) -> Option<String> {
    row.get(column)
        .filter(|value| !value.is_null())
        .map(value_text)
}

fn rls_violation(table: Table) -> RemoteError {
    RemoteError::PermissionDenied(format!(
        "new row violates row-level security policy for table \"{table}\""
    ))
}

const fn required_columns(table: Table) -> &'static [&'static str] {
    match table {
        Table::Users => &["email"],
        Table::Events => &[
            "title",
            "description",
            "date",
            "time",
            "location",
            "category",
            "organizer_id",
        ],
        Table::EventRsvps => &["event_id", "user_id", "status"],
        Table::EventComments => &["event_id", "user_id", "content"],
    }
}

const fn has_updated_at(table: Table) -> bool {
    !matches!(table, Table::EventRsvps)
}

/// Shared in-memory backend
///
/// Clones share all data. Create one per test and hand out clients with
/// [`InMemoryBackend::client`].
///
/// # Example
///
/// ```
/// use gather_testing::InMemoryBackend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = InMemoryBackend::new();
/// backend.register("ada@example.com", "password", "Ada", "organizer")?;
///
/// let client = backend.sign_in("ada@example.com", "password").await?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = read(&self.inner.tables);
        f.debug_struct("InMemoryBackend")
            .field(
                "rows",
                &Table::ALL
                    .iter()
                    .map(|t| (t.as_str(), tables.get(t).map_or(0, Vec::len)))
                    .collect::<Vec<_>>(),
            )
            .field("active_subscriptions", &self.active_subscriptions())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty backend
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        let (subscriptions, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::new()),
                accounts: RwLock::new(HashMap::new()),
                changes,
                requests: Mutex::new(Vec::new()),
                failures: Mutex::new(Vec::new()),
                subscriptions,
                released: AtomicUsize::new(0),
                last_stamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
            }),
        }
    }

    /// New anonymous client
    #[must_use]
    pub fn client(&self) -> InMemoryClient {
        InMemoryClient {
            backend: self.clone(),
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// New client signed in with the given credentials
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for unknown accounts.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<InMemoryClient, AuthError> {
        let client = self.client();
        client.sign_in(email.to_string(), password.to_string()).await?;
        Ok(client)
    }

    /// Create an account and its profile row; returns the user id
    ///
    /// # Errors
    ///
    /// Same as sign-up: taken addresses and short passwords are rejected.
    pub fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: &str,
    ) -> Result<String, AuthError> {
        let identity = self.create_account(&SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            metadata: json!({ "full_name": full_name, "role": role }),
        })?;
        Ok(identity.user_id)
    }

    /// Insert rows without policies or change notifications
    ///
    /// Missing `id` and timestamp columns are filled in.
    pub fn seed(&self, table: Table, rows: impl IntoIterator<Item = Value>) {
        let rows: Vec<Value> = rows
            .into_iter()
            .filter_map(|row| self.with_defaults(table, row).ok())
            .collect();
        write(&self.inner.tables).entry(table).or_default().extend(rows);
    }

    /// Current rows of `table`, in insertion order
    #[must_use]
    pub fn rows(&self, table: Table) -> Vec<Value> {
        read(&self.inner.tables)
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Row of `table` with the given id
    #[must_use]
    pub fn row(&self, table: Table, id: &str) -> Option<Value> {
        read(&self.inner.tables)
            .get(&table)?
            .iter()
            .find(|row| field(row, "id").as_deref() == Some(id))
            .cloned()
    }

    /// Insert a row as another writer would, bypassing policies
    ///
    /// Subscribers are notified. Returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidRequest`] if `row` is not an object.
    pub fn push_insert(&self, table: Table, row: Value) -> Result<Value, RemoteError> {
        let row = self.with_defaults(table, row)?;
        write(&self.inner.tables)
            .entry(table)
            .or_default()
            .push(row.clone());
        self.emit(Change {
            table,
            kind: ChangeKind::Insert,
            record: Some(row.clone()),
            old_record: None,
        });
        Ok(row)
    }

    /// Patch a row as another writer would, bypassing policies
    ///
    /// Returns the updated row, or `None` if no row has that id.
    #[must_use]
    pub fn push_update(&self, table: Table, id: &str, patch: &Value) -> Option<Value> {
        let (old, new) = {
            let mut tables = write(&self.inner.tables);
            let row = tables
                .get_mut(&table)?
                .iter_mut()
                .find(|row| field(row, "id").as_deref() == Some(id))?;
            let old = row.clone();
            merge(row, patch);
            if has_updated_at(table) && patch.get("updated_at").is_none() {
                row["updated_at"] = self.stamp();
            }
            (old, row.clone())
        };
        self.emit(Change {
            table,
            kind: ChangeKind::Update,
            record: Some(new.clone()),
            old_record: Some(old),
        });
        Some(new)
    }

    /// Delete a row as another writer would, bypassing policies
    ///
    /// Returns the deleted row, or `None` if no row has that id.
    #[must_use]
    pub fn push_delete(&self, table: Table, id: &str) -> Option<Value> {
        let removed = {
            let mut tables = write(&self.inner.tables);
            let rows = tables.get_mut(&table)?;
            let index = rows
                .iter()
                .position(|row| field(row, "id").as_deref() == Some(id))?;
            rows.remove(index)
        };
        self.emit(Change {
            table,
            kind: ChangeKind::Delete,
            record: None,
            old_record: Some(removed.clone()),
        });
        Some(removed)
    }

    /// Every request received so far
    #[must_use]
    pub fn requests(&self) -> Vec<RequestRecord> {
        lock(&self.inner.requests).clone()
    }

    /// Number of requests of one kind against one table
    #[must_use]
    pub fn request_count(&self, operation: Operation, table: Table) -> usize {
        lock(&self.inner.requests)
            .iter()
            .filter(|r| r.operation == operation && r.table == table)
            .count()
    }

    /// Forget the request log
    pub fn clear_requests(&self) {
        lock(&self.inner.requests).clear();
    }

    /// Make the next matching request fail with `error`
    pub fn fail_next(&self, operation: Operation, table: Table, error: RemoteError) {
        lock(&self.inner.failures).push((operation, table, error));
    }

    /// Number of subscriptions currently open
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        *self.inner.subscriptions.borrow()
    }

    /// Number of subscriptions released so far
    #[must_use]
    pub fn released_subscriptions(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Wait until exactly `count` subscriptions are open
    ///
    /// Returns `false` if that did not happen within `timeout`.
    pub async fn wait_for_subscriptions(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.inner.subscriptions.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|open| *open == count))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    fn emit(&self, change: Change) {
        tracing::trace!(table = %change.table, kind = change.kind.as_str(), "Emitting change");
        // No receivers is fine: nobody is subscribed
        let _ = self.inner.changes.send(change);
    }

    /// Strictly increasing timestamp
    fn stamp(&self) -> Value {
        let mut last = lock(&self.inner.last_stamp);
        let now = Utc::now();
        let next = if now > *last {
            now
        } else {
            *last + chrono::Duration::microseconds(1)
        };
        *last = next;
        Value::String(next.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    fn with_defaults(&self, table: Table, row: Value) -> Result<Value, RemoteError> {
        let Value::Object(mut map) = row else {
            return Err(RemoteError::InvalidRequest(
                "row must be a JSON object".to_string(),
            ));
        };

        if map.get("id").is_none_or(Value::is_null) {
            map.insert("id".to_string(), json!(Uuid::new_v4().to_string()));
        }
        let now = self.stamp();
        map.entry("created_at").or_insert_with(|| now.clone());
        if has_updated_at(table) {
            map.entry("updated_at").or_insert(now);
        }

        let defaults: &[(&str, Value)] = match table {
            Table::Users => &[
                ("full_name", Value::Null),
                ("avatar_url", Value::Null),
                ("bio", Value::Null),
                ("skills", Value::Array(Vec::new())),
                ("interests", Value::Array(Vec::new())),
            ],
            Table::Events => &[("max_attendees", Value::Null), ("image_url", Value::Null)],
            Table::EventRsvps | Table::EventComments => &[],
        };
        for (column, value) in defaults {
            map.entry(*column).or_insert_with(|| value.clone());
        }
        if table == Table::Users {
            map.entry("role").or_insert_with(|| json!("participant"));
        }

        Ok(Value::Object(map))
    }

    fn create_account(&self, request: &SignUpRequest) -> Result<AuthIdentity, AuthError> {
        let email = request.email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AuthError::Rejected(
                "Unable to validate email address: invalid format".to_string(),
            ));
        }
        if request.password.chars().count() < 6 {
            return Err(AuthError::Rejected(
                "Password should be at least 6 characters".to_string(),
            ));
        }

        let user_id = {
            let mut accounts = write(&self.inner.accounts);
            if accounts.contains_key(&email) {
                return Err(AuthError::AlreadyRegistered);
            }
            let user_id = Uuid::new_v4().to_string();
            accounts.insert(
                email.clone(),
                Account {
                    user_id: user_id.clone(),
                    password: request.password.clone(),
                },
            );
            user_id
        };

        let metadata = &request.metadata;
        let profile = json!({
            "id": user_id,
            "email": email,
            "full_name": metadata.get("full_name").cloned().unwrap_or(Value::Null),
            "role": metadata.get("role").cloned().unwrap_or_else(|| json!("participant")),
        });
        self.push_insert(Table::Users, profile)
            .map_err(|e| AuthError::Rejected(e.to_string()))?;

        tracing::debug!(%user_id, "Account created");
        Ok(identity(user_id, email))
    }

    fn authenticate(&self, email: &str, password: &str) -> Result<AuthIdentity, AuthError> {
        let email = email.trim().to_lowercase();
        let accounts = read(&self.inner.accounts);
        match accounts.get(&email) {
            Some(account) if account.password == password => {
                Ok(identity(account.user_id.clone(), email))
            },
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    /// Log the request and consume an injected failure, if any
    fn begin(&self, operation: Operation, table: Table) -> Result<(), RemoteError> {
        lock(&self.inner.requests).push(RequestRecord { operation, table });

        let mut failures = lock(&self.inner.failures);
        if let Some(index) = failures
            .iter()
            .position(|(op, t, _)| *op == operation && *t == table)
        {
            let (_, _, error) = failures.remove(index);
            return Err(error);
        }
        Ok(())
    }

    fn select(&self, query: &Query) -> Result<Vec<Value>, RemoteError> {
        let tables = read(&self.inner.tables);
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matching::matches_all(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        matching::sort_rows(&mut rows, &query.order);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        if query.single && rows.len() != 1 {
            return Err(RemoteError::NotFound(
                "JSON object requested, multiple (or no) rows returned".to_string(),
            ));
        }

        Ok(rows
            .iter()
            .map(|row| matching::project(&tables, row, &query.selection))
            .collect())
    }

    /// Validate and store a new row; the caller holds the write lock
    fn insert_locked(
        &self,
        tables: &mut Tables,
        table: Table,
        row: Value,
        uid: Option<&str>,
    ) -> Result<Value, RemoteError> {
        let row = self.with_defaults(table, row)?;
        check_constraints(tables, table, &row)?;
        if !can_insert(table, &row, uid) {
            return Err(rls_violation(table));
        }
        check_unique(tables, table, &row, None)?;
        tables.entry(table).or_default().push(row.clone());
        Ok(row)
    }

    fn insert(&self, table: Table, row: Value, uid: Option<&str>) -> Result<Value, RemoteError> {
        let stored = {
            let mut tables = write(&self.inner.tables);
            self.insert_locked(&mut tables, table, row, uid)?
        };
        self.emit(Change {
            table,
            kind: ChangeKind::Insert,
            record: Some(stored.clone()),
            old_record: None,
        });
        Ok(stored)
    }

    fn upsert(
        &self,
        table: Table,
        row: Value,
        on_conflict: &[String],
        uid: Option<&str>,
    ) -> Result<Value, RemoteError> {
        if !row.is_object() {
            return Err(RemoteError::InvalidRequest(
                "row must be a JSON object".to_string(),
            ));
        }

        let (change, stored) = {
            let mut tables = write(&self.inner.tables);
            let existing = tables.get(&table).and_then(|rows| {
                rows.iter().position(|candidate| {
                    !on_conflict.is_empty()
                        && on_conflict.iter().all(|column| {
                            field(candidate, column).is_some()
                                && field(candidate, column) == field(&row, column)
                        })
                })
            });

            if let Some(index) = existing {
                let old = tables[&table][index].clone();
                if !can_modify(&tables, table, &old, uid, Operation::Update) {
                    return Err(rls_violation(table));
                }
                let mut new = old.clone();
                merge(&mut new, &row);
                if let (Some(id), Some(map)) = (old.get("id"), new.as_object_mut()) {
                    map.insert("id".to_string(), id.clone());
                }
                if has_updated_at(table) {
                    new["updated_at"] = self.stamp();
                }
                if !can_insert(table, &new, uid) {
                    return Err(rls_violation(table));
                }
                check_constraints(&tables, table, &new)?;
                if let Some(rows) = tables.get_mut(&table) {
                    rows[index] = new.clone();
                }
                let change = Change {
                    table,
                    kind: ChangeKind::Update,
                    record: Some(new.clone()),
                    old_record: Some(old),
                };
                (change, new)
            } else {
                let stored = self.insert_locked(&mut tables, table, row, uid)?;
                let change = Change {
                    table,
                    kind: ChangeKind::Insert,
                    record: Some(stored.clone()),
                    old_record: None,
                };
                (change, stored)
            }
        };

        self.emit(change);
        Ok(stored)
    }

    fn update(
        &self,
        table: Table,
        patch: &Value,
        filters: &[Filter],
        uid: Option<&str>,
    ) -> Result<Vec<Value>, RemoteError> {
        if !patch.is_object() {
            return Err(RemoteError::InvalidRequest(
                "patch must be a JSON object".to_string(),
            ));
        }

        let changed = {
            let mut tables = write(&self.inner.tables);
            let targets: Vec<usize> = tables
                .get(&table)
                .map(|rows| {
                    rows.iter()
                        .enumerate()
                        .filter(|(_, row)| {
                            matching::matches_all(row, filters)
                                && can_modify(&tables, table, row, uid, Operation::Update)
                        })
                        .map(|(index, _)| index)
                        .collect()
                })
                .unwrap_or_default();

            let mut changed = Vec::with_capacity(targets.len());
            for index in targets {
                let old = tables[&table][index].clone();
                let mut new = old.clone();
                merge(&mut new, patch);
                if has_updated_at(table) && patch.get("updated_at").is_none() {
                    new["updated_at"] = self.stamp();
                }
                if !passes_update_check(table, &old, &new, uid) {
                    return Err(rls_violation(table));
                }
                check_constraints(&tables, table, &new)?;
                check_unique(&tables, table, &new, Some(index))?;
                changed.push((index, old, new));
            }

            if let Some(rows) = tables.get_mut(&table) {
                for (index, _, new) in &changed {
                    rows[*index] = new.clone();
                }
            }
            changed
        };

        let mut updated = Vec::with_capacity(changed.len());
        for (_, old, new) in changed {
            self.emit(Change {
                table,
                kind: ChangeKind::Update,
                record: Some(new.clone()),
                old_record: Some(old),
            });
            updated.push(new);
        }
        Ok(updated)
    }

    fn delete(
        &self,
        table: Table,
        filters: &[Filter],
        uid: Option<&str>,
    ) -> Result<Vec<Value>, RemoteError> {
        let (deleted, cascaded) = {
            let mut tables = write(&self.inner.tables);
            let allowed: Vec<bool> = tables
                .get(&table)
                .map(|rows| {
                    rows.iter()
                        .map(|row| {
                            matching::matches_all(row, filters)
                                && can_modify(&tables, table, row, uid, Operation::Delete)
                        })
                        .collect()
                })
                .unwrap_or_default();

            let mut deleted = Vec::new();
            if let Some(rows) = tables.get_mut(&table) {
                let mut flags = allowed.iter();
                rows.retain(|row| {
                    if flags.next().copied().unwrap_or(false) {
                        deleted.push(row.clone());
                        false
                    } else {
                        true
                    }
                });
            }

            // ON DELETE CASCADE from events
            let mut cascaded = Vec::new();
            if table == Table::Events && !deleted.is_empty() {
                let ids: Vec<String> = deleted.iter().filter_map(|e| field(e, "id")).collect();
                for child in [Table::EventRsvps, Table::EventComments] {
                    if let Some(rows) = tables.get_mut(&child) {
                        rows.retain(|row| {
                            let orphan = field(row, "event_id").is_some_and(|id| ids.contains(&id));
                            if orphan {
                                cascaded.push((child, row.clone()));
                            }
                            !orphan
                        });
                    }
                }
            }
            (deleted, cascaded)
        };

        for row in &deleted {
            self.emit(Change {
                table,
                kind: ChangeKind::Delete,
                record: None,
                old_record: Some(row.clone()),
            });
        }
        for (child, row) in cascaded {
            self.emit(Change {
                table: child,
                kind: ChangeKind::Delete,
                record: None,
                old_record: Some(row),
            });
        }
        Ok(deleted)
    }

    fn open_subscription(&self, channel: ChannelSpec) -> Subscription {
        let mut rx = self.inner.changes.subscribe();
        self.inner.subscriptions.send_modify(|open| *open += 1);
        tracing::debug!(topic = %channel.topic, "Subscription opened");

        let topic = channel.topic.clone();
        let changes = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(change) if channel.matches(&change) => yield change,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        let inner = Arc::clone(&self.inner);
        Subscription::new(topic, Box::pin(changes), move || {
            inner
                .subscriptions
                .send_modify(|open| *open = open.saturating_sub(1));
            inner.released.fetch_add(1, Ordering::SeqCst);
        })
    }
}

fn identity(user_id: String, email: String) -> AuthIdentity {
    AuthIdentity {
        user_id,
        email,
        access_token: Some(format!("mem-{}", Uuid::new_v4())),
    }
}

/// Shallow merge of `patch` into `row`
fn merge(row: &mut Value, patch: &Value) {
    if let (Some(target), Some(source)) = (row.as_object_mut(), patch.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn check_constraints(tables: &Tables, table: Table, row: &Value) -> Result<(), RemoteError> {
    for column in required_columns(table) {
        if field(row, column).is_none() {
            return Err(RemoteError::Api {
                status: 400,
                code: Some("23502".to_string()),
                message: format!(
                    "null value in column \"{column}\" of relation \"{table}\" violates not-null constraint"
                ),
            });
        }
    }

    if table == Table::EventRsvps {
        let status = field(row, "status").unwrap_or_default();
        if !["attending", "maybe", "not_attending"].contains(&status.as_str()) {
            return Err(RemoteError::Api {
                status: 400,
                code: Some("23514".to_string()),
                message: format!(
                    "new row for relation \"{table}\" violates check constraint \"event_rsvps_status_check\""
                ),
            });
        }
    }

    if matches!(table, Table::EventRsvps | Table::EventComments) {
        let event_id = field(row, "event_id");
        let exists = tables.get(&Table::Events).is_some_and(|events| {
            events.iter().any(|e| field(e, "id") == event_id)
        });
        if !exists {
            return Err(RemoteError::Api {
                status: 409,
                code: Some("23503".to_string()),
                message: format!(
                    "insert or update on table \"{table}\" violates foreign key constraint \"{table}_event_id_fkey\""
                ),
            });
        }
    }

    Ok(())
}

fn check_unique(
    tables: &Tables,
    table: Table,
    row: &Value,
    skip: Option<usize>,
) -> Result<(), RemoteError> {
    let id = field(row, "id");
    let rows = tables.get(&table).map_or(&[][..], Vec::as_slice);

    let duplicate_id = rows
        .iter()
        .enumerate()
        .any(|(i, other)| Some(i) != skip && field(other, "id") == id);
    if duplicate_id {
        return Err(RemoteError::Conflict(format!(
            "duplicate key value violates unique constraint \"{table}_pkey\""
        )));
    }

    if table == Table::EventRsvps {
        let key = (field(row, "event_id"), field(row, "user_id"));
        let duplicate = rows.iter().enumerate().any(|(i, other)| {
            Some(i) != skip && (field(other, "event_id"), field(other, "user_id")) == key
        });
        if duplicate {
            return Err(RemoteError::Conflict(
                "duplicate key value violates unique constraint \"event_rsvps_event_id_user_id_key\""
                    .to_string(),
            ));
        }
    }

    Ok(())
}

/// Insert policy (`WITH CHECK`)
fn can_insert(table: Table, row: &Value, uid: Option<&str>) -> bool {
    let Some(uid) = uid else {
        return false;
    };
    match table {
        Table::Users => false,
        Table::Events => field(row, "organizer_id").as_deref() == Some(uid),
        Table::EventRsvps | Table::EventComments => field(row, "user_id").as_deref() == Some(uid),
    }
}

/// Update/delete visibility policy (`USING`)
fn can_modify(
    tables: &Tables,
    table: Table,
    row: &Value,
    uid: Option<&str>,
    operation: Operation,
) -> bool {
    let Some(uid) = uid else {
        return false;
    };
    let owns = |column: &str| field(row, column).as_deref() == Some(uid);

    match (table, operation) {
        (Table::Users, Operation::Update) => owns("id"),
        (Table::Users, _) => false,
        (Table::Events, _) => owns("organizer_id"),
        (Table::EventRsvps, _) => owns("user_id"),
        (Table::EventComments, Operation::Delete) => {
            owns("user_id") || organizes_event(tables, row, uid) || is_organizer(tables, uid)
        },
        (Table::EventComments, _) => owns("user_id"),
    }
}

/// Updated rows must still pass the insert policy, and keys are immutable
fn passes_update_check(table: Table, old: &Value, new: &Value, uid: Option<&str>) -> bool {
    let same = |column: &str| field(old, column) == field(new, column);
    match table {
        Table::Users => same("id") && same("email"),
        Table::Events => same("id") && can_insert(table, new, uid),
        Table::EventRsvps | Table::EventComments => {
            same("id") && same("event_id") && can_insert(table, new, uid)
        },
    }
}

fn organizes_event(tables: &Tables, row: &Value, uid: &str) -> bool {
    let event_id = field(row, "event_id");
    tables.get(&Table::Events).is_some_and(|events| {
        events.iter().any(|event| {
            field(event, "id") == event_id && field(event, "organizer_id").as_deref() == Some(uid)
        })
    })
}

fn is_organizer(tables: &Tables, uid: &str) -> bool {
    tables.get(&Table::Users).is_some_and(|users| {
        users.iter().any(|user| {
            field(user, "id").as_deref() == Some(uid)
                && field(user, "role").as_deref() == Some("organizer")
        })
    })
}

/// One connection to an [`InMemoryBackend`]
///
/// Each client has its own session; data requests act as the signed-in
/// user, or anonymously when nobody is signed in.
#[derive(Clone)]
pub struct InMemoryClient {
    backend: InMemoryBackend,
    session: Arc<RwLock<Option<AuthIdentity>>>,
}

impl std::fmt::Debug for InMemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryClient")
            .field("session", &*read(&self.session))
            .finish_non_exhaustive()
    }
}

impl InMemoryClient {
    /// The backend this client talks to
    #[must_use]
    pub const fn backend(&self) -> &InMemoryBackend {
        &self.backend
    }

    /// Id of the signed-in user, if any
    #[must_use]
    pub fn user_id(&self) -> Option<String> {
        read(&self.session).as_ref().map(|s| s.user_id.clone())
    }

    fn project_one(&self, row: &Value, selection: &Selection) -> Value {
        let tables = read(&self.backend.inner.tables);
        matching::project(&tables, row, selection)
    }
}

impl DataClient for InMemoryClient {
    fn select(&self, query: Query) -> RemoteFuture<'_, Vec<Value>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.backend.begin(Operation::Select, query.table)?;
            self.backend.select(&query)
        })
    }

    fn insert(&self, table: Table, row: Value, returning: Selection) -> RemoteFuture<'_, Value> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.backend.begin(Operation::Insert, table)?;
            let uid = self.user_id();
            let stored = self.backend.insert(table, row, uid.as_deref())?;
            Ok(self.project_one(&stored, &returning))
        })
    }

    fn upsert(
        &self,
        table: Table,
        row: Value,
        on_conflict: Vec<String>,
        returning: Selection,
    ) -> RemoteFuture<'_, Value> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.backend.begin(Operation::Upsert, table)?;
            let uid = self.user_id();
            let stored = self.backend.upsert(table, row, &on_conflict, uid.as_deref())?;
            Ok(self.project_one(&stored, &returning))
        })
    }

    fn update(
        &self,
        table: Table,
        patch: Value,
        filters: Vec<Filter>,
        returning: Selection,
    ) -> RemoteFuture<'_, Vec<Value>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.backend.begin(Operation::Update, table)?;
            let uid = self.user_id();
            let rows = self.backend.update(table, &patch, &filters, uid.as_deref())?;
            Ok(rows
                .iter()
                .map(|row| self.project_one(row, &returning))
                .collect())
        })
    }

    fn delete(&self, table: Table, filters: Vec<Filter>) -> RemoteFuture<'_, Vec<Value>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.backend.begin(Operation::Delete, table)?;
            let uid = self.user_id();
            self.backend.delete(table, &filters, uid.as_deref())
        })
    }

    fn subscribe(&self, channel: ChannelSpec) -> RemoteFuture<'_, Subscription> {
        Box::pin(async move {
            for binding in &channel.bindings {
                self.backend.begin(Operation::Subscribe, binding.table)?;
            }
            Ok(self.backend.open_subscription(channel))
        })
    }
}

impl AuthProvider for InMemoryClient {
    fn current(&self) -> AuthFuture<'_, Option<AuthIdentity>> {
        Box::pin(async move { Ok(read(&self.session).clone()) })
    }

    fn sign_in(&self, email: String, password: String) -> AuthFuture<'_, AuthIdentity> {
        Box::pin(async move {
            let identity = self.backend.authenticate(&email, &password)?;
            *write(&self.session) = Some(identity.clone());
            Ok(identity)
        })
    }

    fn sign_up(&self, request: SignUpRequest) -> AuthFuture<'_, AuthIdentity> {
        Box::pin(async move {
            let identity = self.backend.create_account(&request)?;
            *write(&self.session) = Some(identity.clone());
            Ok(identity)
        })
    }

    fn sign_out(&self) -> AuthFuture<'_, ()> {
        Box::pin(async move {
            *write(&self.session) = None;
            Ok(())
        })
    }
}
