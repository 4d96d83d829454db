//! PostgREST request rendering and the [`DataClient`] implementation.

use crate::SupabaseClient;
use crate::error::{PostgrestErrorBody, SupabaseError};
use gather_core::remote::{
    ChannelSpec, Columns, DataClient, Filter, Query, RemoteFuture, Selection, Subscription, Table,
    value_text,
};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;

/// `Accept` value that makes PostgREST return one object instead of an array
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

/// Characters that must be quoted inside an `or=(...)` expression
const RESERVED: &[char] = &[',', '(', ')', '.', ':', '"', '\\'];

/// Render a selection as the value of the `select` parameter
///
/// Embeds become `alias:table(columns)`; count embeds `alias:table(count)`.
pub(crate) fn render_selection(selection: &Selection) -> String {
    let mut parts = match &selection.columns {
        Columns::All => vec!["*".to_string()],
        Columns::Only(columns) => columns.clone(),
    };

    for embed in &selection.embeds {
        let inner = if embed.count_only {
            "count".to_string()
        } else {
            render_selection(&embed.selection)
        };
        parts.push(format!("{}:{}({inner})", embed.alias, embed.table));
    }

    parts.join(",")
}

/// Quote a value for use inside a logical expression
fn quote(value: &str) -> String {
    if value.contains(RESERVED) || value.trim() != value {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

/// `column.op.value` form used inside `or=(...)`
fn render_condition(filter: &Filter) -> String {
    match filter {
        Filter::Eq { column, value } => format!("{column}.eq.{}", quote(&value_text(value))),
        Filter::Gte { column, value } => format!("{column}.gte.{}", quote(&value_text(value))),
        Filter::ILike { column, pattern } => format!("{column}.ilike.{}", quote(pattern)),
        Filter::Or(filters) => format!("or({})", render_conditions(filters)),
    }
}

fn render_conditions(filters: &[Filter]) -> String {
    filters
        .iter()
        .map(render_condition)
        .collect::<Vec<_>>()
        .join(",")
}

/// Query parameter for one top-level filter
pub(crate) fn filter_param(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq { column, value } => (column.clone(), format!("eq.{}", value_text(value))),
        Filter::Gte { column, value } => (column.clone(), format!("gte.{}", value_text(value))),
        Filter::ILike { column, pattern } => (column.clone(), format!("ilike.{pattern}")),
        Filter::Or(filters) => ("or".to_string(), format!("({})", render_conditions(filters))),
    }
}

/// Every query parameter of a select
pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), render_selection(&query.selection))];
    params.extend(query.filters.iter().map(filter_param));

    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|key| {
                let direction = if key.ascending { "asc" } else { "desc" };
                format!("{}.{direction}", key.column)
            })
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }

    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    params
}

/// Turn a non-success response into a [`SupabaseError::Postgrest`]
async fn check(response: Response) -> Result<Response, SupabaseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<PostgrestErrorBody>(&text).unwrap_or_else(|_| {
        PostgrestErrorBody {
            message: (!text.is_empty()).then_some(text),
            ..PostgrestErrorBody::default()
        }
    });
    Err(SupabaseError::Postgrest {
        status: status.as_u16(),
        body,
    })
}

impl SupabaseClient {
    fn rest(&self, method: Method, table: Table) -> Result<RequestBuilder, SupabaseError> {
        let url = self.endpoint(&format!("rest/v1/{table}"))?;
        Ok(self
            .http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer()))
    }

    async fn fetch(&self, query: &Query) -> Result<Value, SupabaseError> {
        let mut request = self.rest(Method::GET, query.table)?.query(&query_params(query));
        if query.single {
            request = request.header(reqwest::header::ACCEPT, SINGLE_OBJECT);
        }
        let response = check(request.send().await?).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn write_one(
        &self,
        table: Table,
        row: &Value,
        returning: &Selection,
        on_conflict: Option<&[String]>,
    ) -> Result<Value, SupabaseError> {
        let mut params = vec![("select".to_string(), render_selection(returning))];
        let prefer = match on_conflict {
            Some(columns) => {
                params.push(("on_conflict".to_string(), columns.join(",")));
                "return=representation,resolution=merge-duplicates"
            },
            None => "return=representation",
        };

        let request = self
            .rest(Method::POST, table)?
            .query(&params)
            .header("Prefer", prefer)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .json(row);
        let response = check(request.send().await?).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn write_many(
        &self,
        method: Method,
        table: Table,
        body: Option<&Value>,
        filters: &[Filter],
        returning: &Selection,
    ) -> Result<Vec<Value>, SupabaseError> {
        if filters.is_empty() {
            return Err(SupabaseError::InvalidRequest(format!(
                "refusing unfiltered {method} on {table}"
            )));
        }

        let mut params = vec![("select".to_string(), render_selection(returning))];
        params.extend(filters.iter().map(filter_param));

        let mut request = self
            .rest(method, table)?
            .query(&params)
            .header("Prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = check(request.send().await?).await?;
        Ok(response.json::<Vec<Value>>().await?)
    }
}

impl DataClient for SupabaseClient {
    fn select(&self, query: Query) -> RemoteFuture<'_, Vec<Value>> {
        Box::pin(async move {
            tracing::debug!(table = %query.table, single = query.single, "PostgREST select");
            match self.fetch(&query).await? {
                Value::Array(rows) => Ok(rows),
                row if query.single => Ok(vec![row]),
                other => Err(SupabaseError::Decode(format!("expected an array, got {other}")).into()),
            }
        })
    }

    fn insert(&self, table: Table, row: Value, returning: Selection) -> RemoteFuture<'_, Value> {
        Box::pin(async move {
            tracing::debug!(%table, "PostgREST insert");
            Ok(self.write_one(table, &row, &returning, None).await?)
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
            tracing::debug!(%table, on_conflict = ?on_conflict, "PostgREST upsert");
            Ok(self
                .write_one(table, &row, &returning, Some(&on_conflict))
                .await?)
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
            tracing::debug!(%table, "PostgREST update");
            Ok(self
                .write_many(Method::PATCH, table, Some(&patch), &filters, &returning)
                .await?)
        })
    }

    fn delete(&self, table: Table, filters: Vec<Filter>) -> RemoteFuture<'_, Vec<Value>> {
        Box::pin(async move {
            tracing::debug!(%table, "PostgREST delete");
            Ok(self
                .write_many(Method::DELETE, table, None, &filters, &Selection::all())
                .await?)
        })
    }

    fn subscribe(&self, channel: ChannelSpec) -> RemoteFuture<'_, Subscription> {
        Box::pin(async move { Ok(crate::realtime::open(self, channel).await?) })
    }
}
