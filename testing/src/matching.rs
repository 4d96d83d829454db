//! Row evaluation for the in-memory backend: filters, ordering and
//! projection of selections with embedded relations.

use gather_core::remote::{Columns, Filter, Order, Relation, Selection, Table, value_text};
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Rows of every table, in insertion order
pub(crate) type Tables = HashMap<Table, Vec<Value>>;

/// Whether `row` satisfies `filter`
pub(crate) fn matches(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { column, value } => row
            .get(column)
            .is_some_and(|v| !v.is_null() && value_text(v) == value_text(value)),
        Filter::Gte { column, value } => row
            .get(column)
            .is_some_and(|v| !v.is_null() && compare_values(v, value) != Ordering::Less),
        Filter::ILike { column, pattern } => row
            .get(column)
            .and_then(Value::as_str)
            .is_some_and(|text| like(&text.to_lowercase(), &pattern.to_lowercase())),
        Filter::Or(filters) => filters.iter().any(|f| matches(row, f)),
    }
}

/// Whether `row` satisfies every filter
pub(crate) fn matches_all(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches(row, f))
}

/// SQL `LIKE`: `%` matches any run of characters, `_` exactly one
pub(crate) fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // reachable[j]: pattern[..i] can match text[..j]
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;

    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= reachable[j];
                    next[j] = seen;
                }
            },
            '_' => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j];
                }
            },
            c => {
                for j in 0..text.len() {
                    next[j + 1] = reachable[j] && text[j] == *c;
                }
            },
        }
        reachable = next;
    }

    reachable[text.len()]
}

/// Total order over column values; nulls sort after everything else
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => value_text(x).cmp(&value_text(y)),
    }
}

/// Stable sort by the given keys, most significant first
pub(crate) fn sort_rows(rows: &mut [Value], order: &[Order]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in order {
            let left = a.get(&key.column).unwrap_or(&Value::Null);
            let right = b.get(&key.column).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right);
            let ordering = if key.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn same_id(row: &Value, id: &Value) -> bool {
    row.get("id")
        .is_some_and(|v| !id.is_null() && value_text(v) == value_text(id))
}

/// Shape `row` of `table` according to `selection`, resolving embeds
pub(crate) fn project(tables: &Tables, row: &Value, selection: &Selection) -> Value {
    let mut out = match &selection.columns {
        Columns::All => row.as_object().cloned().unwrap_or_default(),
        Columns::Only(columns) => {
            let mut picked = Map::new();
            for column in columns {
                picked.insert(column.clone(), row.get(column).cloned().unwrap_or(Value::Null));
            }
            picked
        },
    };

    let empty = Vec::new();
    for embed in &selection.embeds {
        let rows = tables.get(&embed.table).unwrap_or(&empty);
        let value = match &embed.relation {
            Relation::BelongsTo { column } => {
                let target = row.get(column).cloned().unwrap_or(Value::Null);
                rows.iter()
                    .find(|candidate| same_id(candidate, &target))
                    .map_or(Value::Null, |found| project(tables, found, &embed.selection))
            },
            Relation::HasMany { column } => {
                let parent = row.get("id").cloned().unwrap_or(Value::Null);
                let children = rows.iter().filter(|candidate| {
                    candidate
                        .get(column)
                        .is_some_and(|v| !parent.is_null() && value_text(v) == value_text(&parent))
                });
                if embed.count_only {
                    json!([{ "count": children.count() }])
                } else {
                    Value::Array(
                        children
                            .map(|child| project(tables, child, &embed.selection))
                            .collect(),
                    )
                }
            },
        };
        out.insert(embed.alias.clone(), value);
    }

    Value::Object(out)
}
