//! Remote queries and channels used by the views.

use crate::types::{RSVP_TOTALS, SearchFilters, SortBy};
use gather_core::remote::{
    ChangeBinding, ChannelSpec, Embed, Filter, Order, Query, Selection, Table,
};

/// Conflict target of RSVP upserts
pub const RSVP_CONFLICT: [&str; 2] = ["event_id", "user_id"];

fn person(alias: &str, column: &str, with_role: bool) -> Embed {
    let columns: &[&str] = if with_role {
        &["id", "full_name", "avatar_url", "role"]
    } else {
        &["id", "full_name", "avatar_url"]
    };
    Embed::belongs_to(alias, Table::Users, column, Selection::only(columns))
}

/// `*, organizer:users(id, full_name, avatar_url), rsvp_totals:event_rsvps(count)`
#[must_use]
pub fn event_list_selection() -> Selection {
    Selection::all()
        .embed(person("organizer", "organizer_id", false))
        .embed(Embed::count(RSVP_TOTALS, Table::EventRsvps, "event_id"))
}

/// Event list query for `filters`
///
/// Popularity is not a remote ordering: it is fetched by date and re-sorted
/// after the fetch.
#[must_use]
pub fn event_list_query(filters: &SearchFilters) -> Query {
    let mut query = Query::table(Table::Events).select(event_list_selection());

    if let Some(text) = &filters.query {
        query = query.or(vec![
            Filter::contains("title", text),
            Filter::contains("description", text),
        ]);
    }
    if let Some(category) = &filters.category {
        query = query.eq("category", category.clone());
    }
    if let Some(date) = filters.date {
        query = query.gte("date", date.to_string());
    }
    if let Some(location) = &filters.location {
        query = query.filter(Filter::contains("location", location));
    }

    match filters.sort_by {
        SortBy::Date | SortBy::Popularity => query.order(Order::asc("date")),
        SortBy::CreatedAt => query.order(Order::desc("created_at")),
    }
}

/// Comment or RSVP row with its author
fn with_author() -> Selection {
    Selection::all().embed(person("user", "user_id", false))
}

/// Single event with organizer, comments and RSVPs
#[must_use]
pub fn event_detail_query(event_id: &str) -> Query {
    Query::table(Table::Events)
        .select(
            Selection::all()
                .embed(person("organizer", "organizer_id", true))
                .embed(Embed::has_many(
                    "comments",
                    Table::EventComments,
                    "event_id",
                    with_author(),
                ))
                .embed(Embed::has_many(
                    "rsvps",
                    Table::EventRsvps,
                    "event_id",
                    with_author(),
                )),
        )
        .eq("id", event_id.to_string())
        .single()
}

/// Returned shape of an inserted comment
#[must_use]
pub fn comment_returning() -> Selection {
    with_author()
}

/// Every change to `events`
#[must_use]
pub fn events_channel() -> ChannelSpec {
    ChannelSpec::new("events").on(ChangeBinding::table(Table::Events))
}

/// Comment and RSVP changes of one event
#[must_use]
pub fn event_channel(event_id: &str) -> ChannelSpec {
    ChannelSpec::new(format!("event-{event_id}"))
        .on(ChangeBinding::table(Table::EventComments).filter_eq("event_id", event_id))
        .on(ChangeBinding::table(Table::EventRsvps).filter_eq("event_id", event_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use gather_core::remote::Columns;

    #[test]
    fn default_filters_only_order_by_date() {
        let query = event_list_query(&SearchFilters::default());

        assert!(query.filters.is_empty());
        assert_eq!(query.order, vec![Order::asc("date")]);
        assert_eq!(query.selection.embeds.len(), 2);
        assert!(query.selection.embeds[1].count_only);
    }

    #[test]
    fn every_filter_maps_to_a_condition() {
        let filters = SearchFilters::default()
            .with_query("rust")
            .with_category("technology")
            .with_date(NaiveDate::from_ymd_opt(2030, 1, 1).unwrap_or_default())
            .with_location("hall")
            .sorted_by(SortBy::CreatedAt);

        let query = event_list_query(&filters);

        assert_eq!(
            query.filters,
            vec![
                Filter::Or(vec![
                    Filter::contains("title", "rust"),
                    Filter::contains("description", "rust"),
                ]),
                Filter::eq("category", "technology"),
                Filter::gte("date", "2030-01-01"),
                Filter::ilike("location", "%hall%"),
            ]
        );
        assert_eq!(query.order, vec![Order::desc("created_at")]);
    }

    #[test]
    fn popularity_is_fetched_by_date() {
        let query = event_list_query(&SearchFilters::default().sorted_by(SortBy::Popularity));
        assert_eq!(query.order, vec![Order::asc("date")]);
    }

    #[test]
    fn detail_query_is_single_with_organizer_role() {
        let query = event_detail_query("e1");

        assert!(query.single);
        assert_eq!(query.filters, vec![Filter::eq("id", "e1")]);
        assert_eq!(
            query.selection.embeds[0].selection.columns,
            Columns::Only(vec![
                "id".to_string(),
                "full_name".to_string(),
                "avatar_url".to_string(),
                "role".to_string(),
            ])
        );
    }

    #[test]
    fn event_channel_filters_both_tables() {
        let channel = event_channel("e1");
        assert_eq!(channel.topic, "event-e1");
        assert_eq!(channel.bindings.len(), 2);
        assert!(
            channel
                .bindings
                .iter()
                .all(|b| b.filter.as_ref().is_some_and(|f| f.to_string() == "event_id=eq.e1"))
        );
    }
}
