//! PostgREST and GoTrue calls against a mock HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use gather_core::auth::{AuthError, AuthProvider, SignUpRequest};
use gather_core::remote::{DataClient, Embed, Filter, Order, Query, RemoteError, Selection, Table};
use gather_supabase::{SupabaseClient, SupabaseConfig};
use serde_json::json;
use wiremock::matchers::{body_json, header, headers, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> SupabaseClient {
    SupabaseClient::new(SupabaseConfig::new(server.uri(), "anon-key")).unwrap()
}

async fn signed_in(server: &MockServer) -> SupabaseClient {
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .and(query_param("grant_type", "password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "user-jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "r",
            "user": { "id": "u1", "email": "ada@example.com" },
        })))
        .mount(server)
        .await;

    let client = client_for(server);
    client
        .sign_in("ada@example.com".to_string(), "password".to_string())
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn select_sends_filters_order_and_anon_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/events"))
        .and(header("apikey", "anon-key"))
        .and(header("authorization", "Bearer anon-key"))
        .and(query_param(
            "select",
            "*,organizer:users(id,full_name,avatar_url),rsvp_totals:event_rsvps(count)",
        ))
        .and(query_param("category", "eq.technology"))
        .and(query_param("or", "(title.ilike.%rust%,description.ilike.%rust%)"))
        .and(query_param("order", "date.asc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "id": "e1", "title": "Rust" }])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let rows = client_for(&server)
        .select(
            Query::table(Table::Events)
                .select(
                    Selection::all()
                        .embed(Embed::belongs_to(
                            "organizer",
                            Table::Users,
                            "organizer_id",
                            Selection::only(&["id", "full_name", "avatar_url"]),
                        ))
                        .embed(Embed::count("rsvp_totals", Table::EventRsvps, "event_id")),
                )
                .or(vec![
                    Filter::contains("title", "rust"),
                    Filter::contains("description", "rust"),
                ])
                .eq("category", "technology")
                .order(Order::asc("date")),
        )
        .await
        .unwrap();

    assert_eq!(rows, vec![json!({ "id": "e1", "title": "Rust" })]);
}

#[tokio::test]
async fn single_select_asks_for_an_object() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/events"))
        .and(header("accept", "application/vnd.pgrst.object+json"))
        .and(query_param("id", "eq.e1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "e1" })))
        .mount(&server)
        .await;

    let row = client_for(&server)
        .select_single(Query::table(Table::Events).eq("id", "e1"))
        .await
        .unwrap();

    assert_eq!(row, json!({ "id": "e1" }));
}

#[tokio::test]
async fn missing_single_row_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/events"))
        .respond_with(ResponseTemplate::new(406).set_body_json(json!({
            "code": "PGRST116",
            "details": "The result contains 0 rows",
            "hint": null,
            "message": "JSON object requested, multiple (or no) rows returned",
        })))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .select_single(Query::table(Table::Events).eq("id", "missing"))
        .await;

    assert!(matches!(result, Err(RemoteError::NotFound(_))));
}

#[tokio::test]
async fn upsert_merges_on_conflict_with_session_token() {
    let server = MockServer::start().await;
    let client = signed_in(&server).await;
    let row = json!({ "event_id": "e1", "user_id": "u1", "status": "maybe" });

    Mock::given(method("POST"))
        .and(path("/rest/v1/event_rsvps"))
        .and(header("authorization", "Bearer user-jwt"))
        .and(headers(
            "prefer",
            vec!["return=representation", "resolution=merge-duplicates"],
        ))
        .and(query_param("on_conflict", "event_id,user_id"))
        .and(body_json(&row))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "r1", "status": "maybe" })))
        .expect(1)
        .mount(&server)
        .await;

    let saved = client
        .upsert(
            Table::EventRsvps,
            row,
            vec!["event_id".to_string(), "user_id".to_string()],
            Selection::all(),
        )
        .await
        .unwrap();

    assert_eq!(saved["status"], "maybe");
}

#[tokio::test]
async fn delete_returns_removed_rows() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/event_comments"))
        .and(query_param("id", "eq.c1"))
        .and(header("prefer", "return=representation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let deleted = client_for(&server)
        .delete(Table::EventComments, vec![Filter::eq("id", "c1")])
        .await
        .unwrap();

    assert!(deleted.is_empty());
}

#[tokio::test]
async fn unfiltered_delete_is_refused_locally() {
    let server = MockServer::start().await;

    let result = client_for(&server).delete(Table::Events, vec![]).await;

    assert!(matches!(result, Err(RemoteError::InvalidRequest(_))));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn row_level_security_maps_to_permission_denied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/events"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "code": "42501",
            "message": "new row violates row-level security policy for table \"events\"",
        })))
        .mount(&server)
        .await;

    let result = client_for(&server)
        .insert(Table::Events, json!({ "title": "x" }), Selection::all())
        .await;

    assert!(matches!(result, Err(RemoteError::PermissionDenied(_))));
}

#[tokio::test]
async fn sign_in_with_wrong_password() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 400,
            "error_code": "invalid_credentials",
            "msg": "Invalid login credentials",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .sign_in("ada@example.com".to_string(), "wrong".to_string())
        .await;

    assert_eq!(result, Err(AuthError::InvalidCredentials));
    assert_eq!(client.current().await.unwrap(), None);
}

#[tokio::test]
async fn sign_up_sends_metadata_and_reports_pending_confirmation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/signup"))
        .and(body_json(json!({
            "email": "new@example.com",
            "password": "secret1",
            "data": { "full_name": "New", "role": "participant" },
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "id": "u2", "email": "new@example.com" })),
        )
        .mount(&server)
        .await;

    let result = client_for(&server)
        .sign_up(SignUpRequest {
            email: "new@example.com".to_string(),
            password: "secret1".to_string(),
            metadata: json!({ "full_name": "New", "role": "participant" }),
        })
        .await;

    assert_eq!(
        result,
        Err(AuthError::ConfirmationPending("new@example.com".to_string()))
    );
}

#[tokio::test]
async fn sign_out_revokes_and_clears_session() {
    let server = MockServer::start().await;
    let client = signed_in(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/v1/logout"))
        .and(header("authorization", "Bearer user-jwt"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.sign_out().await.unwrap();

    assert_eq!(client.current().await.unwrap(), None);
}
