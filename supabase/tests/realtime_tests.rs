//! Realtime channel lifecycle against a local Phoenix-speaking socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::{SinkExt, StreamExt};
use gather_core::remote::{ChangeBinding, ChangeKind, ChannelSpec, DataClient, RemoteError, Table};
use gather_supabase::{SupabaseClient, SupabaseConfig};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Accept one socket, reply to the join with `join_status`, push one change
/// and report every frame the client sends.
async fn phoenix_server(join_status: &'static str) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();

        while let Some(Ok(frame)) = socket.next().await {
            let Message::Text(text) = frame else { continue };
            let message: Value = serde_json::from_str(&text).unwrap();
            let _ = frames_tx.send(message.clone());

            if message["event"] == "phx_join" {
                let topic = message["topic"].clone();
                let reply = json!({
                    "topic": topic,
                    "event": "phx_reply",
                    "payload": { "status": join_status, "response": { "reason": "denied" } },
                    "ref": "1",
                });
                socket.send(Message::Text(reply.to_string())).await.unwrap();

                let change = json!({
                    "topic": topic,
                    "event": "postgres_changes",
                    "payload": {
                        "data": {
                            "type": "INSERT",
                            "table": "event_comments",
                            "schema": "public",
                            "record": { "id": "c1", "event_id": "e1", "content": "hi" },
                            "old_record": null,
                        },
                        "ids": [1],
                    },
                    "ref": null,
                });
                socket.send(Message::Text(change.to_string())).await.unwrap();
            }
        }
    });

    (format!("http://{address}"), frames_rx)
}

fn channel() -> ChannelSpec {
    ChannelSpec::new("event-e1")
        .on(ChangeBinding::table(Table::EventComments).filter_eq("event_id", "e1"))
}

#[tokio::test]
async fn subscription_joins_forwards_changes_and_leaves_on_drop() {
    let (url, mut frames) = phoenix_server("ok").await;
    let client = SupabaseClient::new(SupabaseConfig::new(url, "anon-key")).unwrap();

    let mut subscription = client.subscribe(channel()).await.unwrap();

    let join = frames.recv().await.unwrap();
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["topic"], "realtime:event-e1");
    assert_eq!(join["payload"]["access_token"], "anon-key");

    let change = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change.kind, ChangeKind::Insert);
    assert_eq!(change.table, Table::EventComments);
    assert_eq!(change.id(), Some("c1"));

    drop(subscription);

    let leave = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let frame = frames.recv().await.unwrap();
            if frame["event"] == "phx_leave" {
                return frame;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(leave["topic"], "realtime:event-e1");
}

#[tokio::test]
async fn heartbeats_are_sent_on_the_phoenix_topic() {
    let (url, mut frames) = phoenix_server("ok").await;
    let mut config = SupabaseConfig::new(url, "anon-key");
    config.heartbeat_interval = Duration::from_millis(50);
    let client = SupabaseClient::new(config).unwrap();

    let _subscription = client.subscribe(channel()).await.unwrap();

    let heartbeat = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let frame = frames.recv().await.unwrap();
            if frame["event"] == "heartbeat" {
                return frame;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(heartbeat["topic"], "phoenix");
}

#[tokio::test]
async fn rejected_join_is_a_subscription_error() {
    let (url, _frames) = phoenix_server("error").await;
    let client = SupabaseClient::new(SupabaseConfig::new(url, "anon-key")).unwrap();

    let result = client.subscribe(channel()).await;

    assert_eq!(result.unwrap_err(), RemoteError::Subscription("denied".to_string()));
}
