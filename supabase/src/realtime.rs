//! Realtime change feeds over Phoenix channels.
//!
//! One websocket per subscription. The channel is joined with a
//! `postgres_changes` config built from the [`ChannelSpec`] bindings; a
//! background task keeps the socket alive with heartbeats, forwards change
//! notifications to the [`Subscription`] and sends `phx_leave` when the
//! subscription is released.

use crate::SupabaseClient;
use crate::error::SupabaseError;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use gather_core::remote::{Change, ChangeKind, ChannelSpec, Subscription, Table};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_REF: &str = "1";

/// Phoenix protocol frame (serializer version 1.0.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    table: String,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

pub(crate) fn channel_topic(channel: &ChannelSpec) -> String {
    format!("realtime:{}", channel.topic)
}

pub(crate) fn join_message(channel: &ChannelSpec, access_token: &str) -> PhoenixMessage {
    let bindings: Vec<Value> = channel
        .bindings
        .iter()
        .map(|binding| {
            let mut config = json!({
                "event": binding.kind.map_or("*", ChangeKind::as_str),
                "schema": "public",
                "table": binding.table.as_str(),
            });
            if let Some(filter) = &binding.filter {
                config["filter"] = json!(filter.to_string());
            }
            config
        })
        .collect();

    PhoenixMessage {
        topic: channel_topic(channel),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": bindings,
                "private": false,
            },
            "access_token": access_token,
        }),
        reference: Some(JOIN_REF.to_string()),
        join_ref: Some(JOIN_REF.to_string()),
    }
}

fn heartbeat_message(reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: None,
    }
}

fn leave_message(topic: &str, reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
        join_ref: Some(JOIN_REF.to_string()),
    }
}

/// Outcome of the join, if `message` is the reply to it
pub(crate) fn join_outcome(message: &PhoenixMessage) -> Option<Result<(), String>> {
    if message.event != "phx_reply" || message.reference.as_deref() != Some(JOIN_REF) {
        return None;
    }
    if message.payload["status"] == "ok" {
        return Some(Ok(()));
    }
    let reason = message.payload["response"]["reason"]
        .as_str()
        .map_or_else(|| message.payload.to_string(), str::to_string);
    Some(Err(reason))
}

/// Empty objects stand for "no row"
fn non_empty(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null() && v.as_object().is_none_or(|map| !map.is_empty()))
}

/// Decode a `postgres_changes` frame
pub(crate) fn decode_change(message: &PhoenixMessage) -> Result<Change, SupabaseError> {
    let data = message
        .payload
        .get("data")
        .cloned()
        .ok_or_else(|| SupabaseError::Decode("postgres_changes without data".to_string()))?;
    let data: ChangeData =
        serde_json::from_value(data).map_err(|e| SupabaseError::Decode(e.to_string()))?;
    let table = data
        .table
        .parse::<Table>()
        .map_err(|e| SupabaseError::Decode(e.to_string()))?;

    Ok(Change {
        table,
        kind: data.kind,
        record: non_empty(data.record),
        old_record: non_empty(data.old_record),
    })
}

async fn send(
    sink: &mut SplitSink<Socket, Message>,
    message: &PhoenixMessage,
) -> Result<(), SupabaseError> {
    let text = serde_json::to_string(message).map_err(|e| SupabaseError::Decode(e.to_string()))?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| SupabaseError::Realtime(e.to_string()))
}

fn parse(frame: &Message) -> Option<PhoenixMessage> {
    match frame {
        Message::Text(text) => serde_json::from_str(text).ok(),
        _ => None,
    }
}

async fn await_join(source: &mut SplitStream<Socket>) -> Result<(), SupabaseError> {
    while let Some(frame) = source.next().await {
        let frame = frame.map_err(|e| SupabaseError::Realtime(e.to_string()))?;
        if let Some(outcome) = parse(&frame).as_ref().and_then(join_outcome) {
            return outcome.map_err(SupabaseError::Realtime);
        }
    }
    Err(SupabaseError::Realtime(
        "socket closed before the join was acknowledged".to_string(),
    ))
}

/// Open a socket, join the channel and start forwarding changes
pub(crate) async fn open(
    client: &SupabaseClient,
    channel: ChannelSpec,
) -> Result<Subscription, SupabaseError> {
    let url = client.realtime_url()?;
    let topic = channel_topic(&channel);

    let (socket, _) = tokio::time::timeout(client.request_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| SupabaseError::Realtime("connection timed out".to_string()))?
        .map_err(|e| SupabaseError::Realtime(e.to_string()))?;
    let (mut sink, mut source) = socket.split();

    send(&mut sink, &join_message(&channel, &client.bearer())).await?;
    tokio::time::timeout(client.request_timeout, await_join(&mut source))
        .await
        .map_err(|_| SupabaseError::Realtime("join timed out".to_string()))??;
    tracing::debug!(%topic, bindings = channel.bindings.len(), "Realtime channel joined");

    let (changes_tx, mut changes_rx) = mpsc::unbounded_channel();
    let (leave_tx, leave_rx) = oneshot::channel();
    tokio::spawn(pump(
        sink,
        source,
        topic,
        client.heartbeat_interval,
        changes_tx,
        leave_rx,
    ));

    let changes = async_stream::stream! {
        while let Some(change) = changes_rx.recv().await {
            yield change;
        }
    };

    Ok(Subscription::new(channel.topic, Box::pin(changes), move || {
        let _ = leave_tx.send(());
    }))
}

/// Socket task: heartbeats, change forwarding and the final leave
async fn pump(
    mut sink: SplitSink<Socket, Message>,
    mut source: SplitStream<Socket>,
    topic: String,
    heartbeat_every: Duration,
    changes: mpsc::UnboundedSender<Change>,
    mut leave: oneshot::Receiver<()>,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = &mut leave => {
                if let Err(e) = send(&mut sink, &leave_message(&topic, next_ref)).await {
                    tracing::debug!(%topic, error = %e, "Leave not delivered");
                }
                let _ = sink.close().await;
                tracing::debug!(%topic, "Realtime channel released");
                break;
            }
            _ = heartbeat.tick() => {
                if let Err(e) = send(&mut sink, &heartbeat_message(next_ref)).await {
                    tracing::warn!(%topic, error = %e, "Heartbeat failed, closing channel");
                    break;
                }
                next_ref += 1;
            }
            frame = source.next() => match frame {
                Some(Ok(frame)) => {
                    if matches!(frame, Message::Close(_)) {
                        tracing::warn!(%topic, "Realtime socket closed by server");
                        break;
                    }
                    let Some(message) = parse(&frame) else { continue };
                    if message.topic != topic {
                        continue;
                    }
                    match message.event.as_str() {
                        "postgres_changes" => match decode_change(&message) {
                            Ok(change) => {
                                if changes.send(change).is_err() {
                                    break;
                                }
                            },
                            Err(e) => tracing::warn!(%topic, error = %e, "Undecodable change"),
                        },
                        "phx_error" | "phx_close" => {
                            tracing::warn!(%topic, event = %message.event, "Realtime channel closed");
                            break;
                        },
                        _ => {},
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(%topic, error = %e, "Realtime socket error");
                    break;
                },
                None => break,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use gather_core::remote::ChangeBinding;

    fn detail_channel() -> ChannelSpec {
        ChannelSpec::new("event-e1")
            .on(ChangeBinding::table(Table::EventComments).filter_eq("event_id", "e1"))
            .on(ChangeBinding::table(Table::EventRsvps).filter_eq("event_id", "e1"))
    }

    #[test]
    fn join_carries_bindings_and_token() {
        let message = join_message(&detail_channel(), "jwt");

        assert_eq!(message.topic, "realtime:event-e1");
        assert_eq!(message.event, "phx_join");
        assert_eq!(message.payload["access_token"], "jwt");
        assert_eq!(
            message.payload["config"]["postgres_changes"],
            json!([
                { "event": "*", "schema": "public", "table": "event_comments", "filter": "event_id=eq.e1" },
                { "event": "*", "schema": "public", "table": "event_rsvps", "filter": "event_id=eq.e1" },
            ])
        );
    }

    #[test]
    fn wire_format_uses_ref_key() {
        let text = serde_json::to_string(&heartbeat_message(7)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({ "topic": "phoenix", "event": "heartbeat", "payload": {}, "ref": "7" })
        );
    }

    #[test]
    fn join_reply_outcomes() {
        let reply = |status: &str| PhoenixMessage {
            topic: "realtime:event-e1".to_string(),
            event: "phx_reply".to_string(),
            payload: json!({ "status": status, "response": { "reason": "nope" } }),
            reference: Some(JOIN_REF.to_string()),
            join_ref: None,
        };

        assert_eq!(join_outcome(&reply("ok")), Some(Ok(())));
        assert_eq!(join_outcome(&reply("error")), Some(Err("nope".to_string())));
        assert_eq!(join_outcome(&heartbeat_message(1)), None);
    }

    #[test]
    fn decodes_postgres_changes() {
        let message = PhoenixMessage {
            topic: "realtime:events".to_string(),
            event: "postgres_changes".to_string(),
            payload: json!({
                "data": {
                    "type": "DELETE",
                    "table": "events",
                    "schema": "public",
                    "record": {},
                    "old_record": { "id": "e1" },
                    "commit_timestamp": "2030-01-01T00:00:00Z",
                },
                "ids": [1],
            }),
            reference: None,
            join_ref: None,
        };

        let change = decode_change(&message).unwrap();

        assert_eq!(change.table, Table::Events);
        assert_eq!(change.kind, ChangeKind::Delete);
        assert_eq!(change.record, None);
        assert_eq!(change.id(), Some("e1"));
    }

    #[test]
    fn unknown_table_is_a_decode_error() {
        let message = PhoenixMessage {
            topic: "realtime:x".to_string(),
            event: "postgres_changes".to_string(),
            payload: json!({ "data": { "type": "INSERT", "table": "rooms", "record": {} } }),
            reference: None,
            join_ref: None,
        };
        assert!(matches!(decode_change(&message), Err(SupabaseError::Decode(_))));
    }
}
