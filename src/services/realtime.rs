use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::Serialize;
use uuid::Uuid;

use crate::models::message::Message;

/// Events pushed to a user's channel, serialized as `{type, payload}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RealtimeEvent {
    NewMessage(MessageEvent),
    MessageEdited(MessageEvent),
    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: Uuid, sender_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ProgressUpdated { child_id: Uuid, timestamp: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    UserTyping { from: Uuid, is_typing: bool },
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RealtimeEvent::NewMessage(_) => "new_message",
            RealtimeEvent::MessageEdited(_) => "message_edited",
            RealtimeEvent::MessageDeleted { .. } => "message_deleted",
            RealtimeEvent::ProgressUpdated { .. } => "progress_updated",
            RealtimeEvent::UserTyping { .. } => "user_typing",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl From<&Message> for MessageEvent {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            content: m.content.clone(),
            created_at: m.created_at,
            edited_at: m.edited_at,
        }
    }
}

pub fn user_channel(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

/// Publisher over Redis pub/sub. Delivery is at-most-once: nobody
/// subscribed means nobody hears it.
#[derive(Clone)]
pub struct Realtime {
    conn: redis::aio::MultiplexedConnection,
}

impl Realtime {
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }

    pub async fn publish(&self, user_id: Uuid, event: &RealtimeEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(user_channel(user_id), payload).await?;
        tracing::debug!(user = %user_id, event = event.name(), "realtime event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_event_shape() {
        let child = Uuid::nil();
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        let value = serde_json::to_value(RealtimeEvent::ProgressUpdated { child_id: child, timestamp: ts }).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "progress_updated",
                "payload": { "childId": child, "timestamp": "2026-01-02T03:04:05Z" }
            })
        );
    }

    #[test]
    fn event_names_match_wire_tags() {
        let events = [
            RealtimeEvent::MessageDeleted { message_id: Uuid::nil(), sender_id: Uuid::nil() },
            RealtimeEvent::UserTyping { from: Uuid::nil(), is_typing: true },
        ];
        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.name());
        }
    }

    #[test]
    fn channel_is_per_user() {
        let id = Uuid::new_v4();
        assert_eq!(user_channel(id), format!("user:{id}"));
    }
}
