use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        message::{normalize_message_content, ConversationItem, Message},
        notification::{NewNotification, NotificationKind},
    },
    services::{
        outbox::Outbox,
        realtime::{MessageEvent, RealtimeEvent},
        users::UserService,
    },
};

const PREVIEW_CHARS: usize = 80;

fn preview(content: &str) -> String {
    let mut out: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

pub struct MessageService;

impl MessageService {
    pub async fn send(
        pool: &PgPool,
        outbox: &Outbox,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> AppResult<Message> {
        if sender_id == receiver_id {
            return Err(AppError::validation("You cannot message yourself"));
        }
        let content = normalize_message_content(content)?;
        let receiver = UserService::get(pool, receiver_id).await?;
        if !receiver.is_active {
            return Err(AppError::not_found("Receiver not found"));
        }
        let sender = UserService::get(pool, sender_id).await?;

        let msg = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (sender_id, receiver_id, content)
             VALUES ($1, $2, $3)
             RETURNING *",
        )
        .bind(sender_id)
        .bind(receiver_id)
        .bind(&content)
        .fetch_one(pool)
        .await?;

        outbox.realtime(receiver_id, RealtimeEvent::NewMessage(MessageEvent::from(&msg)));
        outbox.notify(
            NewNotification::new(receiver_id, NotificationKind::NewMessage, sender.name, preview(&msg.content))
                .with_data(json!({ "messageId": msg.id, "senderId": sender_id })),
        );
        Ok(msg)
    }

    /// Messages between the caller and `other_id`, oldest first within the page.
    pub async fn conversation(
        pool: &PgPool,
        user_id: Uuid,
        other_id: Uuid,
        offset: i64,
        per_page: i64,
    ) -> AppResult<Vec<Message>> {
        let mut rows = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages
             WHERE (sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4",
        )
        .bind(user_id)
        .bind(other_id)
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    pub async fn conversations(pool: &PgPool, user_id: Uuid) -> AppResult<Vec<ConversationItem>> {
        let rows = sqlx::query_as::<_, ConversationItem>(
            "WITH pairs AS (
                 SELECT CASE WHEN sender_id = $1 THEN receiver_id ELSE sender_id END AS other_id,
                        content, created_at
                 FROM messages
                 WHERE sender_id = $1 OR receiver_id = $1
             ),
             latest AS (
                 SELECT DISTINCT ON (other_id) other_id, content, created_at
                 FROM pairs
                 ORDER BY other_id, created_at DESC
             )
             SELECT u.id AS user_id, u.name, u.role, u.profile_image,
                    l.content AS last_message, l.created_at AS last_message_at,
                    (SELECT COUNT(*) FROM messages m
                     WHERE m.sender_id = u.id AND m.receiver_id = $1 AND m.is_read = FALSE) AS unread_count
             FROM latest l
             JOIN users u ON u.id = l.other_id
             ORDER BY l.created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    async fn get(pool: &PgPool, id: Uuid) -> AppResult<Message> {
        sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Message not found"))
    }

    /// Only the receiver changes read state.
    pub async fn mark_read(pool: &PgPool, user_id: Uuid, id: Uuid) -> AppResult<Message> {
        let msg = Self::get(pool, id).await?;
        if msg.receiver_id != user_id {
            return Err(AppError::forbidden("Only the receiver can mark a message as read"));
        }
        let msg = sqlx::query_as::<_, Message>(
            "UPDATE messages
             SET is_read = TRUE, read_at = COALESCE(read_at, NOW()), updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(msg)
    }

    /// Mark everything `other_id` sent the caller as read.
    pub async fn mark_conversation_read(pool: &PgPool, user_id: Uuid, other_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE messages
             SET is_read = TRUE, read_at = NOW(), updated_at = NOW()
             WHERE sender_id = $1 AND receiver_id = $2 AND is_read = FALSE",
        )
        .bind(other_id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Only the sender edits.
    pub async fn edit(pool: &PgPool, outbox: &Outbox, user_id: Uuid, id: Uuid, content: &str) -> AppResult<Message> {
        let content = normalize_message_content(content)?;
        let msg = Self::get(pool, id).await?;
        if msg.sender_id != user_id {
            return Err(AppError::forbidden("Only the sender can edit a message"));
        }
        let msg = sqlx::query_as::<_, Message>(
            "UPDATE messages
             SET content = $1, edited_at = NOW(), updated_at = NOW()
             WHERE id = $2
             RETURNING *",
        )
        .bind(&content)
        .bind(id)
        .fetch_one(pool)
        .await?;

        outbox.realtime(msg.receiver_id, RealtimeEvent::MessageEdited(MessageEvent::from(&msg)));
        Ok(msg)
    }

    /// Only the sender deletes.
    pub async fn delete(pool: &PgPool, outbox: &Outbox, user_id: Uuid, id: Uuid) -> AppResult<()> {
        let msg = Self::get(pool, id).await?;
        if msg.sender_id != user_id {
            return Err(AppError::forbidden("Only the sender can delete a message"));
        }
        sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        outbox.realtime(
            msg.receiver_id,
            RealtimeEvent::MessageDeleted { message_id: msg.id, sender_id: msg.sender_id },
        );
        Ok(())
    }

    pub async fn unread_count(pool: &PgPool, user_id: Uuid) -> AppResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE receiver_id = $1 AND is_read = FALSE")
            .bind(user_id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn previews_are_truncated_on_char_boundaries() {
        let long = "م".repeat(PREVIEW_CHARS + 5);
        let p = preview(&long);
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 1);
        assert!(p.ends_with('…'));
        assert_eq!(preview("short"), "short");
    }
}
