use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::notification::{DeviceToken, NewNotification, Notification, Platform},
};

const NOTIFICATION_COLS: &str =
    "id, recipient_id, kind, title, body, data, is_read, read_at, created_at";

pub struct NotificationService;

impl NotificationService {
    pub async fn insert(pool: &PgPool, n: &NewNotification) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO notifications (recipient_id, kind, title, body, data)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(n.recipient_id)
        .bind(n.kind.as_str())
        .bind(&n.title)
        .bind(&n.body)
        .bind(n.data.clone().map(Json))
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        unread_only: bool,
        offset: i64,
        per_page: i64,
    ) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(&format!(
            "SELECT {NOTIFICATION_COLS} FROM notifications
             WHERE recipient_id = $1 AND ($2 = FALSE OR is_read = FALSE)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4"
        ))
        .bind(user_id)
        .bind(unread_only)
        .bind(per_page)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn unread_count(pool: &PgPool, user_id: Uuid) -> AppResult<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn mark_read(pool: &PgPool, user_id: Uuid, id: Uuid) -> AppResult<Notification> {
        sqlx::query_as::<_, Notification>(&format!(
            "UPDATE notifications
             SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
             WHERE id = $1 AND recipient_id = $2
             RETURNING {NOTIFICATION_COLS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Notification not found"))
    }

    pub async fn mark_all_read(pool: &PgPool, user_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, read_at = NOW()
             WHERE recipient_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(pool: &PgPool, user_id: Uuid, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM notifications WHERE id = $1 AND recipient_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Notification not found"));
        }
        Ok(())
    }

    /// Upsert on (user, token); re-registering refreshes the platform.
    pub async fn register_device_token(
        pool: &PgPool,
        user_id: Uuid,
        token: &str,
        platform: Platform,
    ) -> AppResult<DeviceToken> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::validation("Device token is required"));
        }
        let row = sqlx::query_as::<_, DeviceToken>(
            "INSERT INTO device_tokens (user_id, token, platform)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id, token)
             DO UPDATE SET platform = EXCLUDED.platform, updated_at = NOW()
             RETURNING id, user_id, token, platform, created_at, updated_at",
        )
        .bind(user_id)
        .bind(token)
        .bind(platform.as_str())
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn unregister_device_token(pool: &PgPool, user_id: Uuid, token: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM device_tokens WHERE user_id = $1 AND token = $2")
            .bind(user_id)
            .bind(token.trim())
            .execute(pool)
            .await?;
        Ok(())
    }
}
