use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;

pub const MAX_MESSAGE_CHARS: usize = 5000;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "sender")]
    pub sender_id: Uuid,
    #[serde(rename = "receiver")]
    pub receiver_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row per counterpart in the caller's inbox.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ConversationItem {
    pub user_id: Uuid,
    pub name: String,
    pub role: String,
    pub profile_image: Option<String>,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub content: String,
}

pub fn normalize_message_content(raw: &str) -> Result<String, AppError> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(AppError::validation("Message content is required"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::validation(format!(
            "Message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(content.to_string())
}

#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PaginationQuery {
    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(50).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        (self.page.unwrap_or(1).max(1) - 1) * self.per_page()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_bounds() {
        let q = PaginationQuery { page: None, per_page: None };
        assert_eq!(q.per_page(), 50);
        assert_eq!(q.offset(), 0);

        let q = PaginationQuery { page: Some(3), per_page: Some(500) };
        assert_eq!(q.per_page(), 100);
        assert_eq!(q.offset(), 200);

        let q = PaginationQuery { page: Some(-2), per_page: Some(0) };
        assert_eq!(q.per_page(), 1);
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn message_content_is_trimmed_and_required() {
        assert_eq!(normalize_message_content("  hi ").unwrap(), "hi");
        assert!(normalize_message_content("   ").is_err());
        assert!(normalize_message_content(&"x".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
    }
}
