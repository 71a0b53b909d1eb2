use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AccountCreated,
    LinkRequest,
    LinkAccepted,
    LinkRejected,
    SpecialistRequest,
    SpecialistAssigned,
    SpecialistRejected,
    Unlinked,
    ProgressUpdate,
    NewMessage,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::AccountCreated => "account_created",
            NotificationKind::LinkRequest => "link_request",
            NotificationKind::LinkAccepted => "link_accepted",
            NotificationKind::LinkRejected => "link_rejected",
            NotificationKind::SpecialistRequest => "specialist_request",
            NotificationKind::SpecialistAssigned => "specialist_assigned",
            NotificationKind::SpecialistRejected => "specialist_rejected",
            NotificationKind::Unlinked => "unlinked",
            NotificationKind::ProgressUpdate => "progress_update",
            NotificationKind::NewMessage => "new_message",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "recipient")]
    pub recipient_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub body: String,
    pub data: Option<Json<serde_json::Value>>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An in-app notification waiting in the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
}

impl NewNotification {
    pub fn new(recipient_id: Uuid, kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { recipient_id, kind, title: title.into(), body: body.into(), data: None }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub unread_only: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceTokenRequest {
    pub token: String,
    pub platform: Platform,
}

#[derive(Debug, Deserialize)]
pub struct UnregisterDeviceTokenRequest {
    pub token: String,
}
