use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Center {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    #[serde(rename = "admin")]
    pub admin_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Center with its derived specialist roster size.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CenterOverview {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub admin_id: Option<Uuid>,
    pub admin_name: Option<String>,
    pub specialist_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCenterRequest {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCenterRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStaffRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub center_id: Option<Uuid>,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignAdminRequest {
    pub admin_id: Uuid,
}

/// Platform-wide counts for the superadmin dashboard.
#[derive(Debug, Clone, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub centers: i64,
    pub admins: i64,
    pub specialists: i64,
    pub parents: i64,
    pub children: i64,
    pub assigned_children: i64,
    pub pending_requests: i64,
}

/// Counts scoped to one center for the admin dashboard.
#[derive(Debug, Clone, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CenterStats {
    pub specialists: i64,
    pub linked_parents: i64,
    pub assigned_children: i64,
    pub pending_requests: i64,
    pub sessions_last_7_days: i64,
}

/// Counts for a specialist's portal landing page.
#[derive(Debug, Clone, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SpecialistStats {
    pub linked_parents: i64,
    pub assigned_children: i64,
    pub pending_link_requests: i64,
    pub pending_queue: i64,
    pub unread_messages: i64,
}
