use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl LinkRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkRequestStatus::Pending => "pending",
            LinkRequestStatus::Accepted => "accepted",
            LinkRequestStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LinkRequestStatus::Pending)
    }

    /// Accepted and rejected are terminal; only a pending request may move.
    pub fn respond(self, accept: bool) -> Result<Self, AppError> {
        if self.is_terminal() {
            return Err(AppError::conflict(format!("Request has already been {}", self.as_str())));
        }
        Ok(if accept { LinkRequestStatus::Accepted } else { LinkRequestStatus::Rejected })
    }
}

impl std::str::FromStr for LinkRequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LinkRequestStatus::Pending),
            "accepted" => Ok(LinkRequestStatus::Accepted),
            "rejected" => Ok(LinkRequestStatus::Rejected),
            _ => Err(anyhow::anyhow!("Unknown link request status: {s}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub id: Uuid,
    #[serde(rename = "from")]
    pub from_parent_id: Uuid,
    #[serde(rename = "to")]
    pub to_specialist_id: Uuid,
    #[serde(rename = "child")]
    pub child_id: Uuid,
    pub status: String,
    pub message: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LinkRequest {
    pub fn status(&self) -> Result<LinkRequestStatus, AppError> {
        self.status.parse().map_err(AppError::Internal)
    }
}

/// Link request joined with the names the portals display.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequestView {
    pub id: Uuid,
    pub from_parent_id: Uuid,
    pub parent_name: String,
    pub parent_email: String,
    pub to_specialist_id: Uuid,
    pub specialist_name: String,
    pub child_id: Uuid,
    pub child_name: String,
    pub status: String,
    pub message: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkRequest {
    pub specialist_id: Uuid,
    pub child_id: Uuid,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferralType {
    SpecialistCreated,
    LinkRequest,
    AdminAssigned,
}

impl ReferralType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralType::SpecialistCreated => "specialist_created",
            ReferralType::LinkRequest => "link_request",
            ReferralType::AdminAssigned => "admin_assigned",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Active,
    Inactive,
    Cancelled,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Active => "active",
            ReferralStatus::Inactive => "inactive",
            ReferralStatus::Cancelled => "cancelled",
        }
    }
}

/// Audit record of why a parent–specialist relationship exists. Never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: Uuid,
    #[serde(rename = "parent")]
    pub parent_id: Uuid,
    #[serde(rename = "specialist")]
    pub specialist_id: Uuid,
    #[serde(rename = "child")]
    pub child_id: Option<Uuid>,
    pub referral_type: String,
    pub status: String,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReferral {
    pub parent_id: Uuid,
    pub specialist_id: Uuid,
    pub child_id: Option<Uuid>,
    pub referral_type: ReferralType,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

/// Path A payload: a specialist registers a family in one step.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFamilyRequest {
    pub parent_name: String,
    pub parent_email: String,
    pub parent_phone: Option<String>,
    pub child: super::child::CreateChildRequest,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignChildRequest {
    pub child_id: Uuid,
    pub specialist_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_request_can_be_accepted_or_rejected() {
        assert_eq!(LinkRequestStatus::Pending.respond(true).unwrap(), LinkRequestStatus::Accepted);
        assert_eq!(LinkRequestStatus::Pending.respond(false).unwrap(), LinkRequestStatus::Rejected);
    }

    #[test]
    fn terminal_states_do_not_move() {
        for status in [LinkRequestStatus::Accepted, LinkRequestStatus::Rejected] {
            assert!(matches!(status.respond(true), Err(AppError::Conflict(_))));
            assert!(matches!(status.respond(false), Err(AppError::Conflict(_))));
        }
    }

    #[test]
    fn referral_type_text_matches_storage_check() {
        assert_eq!(ReferralType::SpecialistCreated.as_str(), "specialist_created");
        assert_eq!(ReferralType::LinkRequest.as_str(), "link_request");
        assert_eq!(ReferralType::AdminAssigned.as_str(), "admin_assigned");
        assert_eq!(ReferralStatus::Active.as_str(), "active");
    }
}
