use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use crate::error::AppError;

pub const MIN_CHILD_AGE: i16 = 4;
pub const MAX_CHILD_AGE: i16 = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistRequestStatus {
    None,
    Pending,
    Approved,
    Rejected,
}

impl SpecialistRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistRequestStatus::None => "none",
            SpecialistRequestStatus::Pending => "pending",
            SpecialistRequestStatus::Approved => "approved",
            SpecialistRequestStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for SpecialistRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SpecialistRequestStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SpecialistRequestStatus::None),
            "pending" => Ok(SpecialistRequestStatus::Pending),
            "approved" => Ok(SpecialistRequestStatus::Approved),
            "rejected" => Ok(SpecialistRequestStatus::Rejected),
            _ => Err(anyhow::anyhow!("Unknown specialist request status: {s}")),
        }
    }
}

/// Assignment state of a child.
///
/// The only way to build one is through the transitions below or
/// [`Assignment::from_parts`], so a specialist is present exactly when the
/// status is `approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    specialist: Option<Uuid>,
    status: SpecialistRequestStatus,
}

impl Assignment {
    pub fn unassigned() -> Self {
        Self { specialist: None, status: SpecialistRequestStatus::None }
    }

    pub fn approved(specialist: Uuid) -> Self {
        Self { specialist: Some(specialist), status: SpecialistRequestStatus::Approved }
    }

    pub fn from_parts(
        specialist: Option<Uuid>,
        status: SpecialistRequestStatus,
    ) -> Result<Self, AppError> {
        match (specialist, status) {
            (Some(_), SpecialistRequestStatus::Approved)
            | (None, SpecialistRequestStatus::None)
            | (None, SpecialistRequestStatus::Pending)
            | (None, SpecialistRequestStatus::Rejected) => Ok(Self { specialist, status }),
            _ => Err(AppError::Internal(anyhow::anyhow!(
                "inconsistent assignment state: specialist={specialist:?} status={status}"
            ))),
        }
    }

    pub fn specialist(&self) -> Option<Uuid> {
        self.specialist
    }

    pub fn status(&self) -> SpecialistRequestStatus {
        self.status
    }

    pub fn is_assigned(&self) -> bool {
        self.specialist.is_some()
    }

    /// A parent asks for a specialist. Allowed from any unassigned state,
    /// including after a rejection.
    pub fn request(self) -> Result<Self, AppError> {
        if self.is_assigned() {
            return Err(AppError::conflict("Child is already assigned to a specialist"));
        }
        Ok(Self { specialist: None, status: SpecialistRequestStatus::Pending })
    }

    /// Bind the child to `specialist`. Idempotent for the same specialist;
    /// re-assignment to another one is a conflict.
    pub fn approve(self, specialist: Uuid) -> Result<Self, AppError> {
        match self.specialist {
            Some(current) if current == specialist => Ok(self),
            Some(_) => Err(AppError::conflict("Child is already assigned to another specialist")),
            None => Ok(Self::approved(specialist)),
        }
    }

    /// Decline a pending queue request.
    pub fn reject(self) -> Result<Self, AppError> {
        if self.status != SpecialistRequestStatus::Pending {
            return Err(AppError::conflict("Child has no pending specialist request"));
        }
        Ok(Self { specialist: None, status: SpecialistRequestStatus::Rejected })
    }

    /// Clear the specialist and the status together.
    pub fn unassign(self) -> Self {
        Self::unassigned()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

/// Per-session shape the training app follows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStructure {
    pub warm_up_minutes: Option<u32>,
    pub letters_per_session: Option<u32>,
    pub words_per_session: Option<u32>,
    pub repetitions_per_item: Option<u32>,
    pub include_review: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: Uuid,
    #[serde(rename = "childId")]
    pub child_code: String,
    #[serde(rename = "parent")]
    pub parent_id: Uuid,
    pub name: String,
    pub age: i16,
    pub gender: String,
    pub target_letters: Vec<String>,
    pub target_words: Vec<String>,
    pub daily_play_duration: i32,
    pub session_structure: Json<SessionStructure>,
    pub profile_image: Option<String>,
    pub notes: Option<String>,
    #[serde(rename = "assignedSpecialist")]
    pub assigned_specialist_id: Option<Uuid>,
    #[serde(rename = "requestedSpecialist")]
    pub requested_specialist_id: Option<Uuid>,
    pub specialist_request_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Child {
    pub fn assignment(&self) -> Result<Assignment, AppError> {
        let status = self
            .specialist_request_status
            .parse::<SpecialistRequestStatus>()
            .map_err(AppError::Internal)?;
        Assignment::from_parts(self.assigned_specialist_id, status)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChildRequest {
    pub name: String,
    pub age: i16,
    pub gender: Gender,
    #[serde(default)]
    pub target_letters: Vec<String>,
    #[serde(default)]
    pub target_words: Vec<String>,
    pub daily_play_duration: Option<i32>,
    pub session_structure: Option<SessionStructure>,
    pub profile_image: Option<String>,
    pub notes: Option<String>,
}

impl CreateChildRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("Child name is required"));
        }
        validate_age(self.age)?;
        if let Some(minutes) = self.daily_play_duration {
            validate_play_duration(minutes)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChildRequest {
    pub name: Option<String>,
    pub age: Option<i16>,
    pub gender: Option<Gender>,
    pub target_letters: Option<Vec<String>>,
    pub target_words: Option<Vec<String>>,
    pub daily_play_duration: Option<i32>,
    pub session_structure: Option<SessionStructure>,
    pub profile_image: Option<String>,
    pub notes: Option<String>,
}

impl UpdateChildRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(AppError::validation("Child name cannot be empty"));
            }
        }
        if let Some(age) = self.age {
            validate_age(age)?;
        }
        if let Some(minutes) = self.daily_play_duration {
            validate_play_duration(minutes)?;
        }
        Ok(())
    }
}

fn validate_age(age: i16) -> Result<(), AppError> {
    if !(MIN_CHILD_AGE..=MAX_CHILD_AGE).contains(&age) {
        return Err(AppError::validation(format!(
            "Age must be between {MIN_CHILD_AGE} and {MAX_CHILD_AGE}"
        )));
    }
    Ok(())
}

fn validate_play_duration(minutes: i32) -> Result<(), AppError> {
    if !(1..=120).contains(&minutes) {
        return Err(AppError::validation("Daily play duration must be between 1 and 120 minutes"));
    }
    Ok(())
}

/// `CH-00042`
pub fn format_child_code(sequence: i64) -> String {
    format!("CH-{sequence:05}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpecialistRequest {
    pub specialist_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specialist_present_iff_approved() {
        let s = Uuid::new_v4();
        assert!(Assignment::from_parts(Some(s), SpecialistRequestStatus::Approved).is_ok());
        assert!(Assignment::from_parts(None, SpecialistRequestStatus::Approved).is_err());
        assert!(Assignment::from_parts(Some(s), SpecialistRequestStatus::Pending).is_err());
        assert!(Assignment::from_parts(Some(s), SpecialistRequestStatus::None).is_err());
        assert!(Assignment::from_parts(None, SpecialistRequestStatus::Rejected).is_ok());
    }

    #[test]
    fn request_then_approve_binds_specialist() {
        let s = Uuid::new_v4();
        let pending = Assignment::unassigned().request().unwrap();
        assert_eq!(pending.status(), SpecialistRequestStatus::Pending);
        assert_eq!(pending.specialist(), None);

        let approved = pending.approve(s).unwrap();
        assert_eq!(approved.status(), SpecialistRequestStatus::Approved);
        assert_eq!(approved.specialist(), Some(s));
    }

    #[test]
    fn assigned_child_cannot_be_requested_or_reassigned() {
        let approved = Assignment::approved(Uuid::new_v4());
        assert!(matches!(approved.request(), Err(AppError::Conflict(_))));
        assert!(matches!(approved.approve(Uuid::new_v4()), Err(AppError::Conflict(_))));
    }

    #[test]
    fn approving_twice_for_same_specialist_is_idempotent() {
        let s = Uuid::new_v4();
        let approved = Assignment::approved(s);
        assert_eq!(approved.approve(s).unwrap(), approved);
    }

    #[test]
    fn rejection_only_from_pending_and_allows_retry() {
        assert!(Assignment::unassigned().reject().is_err());

        let rejected = Assignment::unassigned().request().unwrap().reject().unwrap();
        assert_eq!(rejected.status(), SpecialistRequestStatus::Rejected);
        assert_eq!(rejected.specialist(), None);

        let retried = rejected.request().unwrap();
        assert_eq!(retried.status(), SpecialistRequestStatus::Pending);
    }

    #[test]
    fn unassign_resets_status_with_reference() {
        let cleared = Assignment::approved(Uuid::new_v4()).unassign();
        assert_eq!(cleared, Assignment::unassigned());
        assert_eq!(cleared.status(), SpecialistRequestStatus::None);
    }

    #[test]
    fn child_age_is_bounded() {
        let mut req = CreateChildRequest {
            name: "Lina".into(),
            age: 4,
            gender: Gender::Female,
            target_letters: vec![],
            target_words: vec![],
            daily_play_duration: Some(15),
            session_structure: None,
            profile_image: None,
            notes: None,
        };
        assert!(req.validate().is_ok());
        req.age = 6;
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
        req.age = 3;
        assert!(req.validate().is_err());
    }

    #[test]
    fn child_codes_are_padded() {
        assert_eq!(format_child_code(42), "CH-00042");
    }
}
