use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Parent,
    Specialist,
    Admin,
    #[serde(rename = "superadmin")]
    SuperAdmin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Parent => "parent",
            UserRole::Specialist => "specialist",
            UserRole::Admin => "admin",
            UserRole::SuperAdmin => "superadmin",
        }
    }

    /// Prefix of the sequential `staffId` handed out per role.
    pub fn staff_prefix(&self) -> &'static str {
        match self {
            UserRole::Parent => "PAR",
            UserRole::Specialist => "SPC",
            UserRole::Admin => "ADM",
            UserRole::SuperAdmin => "SUP",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(UserRole::Parent),
            "specialist" => Ok(UserRole::Specialist),
            "admin" => Ok(UserRole::Admin),
            "superadmin" => Ok(UserRole::SuperAdmin),
            _ => Err(anyhow::anyhow!("Unknown role: {s}")),
        }
    }
}

/// `PAR-0007`, `SPC-0012`, ... Immutable once issued.
pub fn format_staff_id(role: UserRole, sequence: i64) -> String {
    format!("{}-{:04}", role.staff_prefix(), sequence)
}

/// DB row struct. Role is stored as TEXT and parsed on demand.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: String,
    pub staff_id: String,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
    pub center_id: Option<Uuid>,
    pub linked_specialist_id: Option<Uuid>,
    pub profile_image: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> UserRole {
        self.role.parse().unwrap_or(UserRole::Parent)
    }
}

/// Public projection of a user, with the role-conditional fields only
/// present for the roles they belong to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub staff_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub center: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_specialist: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_parents: Option<Vec<Uuid>>,
    pub profile_image: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        let role = u.role();
        let is_specialist = role == UserRole::Specialist;
        Self {
            id: u.id,
            email: u.email,
            name: u.name,
            phone: u.phone,
            role,
            staff_id: u.staff_id,
            specialization: u.specialization.filter(|_| is_specialist),
            license_number: u.license_number.filter(|_| is_specialist),
            center: u
                .center_id
                .filter(|_| matches!(role, UserRole::Admin | UserRole::Specialist)),
            linked_specialist: u.linked_specialist_id.filter(|_| role == UserRole::Parent),
            linked_parents: None,
            profile_image: u.profile_image,
            is_active: u.is_active,
            created_at: u.created_at,
        }
    }
}

impl UserProfile {
    pub fn with_linked_parents(mut self, parents: Vec<Uuid>) -> Self {
        if self.role == UserRole::Specialist {
            self.linked_parents = Some(parents);
        }
        self
    }
}

/// Everything needed to insert an account; the staff id and hash are
/// derived by the user service.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub name: String,
    pub phone: Option<String>,
    pub role: UserRole,
    pub specialization: Option<String>,
    pub license_number: Option<String>,
    pub center_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub specialization: Option<String>,
    pub profile_image: Option<String>,
}

/// Compact row used when listing specialists or parents.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub staff_id: String,
    pub specialization: Option<String>,
    pub center_id: Option<Uuid>,
    pub profile_image: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: "a@b.c".into(),
            password_hash: "$2b$12$hash".into(),
            name: "Someone".into(),
            phone: None,
            role: role.into(),
            staff_id: "X-0001".into(),
            specialization: Some("Articulation".into()),
            license_number: Some("L-1".into()),
            center_id: Some(Uuid::new_v4()),
            linked_specialist_id: Some(Uuid::new_v4()),
            profile_image: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn staff_ids_are_prefixed_and_padded() {
        assert_eq!(format_staff_id(UserRole::Specialist, 12), "SPC-0012");
        assert_eq!(format_staff_id(UserRole::Parent, 1), "PAR-0001");
        assert_eq!(format_staff_id(UserRole::Admin, 12345), "ADM-12345");
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in [UserRole::Parent, UserRole::Specialist, UserRole::Admin, UserRole::SuperAdmin] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("educator".parse::<UserRole>().is_err());
    }

    #[test]
    fn profile_hides_fields_foreign_to_the_role() {
        let parent = UserProfile::from(user("parent"));
        assert!(parent.specialization.is_none());
        assert!(parent.center.is_none());
        assert!(parent.linked_specialist.is_some());

        let specialist = UserProfile::from(user("specialist")).with_linked_parents(vec![Uuid::new_v4()]);
        assert!(specialist.specialization.is_some());
        assert!(specialist.center.is_some());
        assert!(specialist.linked_specialist.is_none());
        assert_eq!(specialist.linked_parents.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let json = serde_json::to_value(user("admin")).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("password_hash").is_none());
    }
}
