use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    db::next_sequence,
    error::{AppError, AppResult},
    models::user::{format_staff_id, NewUser, UpdateProfileRequest, User, UserProfile, UserRole, UserSummary},
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub const USER_COLS: &str =
    "id, email, password_hash, name, phone, role, staff_id, specialization, license_number,
     center_id, linked_specialist_id, profile_image, is_active, created_at, updated_at";

const SUMMARY_COLS: &str =
    "id, name, email, phone, staff_id, specialization, center_id, profile_image";

pub fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
        .unwrap_or(false);
    if !valid {
        return Err(AppError::validation("A valid email address is required"));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub struct UserService;

impl UserService {
    /// Insert an account, issuing its per-role staff id. Runs on the
    /// caller's connection so it can join a wider transaction.
    pub async fn create(conn: &mut PgConnection, new: NewUser) -> AppResult<User> {
        let email = normalize_email(&new.email)?;
        validate_password(&new.password)?;
        if new.name.trim().is_empty() {
            return Err(AppError::validation("Name is required"));
        }

        let is_specialist = new.role == UserRole::Specialist;
        let has_center = matches!(new.role, UserRole::Admin | UserRole::Specialist);

        let password_hash = bcrypt::hash(&new.password, bcrypt::DEFAULT_COST)?;
        let sequence = next_sequence(&mut *conn, &format!("staff:{}", new.role.as_str())).await?;
        let staff_id = format_staff_id(new.role, sequence);

        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users
                (email, password_hash, name, phone, role, staff_id, specialization, license_number, center_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {USER_COLS}"
        ))
        .bind(&email)
        .bind(&password_hash)
        .bind(new.name.trim())
        .bind(&new.phone)
        .bind(new.role.as_str())
        .bind(&staff_id)
        .bind(new.specialization.filter(|_| is_specialist))
        .bind(new.license_number.filter(|_| is_specialist))
        .bind(new.center_id.filter(|_| has_center))
        .fetch_one(&mut *conn)
        .await?;

        tracing::info!(user = %user.id, role = %new.role, staff_id = %user.staff_id, "account created");
        Ok(user)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> AppResult<User> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    /// Fetch a user and check its role in one go.
    pub async fn get_with_role(pool: &PgPool, id: Uuid, role: UserRole) -> AppResult<User> {
        let user = Self::get(pool, id).await?;
        if user.role() != role || !user.is_active {
            return Err(AppError::not_found(format!("{} not found", capitalize(role.as_str()))));
        }
        Ok(user)
    }

    pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE lower(email) = lower($1)"
        ))
        .bind(email.trim())
        .fetch_optional(conn)
        .await?;
        Ok(user)
    }

    /// Parents whose `linked_specialist_id` points at `specialist_id`. This is
    /// the specialist's `linkedParents` set.
    pub async fn linked_parent_ids(pool: &PgPool, specialist_id: Uuid) -> AppResult<Vec<Uuid>> {
        let ids = sqlx::query_scalar(
            "SELECT id FROM users WHERE linked_specialist_id = $1 AND role = 'parent' ORDER BY name",
        )
        .bind(specialist_id)
        .fetch_all(pool)
        .await?;
        Ok(ids)
    }

    pub async fn linked_parents(pool: &PgPool, specialist_id: Uuid) -> AppResult<Vec<UserSummary>> {
        let rows = sqlx::query_as::<_, UserSummary>(&format!(
            "SELECT {SUMMARY_COLS} FROM users
             WHERE linked_specialist_id = $1 AND role = 'parent'
             ORDER BY name"
        ))
        .bind(specialist_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn profile(pool: &PgPool, id: Uuid) -> AppResult<UserProfile> {
        let user = Self::get(pool, id).await?;
        let is_specialist = user.role() == UserRole::Specialist;
        let profile = UserProfile::from(user);
        if is_specialist {
            let parents = Self::linked_parent_ids(pool, id).await?;
            return Ok(profile.with_linked_parents(parents));
        }
        Ok(profile)
    }

    pub async fn update_profile(pool: &PgPool, id: Uuid, req: &UpdateProfileRequest) -> AppResult<UserProfile> {
        if let Some(name) = &req.name {
            if name.trim().is_empty() {
                return Err(AppError::validation("Name cannot be empty"));
            }
        }
        sqlx::query(
            "UPDATE users
             SET name          = COALESCE($1, name),
                 phone         = COALESCE($2, phone),
                 specialization = CASE WHEN role = 'specialist' THEN COALESCE($3, specialization) ELSE specialization END,
                 profile_image = COALESCE($4, profile_image),
                 updated_at    = NOW()
             WHERE id = $5",
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.phone)
        .bind(&req.specialization)
        .bind(&req.profile_image)
        .bind(id)
        .execute(pool)
        .await?;
        Self::profile(pool, id).await
    }

    /// Active specialists, optionally filtered by name/specialization and center.
    pub async fn list_specialists(
        pool: &PgPool,
        search: Option<&str>,
        center_id: Option<Uuid>,
    ) -> AppResult<Vec<UserSummary>> {
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")));
        let rows = sqlx::query_as::<_, UserSummary>(&format!(
            "SELECT {SUMMARY_COLS} FROM users
             WHERE role = 'specialist' AND is_active = TRUE
               AND ($1::TEXT IS NULL OR name ILIKE $1 OR specialization ILIKE $1)
               AND ($2::UUID IS NULL OR center_id = $2)
             ORDER BY name"
        ))
        .bind(pattern)
        .bind(center_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_by_role(pool: &PgPool, role: UserRole) -> AppResult<Vec<UserProfile>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLS} FROM users WHERE role = $1 ORDER BY created_at DESC"
        ))
        .bind(role.as_str())
        .fetch_all(pool)
        .await?;
        Ok(users.into_iter().map(UserProfile::from).collect())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_lowercased_and_checked() {
        assert_eq!(normalize_email("  Sara@Clinic.COM ").unwrap(), "sara@clinic.com");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@clinic.com").is_err());
        assert!(normalize_email("sara@localhost").is_err());
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
    }

    #[test]
    fn capitalize_role_names() {
        assert_eq!(capitalize("specialist"), "Specialist");
        assert_eq!(capitalize(""), "");
    }
}
