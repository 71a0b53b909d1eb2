use sqlx::{types::Json, PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::{
    db::next_sequence,
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        child::{
            format_child_code, Assignment, Child, CreateChildRequest, SpecialistRequestStatus,
            UpdateChildRequest,
        },
        user::UserRole,
    },
};

const CHILD_SEQUENCE: &str = "child";

/// Who may see a child: the owning parent, the assigned specialist, the
/// specialist a pending queue request names, and staff.
pub fn can_view(user: &AuthenticatedUser, child: &Child) -> bool {
    match user.role {
        UserRole::Parent => child.parent_id == user.user_id,
        UserRole::Specialist => {
            child.assigned_specialist_id == Some(user.user_id)
                || (child.specialist_request_status == SpecialistRequestStatus::Pending.as_str()
                    && child.requested_specialist_id == Some(user.user_id))
        }
        UserRole::Admin | UserRole::SuperAdmin => true,
    }
}

/// Who may curate a child's training material.
pub fn can_manage_content(user: &AuthenticatedUser, child: &Child) -> bool {
    match user.role {
        UserRole::Parent => false,
        UserRole::Specialist => child.assigned_specialist_id == Some(user.user_id),
        UserRole::Admin | UserRole::SuperAdmin => true,
    }
}

fn normalize_targets(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}

pub struct ChildService;

impl ChildService {
    pub async fn get<'e, E: PgExecutor<'e>>(executor: E, id: Uuid) -> AppResult<Child> {
        sqlx::query_as::<_, Child>("SELECT * FROM children WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await?
            .ok_or_else(|| AppError::not_found("Child not found"))
    }

    /// Load and row-lock a child for the rest of the caller's transaction.
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> AppResult<Child> {
        sqlx::query_as::<_, Child>("SELECT * FROM children WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(conn)
            .await?
            .ok_or_else(|| AppError::not_found("Child not found"))
    }

    pub async fn get_visible(pool: &PgPool, user: &AuthenticatedUser, id: Uuid) -> AppResult<Child> {
        let child = Self::get(pool, id).await?;
        if !can_view(user, &child) {
            return Err(AppError::forbidden("You do not have access to this child"));
        }
        Ok(child)
    }

    pub async fn get_manageable(pool: &PgPool, user: &AuthenticatedUser, id: Uuid) -> AppResult<Child> {
        let child = Self::get(pool, id).await?;
        if !can_manage_content(user, &child) {
            return Err(AppError::forbidden("Only the assigned specialist can manage this child"));
        }
        Ok(child)
    }

    pub async fn create(pool: &PgPool, parent_id: Uuid, req: &CreateChildRequest) -> AppResult<Child> {
        let mut tx = pool.begin().await?;
        let child = Self::insert(&mut tx, parent_id, req, Assignment::unassigned()).await?;
        tx.commit().await?;
        tracing::info!(child = %child.id, parent = %parent_id, "child created");
        Ok(child)
    }

    /// Insert a child with an initial assignment on the caller's transaction.
    pub async fn insert(
        conn: &mut PgConnection,
        parent_id: Uuid,
        req: &CreateChildRequest,
        assignment: Assignment,
    ) -> AppResult<Child> {
        req.validate()?;
        let sequence = next_sequence(&mut *conn, CHILD_SEQUENCE).await?;

        let child = sqlx::query_as::<_, Child>(
            "INSERT INTO children
                (child_code, parent_id, name, age, gender, target_letters, target_words,
                 daily_play_duration, session_structure, profile_image, notes,
                 assigned_specialist_id, specialist_request_status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, 15), $9, $10, $11, $12, $13)
             RETURNING *",
        )
        .bind(format_child_code(sequence))
        .bind(parent_id)
        .bind(req.name.trim())
        .bind(req.age)
        .bind(req.gender.as_str())
        .bind(normalize_targets(&req.target_letters))
        .bind(normalize_targets(&req.target_words))
        .bind(req.daily_play_duration)
        .bind(Json(req.session_structure.clone().unwrap_or_default()))
        .bind(&req.profile_image)
        .bind(&req.notes)
        .bind(assignment.specialist())
        .bind(assignment.status().as_str())
        .fetch_one(&mut *conn)
        .await?;
        Ok(child)
    }

    /// Children visible in the caller's list view.
    pub async fn list_for(pool: &PgPool, user: &AuthenticatedUser) -> AppResult<Vec<Child>> {
        let children = match user.role {
            UserRole::Parent => {
                sqlx::query_as::<_, Child>(
                    "SELECT * FROM children WHERE parent_id = $1 ORDER BY created_at",
                )
                .bind(user.user_id)
                .fetch_all(pool)
                .await?
            }
            UserRole::Specialist => Self::list_assigned(pool, user.user_id).await?,
            UserRole::Admin => {
                sqlx::query_as::<_, Child>(
                    "SELECT c.* FROM children c
                     JOIN users s ON s.id = c.assigned_specialist_id
                     JOIN users a ON a.id = $1
                     WHERE a.center_id IS NOT NULL AND s.center_id = a.center_id
                     ORDER BY c.name",
                )
                .bind(user.user_id)
                .fetch_all(pool)
                .await?
            }
            UserRole::SuperAdmin => {
                sqlx::query_as::<_, Child>("SELECT * FROM children ORDER BY created_at DESC")
                    .fetch_all(pool)
                    .await?
            }
        };
        Ok(children)
    }

    pub async fn list_assigned(pool: &PgPool, specialist_id: Uuid) -> AppResult<Vec<Child>> {
        let children = sqlx::query_as::<_, Child>(
            "SELECT * FROM children WHERE assigned_specialist_id = $1 ORDER BY name",
        )
        .bind(specialist_id)
        .fetch_all(pool)
        .await?;
        Ok(children)
    }

    /// The specialist's pending queue: children whose parent asked for them.
    pub async fn list_pending_for(pool: &PgPool, specialist_id: Uuid) -> AppResult<Vec<Child>> {
        let children = sqlx::query_as::<_, Child>(
            "SELECT * FROM children
             WHERE requested_specialist_id = $1 AND specialist_request_status = 'pending'
             ORDER BY updated_at",
        )
        .bind(specialist_id)
        .fetch_all(pool)
        .await?;
        Ok(children)
    }

    /// The owning parent edits the profile; the assigned specialist may
    /// adjust training targets and notes too.
    pub async fn update(
        pool: &PgPool,
        user: &AuthenticatedUser,
        id: Uuid,
        req: &UpdateChildRequest,
    ) -> AppResult<Child> {
        req.validate()?;
        let child = Self::get(pool, id).await?;
        let is_owner = user.is(UserRole::Parent) && child.parent_id == user.user_id;
        let is_assigned = user.is(UserRole::Specialist) && child.assigned_specialist_id == Some(user.user_id);
        if !is_owner && !is_assigned {
            return Err(AppError::forbidden("You cannot edit this child"));
        }

        let child = sqlx::query_as::<_, Child>(
            "UPDATE children
             SET name                = COALESCE($1, name),
                 age                 = COALESCE($2, age),
                 gender              = COALESCE($3, gender),
                 target_letters      = COALESCE($4, target_letters),
                 target_words        = COALESCE($5, target_words),
                 daily_play_duration = COALESCE($6, daily_play_duration),
                 session_structure   = COALESCE($7, session_structure),
                 profile_image       = COALESCE($8, profile_image),
                 notes               = COALESCE($9, notes),
                 updated_at          = NOW()
             WHERE id = $10
             RETURNING *",
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.age)
        .bind(req.gender.map(|g| g.as_str()))
        .bind(req.target_letters.as_deref().map(normalize_targets))
        .bind(req.target_words.as_deref().map(normalize_targets))
        .bind(req.daily_play_duration)
        .bind(req.session_structure.clone().map(Json))
        .bind(&req.profile_image)
        .bind(&req.notes)
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(child)
    }

    pub async fn delete(pool: &PgPool, user: &AuthenticatedUser, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM children WHERE id = $1 AND parent_id = $2")
            .bind(id)
            .bind(user.user_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            // Distinguish a missing child from someone else's.
            Self::get(pool, id).await?;
            return Err(AppError::forbidden("Only the owning parent can delete a child"));
        }
        tracing::info!(child = %id, "child deleted");
        Ok(())
    }

    /// Compare-and-set the assignment columns. Fails with a conflict if the
    /// row no longer holds `expected`.
    pub async fn write_assignment(
        conn: &mut PgConnection,
        child_id: Uuid,
        expected: Assignment,
        next: Assignment,
        requested_specialist: Option<Uuid>,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE children
             SET assigned_specialist_id    = $1,
                 specialist_request_status = $2,
                 requested_specialist_id   = $3,
                 updated_at                = NOW()
             WHERE id = $4
               AND assigned_specialist_id IS NOT DISTINCT FROM $5
               AND specialist_request_status = $6",
        )
        .bind(next.specialist())
        .bind(next.status().as_str())
        .bind(requested_specialist)
        .bind(child_id)
        .bind(expected.specialist())
        .bind(expected.status().as_str())
        .execute(conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::conflict("Child assignment changed, please retry"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn child(parent: Uuid, assigned: Option<Uuid>, requested: Option<Uuid>, status: &str) -> Child {
        Child {
            id: Uuid::new_v4(),
            child_code: "CH-00001".into(),
            parent_id: parent,
            name: "Yousef".into(),
            age: 5,
            gender: "male".into(),
            target_letters: vec![],
            target_words: vec![],
            daily_play_duration: 15,
            session_structure: Json(Default::default()),
            profile_image: None,
            notes: None,
            assigned_specialist_id: assigned,
            requested_specialist_id: requested,
            specialist_request_status: status.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn as_user(user_id: Uuid, role: UserRole) -> AuthenticatedUser {
        AuthenticatedUser { user_id, role }
    }

    #[test]
    fn owner_and_assigned_specialist_can_view() {
        let (parent, specialist, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let c = child(parent, Some(specialist), None, "approved");

        assert!(can_view(&as_user(parent, UserRole::Parent), &c));
        assert!(can_view(&as_user(specialist, UserRole::Specialist), &c));
        assert!(can_view(&as_user(other, UserRole::Admin), &c));
        assert!(!can_view(&as_user(other, UserRole::Parent), &c));
        assert!(!can_view(&as_user(other, UserRole::Specialist), &c));
    }

    #[test]
    fn requested_specialist_sees_pending_child_but_cannot_manage_it() {
        let specialist = Uuid::new_v4();
        let c = child(Uuid::new_v4(), None, Some(specialist), "pending");
        let user = as_user(specialist, UserRole::Specialist);
        assert!(can_view(&user, &c));
        assert!(!can_manage_content(&user, &c));

        let rejected = child(Uuid::new_v4(), None, Some(specialist), "rejected");
        assert!(!can_view(&user, &rejected));
    }

    #[test]
    fn parents_never_manage_content() {
        let parent = Uuid::new_v4();
        let c = child(parent, None, None, "none");
        assert!(!can_manage_content(&as_user(parent, UserRole::Parent), &c));
        assert!(can_manage_content(&as_user(Uuid::new_v4(), UserRole::SuperAdmin), &c));
    }

    #[test]
    fn targets_are_trimmed_and_deduplicated() {
        let raw = vec![" ب ".to_string(), "ب".into(), "".into(), "ت".into()];
        assert_eq!(normalize_targets(&raw), vec!["ب".to_string(), "ت".to_string()]);
    }
}
