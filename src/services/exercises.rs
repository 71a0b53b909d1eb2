use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        exercise::{validate_plan_window, CreatePlanRequest, ExercisePlan, UpdatePlanRequest},
        user::UserRole,
    },
    services::children::ChildService,
};

const PLAN_COLS: &str = "id, child_id, created_by, title, letters, words, target_duration,
     start_date, end_date, notes, is_active, created_at, updated_at";

pub struct ExerciseService;

impl ExerciseService {
    /// Plans are authored by the child's assigned specialist.
    async fn require_author(pool: &PgPool, user: &AuthenticatedUser, child_id: Uuid) -> AppResult<()> {
        let child = ChildService::get(pool, child_id).await?;
        if !user.is(UserRole::Specialist) || child.assigned_specialist_id != Some(user.user_id) {
            return Err(AppError::forbidden("Only the assigned specialist can manage plans"));
        }
        Ok(())
    }

    pub async fn create(pool: &PgPool, user: &AuthenticatedUser, req: &CreatePlanRequest) -> AppResult<ExercisePlan> {
        validate_plan_window(req.start_date, req.end_date, req.target_duration)?;
        if req.letters.is_empty() && req.words.is_empty() {
            return Err(AppError::validation("A plan needs at least one letter or word"));
        }
        Self::require_author(pool, user, req.child_id).await?;

        let plan = sqlx::query_as::<_, ExercisePlan>(&format!(
            "INSERT INTO exercises
                (child_id, kind, created_by, title, letters, words, target_duration, start_date, end_date, notes)
             VALUES ($1, 'plan', $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {PLAN_COLS}"
        ))
        .bind(req.child_id)
        .bind(user.user_id)
        .bind(req.title.as_deref().map(str::trim))
        .bind(Json(&req.letters))
        .bind(Json(&req.words))
        .bind(req.target_duration)
        .bind(req.start_date)
        .bind(req.end_date)
        .bind(&req.notes)
        .fetch_one(pool)
        .await?;

        tracing::info!(plan = %plan.id, child = %plan.child_id, "exercise plan created");
        Ok(plan)
    }

    async fn get_plan(pool: &PgPool, id: Uuid) -> AppResult<ExercisePlan> {
        sqlx::query_as::<_, ExercisePlan>(&format!(
            "SELECT {PLAN_COLS} FROM exercises WHERE id = $1 AND kind = 'plan'"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Exercise plan not found"))
    }

    pub async fn get(pool: &PgPool, user: &AuthenticatedUser, id: Uuid) -> AppResult<ExercisePlan> {
        let plan = Self::get_plan(pool, id).await?;
        ChildService::get_visible(pool, user, plan.child_id).await?;
        Ok(plan)
    }

    /// Plans for a child. Parents (and the training app) only see active ones.
    pub async fn list_for_child(pool: &PgPool, user: &AuthenticatedUser, child_id: Uuid) -> AppResult<Vec<ExercisePlan>> {
        ChildService::get_visible(pool, user, child_id).await?;
        let active_only = user.is(UserRole::Parent);
        let plans = sqlx::query_as::<_, ExercisePlan>(&format!(
            "SELECT {PLAN_COLS} FROM exercises
             WHERE child_id = $1 AND kind = 'plan' AND ($2 = FALSE OR is_active = TRUE)
             ORDER BY created_at DESC"
        ))
        .bind(child_id)
        .bind(active_only)
        .fetch_all(pool)
        .await?;
        Ok(plans)
    }

    pub async fn update(
        pool: &PgPool,
        user: &AuthenticatedUser,
        id: Uuid,
        req: &UpdatePlanRequest,
    ) -> AppResult<ExercisePlan> {
        let plan = Self::get_plan(pool, id).await?;
        Self::require_author(pool, user, plan.child_id).await?;
        validate_plan_window(
            req.start_date.or(plan.start_date),
            req.end_date.or(plan.end_date),
            req.target_duration,
        )?;

        let plan = sqlx::query_as::<_, ExercisePlan>(&format!(
            "UPDATE exercises
             SET title           = COALESCE($1, title),
                 letters         = COALESCE($2, letters),
                 words           = COALESCE($3, words),
                 target_duration = COALESCE($4, target_duration),
                 start_date      = COALESCE($5, start_date),
                 end_date        = COALESCE($6, end_date),
                 notes           = COALESCE($7, notes),
                 is_active       = COALESCE($8, is_active),
                 updated_at      = NOW()
             WHERE id = $9
             RETURNING {PLAN_COLS}"
        ))
        .bind(req.title.as_deref().map(str::trim))
        .bind(req.letters.as_ref().map(Json))
        .bind(req.words.as_ref().map(Json))
        .bind(req.target_duration)
        .bind(req.start_date)
        .bind(req.end_date)
        .bind(&req.notes)
        .bind(req.is_active)
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(plan)
    }

    pub async fn delete(pool: &PgPool, user: &AuthenticatedUser, id: Uuid) -> AppResult<()> {
        let plan = Self::get_plan(pool, id).await?;
        Self::require_author(pool, user, plan.child_id).await?;
        sqlx::query("DELETE FROM exercises WHERE id = $1 AND kind = 'plan'")
            .bind(id)
            .execute(pool)
            .await?;
        tracing::info!(plan = %id, "exercise plan deleted");
        Ok(())
    }
}
