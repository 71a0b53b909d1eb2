use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        center::{Center, CenterOverview, CreateCenterRequest, CreateStaffRequest, UpdateCenterRequest},
        user::{NewUser, UserProfile, UserRole, UserSummary},
    },
    services::users::UserService,
};

const OVERVIEW_QUERY: &str =
    "SELECT c.id, c.name, c.address, c.phone, c.admin_id, a.name AS admin_name,
            (SELECT COUNT(*) FROM users s WHERE s.center_id = c.id AND s.role = 'specialist') AS specialist_count,
            c.created_at
     FROM centers c
     LEFT JOIN users a ON a.id = c.admin_id";

pub struct CenterService;

impl CenterService {
    // ─── Superadmin ─────────────────────────────────────────────────────────

    pub async fn create(pool: &PgPool, req: &CreateCenterRequest) -> AppResult<Center> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("Center name is required"));
        }
        let center = sqlx::query_as::<_, Center>(
            "INSERT INTO centers (name, address, phone) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(name)
        .bind(&req.address)
        .bind(&req.phone)
        .fetch_one(pool)
        .await?;
        tracing::info!(center = %center.id, "center created");
        Ok(center)
    }

    pub async fn list(pool: &PgPool) -> AppResult<Vec<CenterOverview>> {
        let rows = sqlx::query_as::<_, CenterOverview>(&format!("{OVERVIEW_QUERY} ORDER BY c.name"))
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> AppResult<CenterOverview> {
        sqlx::query_as::<_, CenterOverview>(&format!("{OVERVIEW_QUERY} WHERE c.id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::not_found("Center not found"))
    }

    pub async fn update(pool: &PgPool, id: Uuid, req: &UpdateCenterRequest) -> AppResult<Center> {
        if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::validation("Center name cannot be empty"));
        }
        sqlx::query_as::<_, Center>(
            "UPDATE centers
             SET name       = COALESCE($1, name),
                 address    = COALESCE($2, address),
                 phone      = COALESCE($3, phone),
                 updated_at = NOW()
             WHERE id = $4
             RETURNING *",
        )
        .bind(req.name.as_deref().map(str::trim))
        .bind(&req.address)
        .bind(&req.phone)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("Center not found"))
    }

    /// Staff keep their accounts; their center reference is nulled by the FK.
    pub async fn delete(pool: &PgPool, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM centers WHERE id = $1").bind(id).execute(pool).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Center not found"));
        }
        tracing::info!(center = %id, "center deleted");
        Ok(())
    }

    pub async fn create_admin(pool: &PgPool, req: CreateStaffRequest) -> AppResult<UserProfile> {
        let mut tx = pool.begin().await?;
        if let Some(center_id) = req.center_id {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM centers WHERE id = $1)")
                .bind(center_id)
                .fetch_one(&mut *tx)
                .await?;
            if !exists {
                return Err(AppError::not_found("Center not found"));
            }
        }

        let admin = UserService::create(
            &mut tx,
            NewUser {
                email: req.email,
                password: req.password,
                name: req.name,
                phone: req.phone,
                role: UserRole::Admin,
                specialization: None,
                license_number: None,
                center_id: req.center_id,
            },
        )
        .await?;

        if let Some(center_id) = req.center_id {
            Self::bind_admin(&mut tx, center_id, admin.id).await?;
        }
        tx.commit().await?;
        Ok(UserProfile::from(admin))
    }

    pub async fn list_admins(pool: &PgPool) -> AppResult<Vec<UserProfile>> {
        UserService::list_by_role(pool, UserRole::Admin).await
    }

    /// Hard delete. The admin's center keeps existing with no admin.
    pub async fn delete_admin(pool: &PgPool, admin_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1 AND role = 'admin'")
            .bind(admin_id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Admin not found"));
        }
        tracing::info!(admin = %admin_id, "admin deleted");
        Ok(())
    }

    pub async fn assign_admin(pool: &PgPool, center_id: Uuid, admin_id: Uuid) -> AppResult<CenterOverview> {
        let mut tx = pool.begin().await?;
        let is_admin: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND role = 'admin')")
                .bind(admin_id)
                .fetch_one(&mut *tx)
                .await?;
        if !is_admin {
            return Err(AppError::not_found("Admin not found"));
        }
        let center: Option<Uuid> = sqlx::query_scalar("SELECT id FROM centers WHERE id = $1 FOR UPDATE")
            .bind(center_id)
            .fetch_optional(&mut *tx)
            .await?;
        if center.is_none() {
            return Err(AppError::not_found("Center not found"));
        }
        Self::bind_admin(&mut tx, center_id, admin_id).await?;
        tx.commit().await?;

        tracing::info!(center = %center_id, admin = %admin_id, "admin assigned to center");
        Self::get(pool, center_id).await
    }

    /// One admin per center and one center per admin: detach both sides'
    /// previous partners, then bind.
    async fn bind_admin(conn: &mut sqlx::PgConnection, center_id: Uuid, admin_id: Uuid) -> AppResult<()> {
        sqlx::query(
            "UPDATE users SET center_id = NULL, updated_at = NOW()
             WHERE id = (SELECT admin_id FROM centers WHERE id = $1) AND id <> $2",
        )
        .bind(center_id)
        .bind(admin_id)
        .execute(&mut *conn)
        .await?;
        sqlx::query("UPDATE centers SET admin_id = NULL, updated_at = NOW() WHERE admin_id = $1 AND id <> $2")
            .bind(admin_id)
            .bind(center_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("UPDATE centers SET admin_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(admin_id)
            .bind(center_id)
            .execute(&mut *conn)
            .await?;
        sqlx::query("UPDATE users SET center_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(center_id)
            .bind(admin_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    // ─── Admin ──────────────────────────────────────────────────────────────

    /// The center an admin runs. Admins without one cannot use center tools.
    pub async fn center_of(pool: &PgPool, admin_id: Uuid) -> AppResult<Uuid> {
        let center: Option<Uuid> =
            sqlx::query_scalar("SELECT center_id FROM users WHERE id = $1 AND role = 'admin'")
                .bind(admin_id)
                .fetch_optional(pool)
                .await?
                .flatten();
        center.ok_or_else(|| AppError::forbidden("You are not assigned to a center"))
    }

    pub async fn create_specialist(pool: &PgPool, admin_id: Uuid, req: CreateStaffRequest) -> AppResult<UserProfile> {
        let center_id = Self::center_of(pool, admin_id).await?;
        let mut conn = pool.acquire().await?;
        let specialist = UserService::create(
            &mut conn,
            NewUser {
                email: req.email,
                password: req.password,
                name: req.name,
                phone: req.phone,
                role: UserRole::Specialist,
                specialization: req.specialization,
                license_number: req.license_number,
                center_id: Some(center_id),
            },
        )
        .await?;
        Ok(UserProfile::from(specialist))
    }

    pub async fn list_specialists(pool: &PgPool, admin_id: Uuid) -> AppResult<Vec<UserSummary>> {
        let center_id = Self::center_of(pool, admin_id).await?;
        UserService::list_specialists(pool, None, Some(center_id)).await
    }

    /// Detach a specialist from the admin's center. Their children and
    /// linked parents are untouched.
    pub async fn remove_specialist(pool: &PgPool, admin_id: Uuid, specialist_id: Uuid) -> AppResult<()> {
        let center_id = Self::center_of(pool, admin_id).await?;
        let result = sqlx::query(
            "UPDATE users SET center_id = NULL, updated_at = NOW()
             WHERE id = $1 AND role = 'specialist' AND center_id = $2",
        )
        .bind(specialist_id)
        .bind(center_id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Specialist not found in your center"));
        }
        tracing::info!(center = %center_id, specialist = %specialist_id, "specialist removed from center");
        Ok(())
    }
}
