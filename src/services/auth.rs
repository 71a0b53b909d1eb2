use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::{AuthResponse, Claims, RegisterRequest},
        user::{NewUser, UserProfile, UserRole},
    },
    services::{
        email::EmailService,
        metrics::LOGINS_COUNTER,
        users::{validate_password, UserService},
    },
};

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_CODE: &str = "Invalid or expired reset code";

/// Six decimal digits, zero-padded.
fn generate_reset_code() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{code:06}")
}

/// Reset codes are stored as SHA-256 hex, never in clear.
fn hash_reset_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.trim().as_bytes()))
}

/// Random password handed to parents created on their behalf.
pub fn generate_temporary_password() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

pub struct AuthService;

impl AuthService {
    pub fn issue_token(user_id: Uuid, role: UserRole, secret: &str, ttl_seconds: u64) -> anyhow::Result<String> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: now,
            exp: now + ttl_seconds as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        Ok(token)
    }

    /// Self-service sign-up. Only parents and specialists may register
    /// themselves; other roles are created by staff.
    pub async fn register(
        pool: &PgPool,
        req: RegisterRequest,
        jwt_secret: &str,
        ttl_seconds: u64,
    ) -> AppResult<AuthResponse> {
        let role = req.role.unwrap_or(UserRole::Parent);
        if !matches!(role, UserRole::Parent | UserRole::Specialist) {
            return Err(AppError::forbidden("Only parents and specialists can register"));
        }

        let mut conn = pool.acquire().await?;
        let user = UserService::create(
            &mut conn,
            NewUser {
                email: req.email,
                password: req.password,
                name: req.name,
                phone: req.phone,
                role,
                specialization: req.specialization,
                license_number: req.license_number,
                center_id: None,
            },
        )
        .await?;
        drop(conn);

        let token = Self::issue_token(user.id, role, jwt_secret, ttl_seconds)?;
        Ok(AuthResponse { token, user: UserProfile::from(user) })
    }

    pub async fn login(
        pool: &PgPool,
        email: &str,
        password: &str,
        jwt_secret: &str,
        ttl_seconds: u64,
    ) -> AppResult<AuthResponse> {
        let mut conn = pool.acquire().await?;
        let user = UserService::find_by_email(&mut conn, email).await?;
        drop(conn);

        let Some(user) = user else {
            LOGINS_COUNTER.with_label_values(&["unknown_user"]).inc();
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
        };

        if !bcrypt::verify(password, &user.password_hash).unwrap_or(false) {
            LOGINS_COUNTER.with_label_values(&["bad_password"]).inc();
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
        }

        if !user.is_active {
            LOGINS_COUNTER.with_label_values(&["inactive"]).inc();
            return Err(AppError::forbidden("Account is deactivated"));
        }

        LOGINS_COUNTER.with_label_values(&["success"]).inc();
        tracing::info!(user = %user.id, "login");

        let token = Self::issue_token(user.id, user.role(), jwt_secret, ttl_seconds)?;
        let profile = UserService::profile(pool, user.id).await?;
        Ok(AuthResponse { token, user: profile })
    }

    pub async fn change_password(
        pool: &PgPool,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> AppResult<()> {
        let user = UserService::get(pool, user_id).await?;
        if !bcrypt::verify(current_password, &user.password_hash).unwrap_or(false) {
            return Err(AppError::validation("Current password is incorrect"));
        }
        validate_password(new_password)?;

        let new_hash = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(&new_hash)
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Issue and email a reset code. Unknown emails succeed silently. A send
    /// failure withdraws the issued code and surfaces as a dependency error.
    pub async fn request_password_reset(
        pool: &PgPool,
        email_svc: Option<&EmailService>,
        email: &str,
        ttl_minutes: i64,
    ) -> AppResult<()> {
        let mut conn = pool.acquire().await?;
        let user = UserService::find_by_email(&mut conn, email).await?;
        drop(conn);

        let Some(user) = user.filter(|u| u.is_active) else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let email_svc =
            email_svc.ok_or_else(|| AppError::Dependency("Email delivery is not configured".into()))?;

        // Only the latest code is valid.
        sqlx::query("UPDATE password_reset_codes SET used = TRUE WHERE user_id = $1 AND used = FALSE")
            .bind(user.id)
            .execute(pool)
            .await?;

        let code = generate_reset_code();
        let expires_at = Utc::now() + chrono::Duration::minutes(ttl_minutes);
        let code_id: Uuid = sqlx::query_scalar(
            "INSERT INTO password_reset_codes (user_id, code_hash, expires_at)
             VALUES ($1, $2, $3)
             RETURNING id",
        )
        .bind(user.id)
        .bind(hash_reset_code(&code))
        .bind(expires_at)
        .fetch_one(pool)
        .await?;

        if let Err(e) = email_svc
            .send_password_reset_code(&user.email, &user.name, &code, ttl_minutes)
            .await
        {
            tracing::warn!(user = %user.id, "reset code delivery failed: {e:#}");
            sqlx::query("DELETE FROM password_reset_codes WHERE id = $1")
                .bind(code_id)
                .execute(pool)
                .await?;
            return Err(AppError::Dependency("Could not send the reset code, try again later".into()));
        }

        tracing::info!(user = %user.id, "password reset code issued");
        Ok(())
    }

    pub async fn reset_password(pool: &PgPool, email: &str, code: &str, new_password: &str) -> AppResult<()> {
        validate_password(new_password)?;

        let mut tx = pool.begin().await?;
        let user = UserService::find_by_email(&mut *tx, email)
            .await?
            .ok_or_else(|| AppError::validation(INVALID_CODE))?;

        let code_id: Uuid = sqlx::query_scalar(
            "SELECT id FROM password_reset_codes
             WHERE user_id = $1 AND code_hash = $2 AND used = FALSE AND expires_at > NOW()
             ORDER BY created_at DESC
             LIMIT 1
             FOR UPDATE",
        )
        .bind(user.id)
        .bind(hash_reset_code(code))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::validation(INVALID_CODE))?;

        let new_hash = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(&new_hash)
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE password_reset_codes SET used = TRUE WHERE id = $1")
            .bind(code_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(user = %user.id, "password reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::decode_access_token;

    #[test]
    fn reset_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_reset_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn reset_code_hash_ignores_surrounding_whitespace() {
        assert_eq!(hash_reset_code(" 012345 "), hash_reset_code("012345"));
        assert_ne!(hash_reset_code("012345"), hash_reset_code("012346"));
        assert_eq!(hash_reset_code("012345").len(), 64);
    }

    #[test]
    fn temporary_passwords_satisfy_policy() {
        let pw = generate_temporary_password();
        assert!(validate_password(&pw).is_ok());
        assert_ne!(pw, generate_temporary_password());
    }

    #[test]
    fn issued_token_decodes_to_the_same_principal() {
        let id = Uuid::new_v4();
        let token = AuthService::issue_token(id, UserRole::SuperAdmin, "s3cret", 3600).unwrap();
        let user = decode_access_token(&token, "s3cret").unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.role, UserRole::SuperAdmin);
    }
}
