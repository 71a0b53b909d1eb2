use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::error::AppError;
use crate::models::auth::{AuthenticatedUser, Claims};
use crate::models::user::UserRole;

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header format".into()))?;

        let secret = parts
            .extensions
            .get::<JwtSecret>()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("JWT secret not configured")))?;

        decode_access_token(token, &secret.0)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))
    }
}

/// Extension type to carry the JWT secret through request extensions.
#[derive(Clone)]
pub struct JwtSecret(pub String);

pub fn decode_access_token(token: &str, secret: &str) -> Result<AuthenticatedUser, anyhow::Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &key, &validation)?;
    let claims = data.claims;

    Ok(AuthenticatedUser {
        user_id: claims.sub.parse()?,
        role: claims.role,
    })
}

impl AuthenticatedUser {
    /// Reject principals whose role is not in `allowed`.
    pub fn require(&self, allowed: &[UserRole]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::forbidden("Access denied for this role"))
        }
    }

    pub fn is(&self, role: UserRole) -> bool {
        self.role == role
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::auth::AuthService;
    use axum::http::Request;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn parts_with(header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/children");
        if let Some(h) = header {
            builder = builder.header("Authorization", h);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        parts.extensions.insert(JwtSecret(SECRET.into()));
        parts
    }

    #[tokio::test]
    async fn missing_header_is_unauthorized() {
        let mut parts = parts_with(None);
        let err = AuthenticatedUser::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn valid_token_resolves_principal() {
        let id = Uuid::new_v4();
        let token = AuthService::issue_token(id, UserRole::Specialist, SECRET, 60).unwrap();
        let mut parts = parts_with(Some(&format!("Bearer {token}")));
        let user = AuthenticatedUser::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, id);
        assert_eq!(user.role, UserRole::Specialist);
    }

    #[tokio::test]
    async fn token_signed_with_other_secret_is_rejected() {
        let token = AuthService::issue_token(Uuid::new_v4(), UserRole::Parent, "other", 60).unwrap();
        let mut parts = parts_with(Some(&format!("Bearer {token}")));
        let err = AuthenticatedUser::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn role_gate() {
        let user = AuthenticatedUser { user_id: Uuid::new_v4(), role: UserRole::Parent };
        assert!(user.require(&[UserRole::Parent, UserRole::Admin]).is_ok());
        assert!(matches!(user.require(&[UserRole::Specialist]), Err(AppError::Forbidden(_))));
    }
}
