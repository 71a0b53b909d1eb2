use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::{
    extract::AppJson,
    error::AppResult,
    middleware::rate_limit::{check_rate_limit, login_key, reset_key},
    models::{
        auth::{
            AuthenticatedUser, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
            RegisterRequest, ResetPasswordRequest,
        },
        user::UpdateProfileRequest,
    },
    routes::{created, done, ok},
    services::{auth::AuthService, users::UserService},
    AppState,
};

const LOGIN_MAX_ATTEMPTS: u64 = 5;
const RESET_MAX_ATTEMPTS: u64 = 3;
const RATE_WINDOW_SECS: u64 = 900;

pub async fn register(
    State(state): State<AppState>,
    AppJson(body): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let auth = AuthService::register(
        &state.db,
        body,
        &state.config.jwt_secret,
        state.config.jwt_expiry_seconds,
    )
    .await?;
    Ok(created("Account created", json!({ "token": auth.token, "user": auth.user })))
}

pub async fn login(
    State(state): State<AppState>,
    AppJson(body): AppJson<LoginRequest>,
) -> AppResult<Json<Value>> {
    let mut redis = state.redis.clone();
    check_rate_limit(&mut redis, &login_key(&body.email), LOGIN_MAX_ATTEMPTS, RATE_WINDOW_SECS).await?;

    let auth = AuthService::login(
        &state.db,
        &body.email,
        &body.password,
        &state.config.jwt_secret,
        state.config.jwt_expiry_seconds,
    )
    .await?;
    Ok(ok(json!({ "token": auth.token, "user": auth.user })))
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    let profile = UserService::profile(&state.db, user.user_id).await?;
    Ok(ok(json!({ "user": profile })))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<UpdateProfileRequest>,
) -> AppResult<Json<Value>> {
    let profile = UserService::update_profile(&state.db, user.user_id, &body).await?;
    Ok(ok(json!({ "user": profile })))
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<ChangePasswordRequest>,
) -> AppResult<Json<Value>> {
    AuthService::change_password(&state.db, user.user_id, &body.current_password, &body.new_password).await?;
    Ok(done("Password changed"))
}

/// Always answers the same way for known and unknown emails.
pub async fn forgot_password(
    State(state): State<AppState>,
    AppJson(body): AppJson<ForgotPasswordRequest>,
) -> AppResult<Json<Value>> {
    let mut redis = state.redis.clone();
    check_rate_limit(&mut redis, &reset_key(&body.email), RESET_MAX_ATTEMPTS, RATE_WINDOW_SECS).await?;

    AuthService::request_password_reset(
        &state.db,
        state.email.as_deref(),
        &body.email,
        state.config.reset_code_ttl_minutes,
    )
    .await?;
    Ok(done("If the email exists, a reset code has been sent"))
}

pub async fn reset_password(
    State(state): State<AppState>,
    AppJson(body): AppJson<ResetPasswordRequest>,
) -> AppResult<Json<Value>> {
    AuthService::reset_password(&state.db, &body.email, &body.code, &body.new_password).await?;
    Ok(done("Password has been reset"))
}
