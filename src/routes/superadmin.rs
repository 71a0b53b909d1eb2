use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    extract::{AppJson, AppPath},
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        center::{AssignAdminRequest, CreateCenterRequest, CreateStaffRequest, UpdateCenterRequest},
        user::UserRole,
    },
    routes::{created, done, envelope, ok},
    services::{centers::CenterService, dashboard::DashboardService},
    AppState,
};

fn require_superadmin(user: &AuthenticatedUser) -> AppResult<()> {
    user.require(&[UserRole::SuperAdmin])
}

pub async fn list_centers(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    require_superadmin(&user)?;
    let centers = CenterService::list(&state.db).await?;
    Ok(ok(json!({ "count": centers.len(), "centers": centers })))
}

pub async fn create_center(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<CreateCenterRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_superadmin(&user)?;
    let center = CenterService::create(&state.db, &body).await?;
    Ok(created("Center created", json!({ "center": center })))
}

pub async fn get_center(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    require_superadmin(&user)?;
    let center = CenterService::get(&state.db, id).await?;
    Ok(ok(json!({ "center": center })))
}

pub async fn update_center(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<UpdateCenterRequest>,
) -> AppResult<Json<Value>> {
    require_superadmin(&user)?;
    let center = CenterService::update(&state.db, id, &body).await?;
    Ok(ok(json!({ "center": center })))
}

pub async fn delete_center(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    require_superadmin(&user)?;
    CenterService::delete(&state.db, id).await?;
    Ok(done("Center deleted"))
}

pub async fn assign_admin(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(center_id): AppPath<Uuid>,
    AppJson(body): AppJson<AssignAdminRequest>,
) -> AppResult<Json<Value>> {
    require_superadmin(&user)?;
    let center = CenterService::assign_admin(&state.db, center_id, body.admin_id).await?;
    Ok(envelope(Some("Admin assigned to center"), json!({ "center": center })))
}

pub async fn list_admins(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    require_superadmin(&user)?;
    let admins = CenterService::list_admins(&state.db).await?;
    Ok(ok(json!({ "count": admins.len(), "admins": admins })))
}

pub async fn create_admin(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<CreateStaffRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    require_superadmin(&user)?;
    let admin = CenterService::create_admin(&state.db, body).await?;
    Ok(created("Admin created", json!({ "admin": admin })))
}

pub async fn delete_admin(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    require_superadmin(&user)?;
    CenterService::delete_admin(&state.db, id).await?;
    Ok(done("Admin deleted"))
}

pub async fn stats(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    require_superadmin(&user)?;
    let stats = DashboardService::platform(&state.db).await?;
    Ok(ok(json!({ "stats": stats })))
}
