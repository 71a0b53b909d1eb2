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
        center::CreateStaffRequest,
        linkage::AssignChildRequest,
        user::UserRole,
    },
    routes::{created, done, envelope, ok},
    services::{centers::CenterService, dashboard::DashboardService, linkage::LinkageService},
    AppState,
};

pub async fn create_specialist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<CreateStaffRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.require(&[UserRole::Admin])?;
    let specialist = CenterService::create_specialist(&state.db, user.user_id, body).await?;
    Ok(created("Specialist created", json!({ "specialist": specialist })))
}

pub async fn list_specialists(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Admin])?;
    let specialists = CenterService::list_specialists(&state.db, user.user_id).await?;
    Ok(ok(json!({ "count": specialists.len(), "specialists": specialists })))
}

pub async fn remove_specialist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Admin])?;
    CenterService::remove_specialist(&state.db, user.user_id, id).await?;
    Ok(done("Specialist removed from center"))
}

pub async fn assign_child(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<AssignChildRequest>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Admin])?;
    let child =
        LinkageService::admin_assign(&state.db, &state.outbox, user.user_id, body.child_id, body.specialist_id)
            .await?;
    Ok(envelope(Some("Child assigned to specialist"), json!({ "child": child })))
}

pub async fn stats(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Admin])?;
    let center_id = CenterService::center_of(&state.db, user.user_id).await?;
    let stats = DashboardService::center(&state.db, center_id).await?;
    Ok(ok(json!({ "centerId": center_id, "stats": stats })))
}
