use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::{
    error::AppResult,
    models::{auth::AuthenticatedUser, user::UserRole},
    routes::ok,
    services::{dashboard::DashboardService, linkage::LinkageService, users::UserService},
    AppState,
};

pub async fn stats(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist])?;
    let stats = DashboardService::specialist(&state.db, user.user_id).await?;
    Ok(ok(json!({ "stats": stats })))
}

pub async fn linked_parents(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist])?;
    let parents = UserService::linked_parents(&state.db, user.user_id).await?;
    Ok(ok(json!({ "count": parents.len(), "parents": parents })))
}

pub async fn children(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist])?;
    let children = DashboardService::specialist_children(&state.db, user.user_id).await?;
    Ok(ok(json!({ "count": children.len(), "children": children })))
}

pub async fn referrals(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist])?;
    let referrals = LinkageService::referrals_for_specialist(&state.db, user.user_id).await?;
    Ok(ok(json!({ "referrals": referrals })))
}
