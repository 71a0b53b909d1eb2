use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    extract::{AppJson, AppQuery},
    error::AppResult,
    models::{auth::AuthenticatedUser, linkage::CreateLinkRequest, user::{UserProfile, UserRole}},
    routes::{created, envelope, ok},
    services::{linkage::LinkageService, users::UserService},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct SpecialistSearch {
    pub search: Option<String>,
}

/// The parent's linked specialist, or `null` when unlinked.
pub async fn my_specialist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Parent])?;
    let parent = UserService::get(&state.db, user.user_id).await?;
    let specialist = match parent.linked_specialist_id {
        Some(id) => Some(UserProfile::from(UserService::get_with_role(&state.db, id, UserRole::Specialist).await?)),
        None => None,
    };
    Ok(ok(json!({ "specialist": specialist })))
}

pub async fn browse_specialists(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppQuery(q): AppQuery<SpecialistSearch>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Parent])?;
    let specialists = UserService::list_specialists(&state.db, q.search.as_deref(), None).await?;
    Ok(ok(json!({ "count": specialists.len(), "specialists": specialists })))
}

pub async fn create_link_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<CreateLinkRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.require(&[UserRole::Parent])?;
    let request = LinkageService::create_link_request(&state.db, &state.outbox, user.user_id, &body).await?;
    Ok(created("Link request sent", json!({ "request": request })))
}

pub async fn list_link_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Parent])?;
    let requests = LinkageService::requests_for_parent(&state.db, user.user_id).await?;
    Ok(ok(json!({ "requests": requests })))
}

pub async fn unlink(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Parent])?;
    let released = LinkageService::unlink(&state.db, &state.outbox, user.user_id).await?;
    Ok(envelope(Some("Unlinked from specialist"), json!({ "unassignedChildren": released })))
}
