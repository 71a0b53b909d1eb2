use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    extract::{AppJson, AppPath, AppQuery},
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        linkage::{CreateFamilyRequest, LinkRequestStatus},
        user::UserRole,
    },
    routes::{created, envelope, ok},
    services::{children::ChildService, linkage::LinkageService},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct LinkRequestFilter {
    pub status: Option<LinkRequestStatus>,
}

/// Path A: register a parent (or reuse one) together with an assigned child.
pub async fn create_family(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<CreateFamilyRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.require(&[UserRole::Specialist])?;
    let login_url = format!("{}/login", state.config.app_base_url.trim_end_matches('/'));
    let family = LinkageService::create_family(&state.db, &state.outbox, &login_url, user.user_id, body).await?;
    Ok(created(
        "Parent and child created",
        json!({
            "parent": family.parent,
            "child": family.child,
            "parentCreated": family.parent_created,
        }),
    ))
}

pub async fn list_link_requests(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppQuery(filter): AppQuery<LinkRequestFilter>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist])?;
    let requests = LinkageService::requests_for_specialist(&state.db, user.user_id, filter.status).await?;
    Ok(ok(json!({ "count": requests.len(), "requests": requests })))
}

pub async fn accept_link_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist])?;
    let request = LinkageService::respond_link_request(&state.db, &state.outbox, user.user_id, id, true).await?;
    Ok(envelope(Some("Link request accepted"), json!({ "request": request })))
}

pub async fn reject_link_request(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist])?;
    let request = LinkageService::respond_link_request(&state.db, &state.outbox, user.user_id, id, false).await?;
    Ok(envelope(Some("Link request rejected"), json!({ "request": request })))
}

pub async fn pending_children(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist])?;
    let children = ChildService::list_pending_for(&state.db, user.user_id).await?;
    Ok(ok(json!({ "count": children.len(), "children": children })))
}

/// Queue decisions are open to admins too; the service checks the center.
pub async fn accept_pending_child(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(child_id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist, UserRole::Admin])?;
    let child = LinkageService::respond_queue(&state.db, &state.outbox, &user, child_id, true).await?;
    Ok(envelope(Some("Child accepted"), json!({ "child": child })))
}

pub async fn reject_pending_child(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(child_id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Specialist, UserRole::Admin])?;
    let child = LinkageService::respond_queue(&state.db, &state.outbox, &user, child_id, false).await?;
    Ok(envelope(Some("Child request rejected"), json!({ "child": child })))
}
