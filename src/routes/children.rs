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
        child::{CreateChildRequest, RequestSpecialistRequest, UpdateChildRequest},
        user::UserRole,
    },
    routes::{created, done, envelope, ok},
    services::{children::ChildService, linkage::LinkageService},
    AppState,
};

pub async fn list_children(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    let children = ChildService::list_for(&state.db, &user).await?;
    Ok(ok(json!({ "count": children.len(), "children": children })))
}

pub async fn create_child(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<CreateChildRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.require(&[UserRole::Parent])?;
    let child = ChildService::create(&state.db, user.user_id, &body).await?;
    Ok(created("Child created", json!({ "child": child })))
}

pub async fn get_child(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    let child = ChildService::get_visible(&state.db, &user, id).await?;
    Ok(ok(json!({ "child": child })))
}

pub async fn update_child(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<UpdateChildRequest>,
) -> AppResult<Json<Value>> {
    let child = ChildService::update(&state.db, &user, id, &body).await?;
    Ok(ok(json!({ "child": child })))
}

pub async fn delete_child(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Parent])?;
    ChildService::delete(&state.db, &user, id).await?;
    Ok(done("Child deleted"))
}

/// Put the child in a specialist's pending queue.
pub async fn request_specialist(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<RequestSpecialistRequest>,
) -> AppResult<Json<Value>> {
    user.require(&[UserRole::Parent])?;
    let child =
        LinkageService::request_specialist(&state.db, &state.outbox, user.user_id, id, body.specialist_id).await?;
    Ok(envelope(Some("Request sent to specialist"), json!({ "child": child })))
}
