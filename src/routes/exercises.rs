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
        exercise::{CreatePlanRequest, UpdatePlanRequest},
        user::UserRole,
    },
    routes::{created, done, ok},
    services::exercises::ExerciseService,
    AppState,
};

pub async fn create_plan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<CreatePlanRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    user.require(&[UserRole::Specialist])?;
    let plan = ExerciseService::create(&state.db, &user, &body).await?;
    Ok(created("Exercise plan created", json!({ "exercise": plan })))
}

pub async fn list_for_child(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(child_id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    let plans = ExerciseService::list_for_child(&state.db, &user, child_id).await?;
    Ok(ok(json!({ "count": plans.len(), "exercises": plans })))
}

pub async fn get_plan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    let plan = ExerciseService::get(&state.db, &user, id).await?;
    Ok(ok(json!({ "exercise": plan })))
}

pub async fn update_plan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<UpdatePlanRequest>,
) -> AppResult<Json<Value>> {
    let plan = ExerciseService::update(&state.db, &user, id, &body).await?;
    Ok(ok(json!({ "exercise": plan })))
}

pub async fn delete_plan(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    ExerciseService::delete(&state.db, &user, id).await?;
    Ok(done("Exercise plan deleted"))
}
