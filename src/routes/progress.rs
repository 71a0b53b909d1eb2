use axum::{extract::State, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    extract::{AppJson, AppPath, AppQuery},
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        progress::{clamp_attempts_limit, AppendSessionRequest, AttemptsQuery, SyncRequest},
    },
    routes::{envelope, ok},
    services::progress::{Entry, ProgressService},
    AppState,
};

pub async fn append_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<AppendSessionRequest>,
) -> AppResult<Json<Value>> {
    let summary =
        ProgressService::record(&state.db, &state.outbox, &user, body.child_id, vec![body.session], Entry::Append)
            .await?;
    Ok(envelope(Some("Session recorded"), json!({ "progress": summary })))
}

/// Batch upload from the training app after it was offline.
pub async fn sync(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<SyncRequest>,
) -> AppResult<Json<Value>> {
    let count = body.sessions.len();
    let summary =
        ProgressService::record(&state.db, &state.outbox, &user, body.child_id, body.sessions, Entry::Sync).await?;
    Ok(envelope(Some("Progress synced"), json!({ "synced": count, "progress": summary })))
}

pub async fn stats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(child_id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    let summary = ProgressService::stats(&state.db, &user, child_id).await?;
    Ok(ok(json!({
        "stats": summary.overall_stats,
        "lastSyncDate": summary.last_sync_date,
    })))
}

pub async fn sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(child_id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    let sessions = ProgressService::sessions(&state.db, &user, child_id).await?;
    Ok(ok(json!({ "count": sessions.len(), "sessions": sessions })))
}

pub async fn attempts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(child_id): AppPath<Uuid>,
    AppQuery(q): AppQuery<AttemptsQuery>,
) -> AppResult<Json<Value>> {
    let limit = clamp_attempts_limit(q.limit.as_deref());
    let attempts = ProgressService::attempts(&state.db, &user, child_id, limit).await?;
    Ok(ok(json!({ "count": attempts.len(), "limit": limit, "attempts": attempts })))
}
