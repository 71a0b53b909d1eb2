use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    extract::{AppJson, AppPath, AppQuery},
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        message::{EditMessageRequest, PaginationQuery, SendMessageRequest},
    },
    routes::{created, done, envelope, ok},
    services::messages::MessageService,
    AppState,
};

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let message =
        MessageService::send(&state.db, &state.outbox, user.user_id, body.receiver_id, &body.content).await?;
    Ok(created("Message sent", json!({ "message": message })))
}

pub async fn get_conversations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Value>> {
    let conversations = MessageService::conversations(&state.db, user.user_id).await?;
    Ok(ok(json!({ "conversations": conversations })))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(other_id): AppPath<Uuid>,
    AppQuery(page): AppQuery<PaginationQuery>,
) -> AppResult<Json<Value>> {
    let messages =
        MessageService::conversation(&state.db, user.user_id, other_id, page.offset(), page.per_page()).await?;
    Ok(ok(json!({
        "page": page.page.unwrap_or(1).max(1),
        "perPage": page.per_page(),
        "messages": messages,
    })))
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(other_id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    let updated = MessageService::mark_conversation_read(&state.db, user.user_id, other_id).await?;
    Ok(envelope(Some("Conversation marked as read"), json!({ "updated": updated })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    let message = MessageService::mark_read(&state.db, user.user_id, id).await?;
    Ok(ok(json!({ "message": message })))
}

pub async fn edit_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(body): AppJson<EditMessageRequest>,
) -> AppResult<Json<Value>> {
    let message = MessageService::edit(&state.db, &state.outbox, user.user_id, id, &body.content).await?;
    Ok(ok(json!({ "message": message })))
}

pub async fn delete_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    MessageService::delete(&state.db, &state.outbox, user.user_id, id).await?;
    Ok(done("Message deleted"))
}

pub async fn unread_count(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    let count = MessageService::unread_count(&state.db, user.user_id).await?;
    Ok(ok(json!({ "unreadCount": count })))
}
