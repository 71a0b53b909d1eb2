use axum::{extract::State, Json};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    extract::{AppJson, AppPath, AppQuery},
    error::AppResult,
    models::{
        auth::AuthenticatedUser,
        message::PaginationQuery,
        notification::{NotificationQuery, RegisterDeviceTokenRequest, UnregisterDeviceTokenRequest},
    },
    routes::{done, envelope, ok},
    services::notifications::NotificationService,
    AppState,
};

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppQuery(q): AppQuery<NotificationQuery>,
) -> AppResult<Json<Value>> {
    let page = PaginationQuery { page: q.page, per_page: q.per_page };
    let unread_only = q.unread_only.unwrap_or(false);
    let notifications =
        NotificationService::list(&state.db, user.user_id, unread_only, page.offset(), page.per_page()).await?;
    let unread = NotificationService::unread_count(&state.db, user.user_id).await?;
    Ok(ok(json!({
        "notifications": notifications,
        "unreadCount": unread,
        "page": page.page.unwrap_or(1).max(1),
        "perPage": page.per_page(),
    })))
}

pub async fn unread_count(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    let count = NotificationService::unread_count(&state.db, user.user_id).await?;
    Ok(ok(json!({ "unreadCount": count })))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    let notification = NotificationService::mark_read(&state.db, user.user_id, id).await?;
    Ok(ok(json!({ "notification": notification })))
}

pub async fn mark_all_read(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<Value>> {
    let updated = NotificationService::mark_all_read(&state.db, user.user_id).await?;
    Ok(envelope(Some("All notifications marked as read"), json!({ "updated": updated })))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    NotificationService::delete(&state.db, user.user_id, id).await?;
    Ok(done("Notification deleted"))
}

pub async fn register_device_token(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<RegisterDeviceTokenRequest>,
) -> AppResult<Json<Value>> {
    let token = NotificationService::register_device_token(&state.db, user.user_id, &body.token, body.platform).await?;
    Ok(envelope(Some("Device token registered"), json!({ "deviceToken": token })))
}

pub async fn unregister_device_token(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<UnregisterDeviceTokenRequest>,
) -> AppResult<Json<Value>> {
    NotificationService::unregister_device_token(&state.db, user.user_id, &body.token).await?;
    Ok(done("Device token removed"))
}
