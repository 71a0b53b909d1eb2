use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::{
    error::{AppError, AppResult},
    models::auth::AuthenticatedUser,
    routes::created,
    services::upload::UploadService,
    AppState,
};

/// Takes the first file field of the form. Only the returned path is meant
/// to be stored on other records.
pub async fn upload_image(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let mut multipart = multipart?;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.to_string()))?
    {
        if field.file_name().is_none() {
            continue;
        }
        let data = field.bytes().await.map_err(|e| AppError::validation(e.to_string()))?;
        let path = UploadService::store_image(&state.config.media_dir, &data).await?;
        return Ok(created("Image uploaded", json!({ "url": path, "path": path })));
    }

    Err(AppError::validation("No file provided"))
}
