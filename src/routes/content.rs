//! `/content` serves both collections; `/words` is the same store pinned to
//! the word collection for older clients.

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
        exercise::{AddContentRequest, AddWordRequest, ContentFilter, ContentType, Difficulty},
    },
    routes::{created, done, ok},
    services::content::{AddItem, ContentService},
    AppState,
};

pub async fn add_content(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<AddContentRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let item = ContentService::add_item(
        &state.db,
        &user,
        AddItem {
            child_id: body.child_id,
            content_type: body.content_type,
            text: body.text,
            difficulty: body.difficulty,
            image: body.image,
        },
    )
    .await?;
    Ok(created("Content added", json!({ "content": item })))
}

pub async fn list_content(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(child_id): AppPath<Uuid>,
    AppQuery(filter): AppQuery<ContentFilter>,
) -> AppResult<Json<Value>> {
    let items = ContentService::list(&state.db, &user, child_id, &filter).await?;
    Ok(ok(json!({ "count": items.len(), "content": items })))
}

pub async fn delete_content(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    ContentService::delete_item(&state.db, &user, id).await?;
    Ok(done("Content deleted"))
}

// ─── /words ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WordFilter {
    pub difficulty: Option<Difficulty>,
}

pub async fn add_word(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<AddWordRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let word = ContentService::add_item(
        &state.db,
        &user,
        AddItem {
            child_id: body.child_id,
            content_type: ContentType::Word,
            text: body.text,
            difficulty: body.difficulty,
            image: body.image,
        },
    )
    .await?;
    Ok(created("Word added", json!({ "word": word })))
}

pub async fn list_words(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(child_id): AppPath<Uuid>,
    AppQuery(q): AppQuery<WordFilter>,
) -> AppResult<Json<Value>> {
    let filter = ContentFilter { difficulty: q.difficulty, content_type: Some(ContentType::Word) };
    let words = ContentService::list(&state.db, &user, child_id, &filter).await?;
    Ok(ok(json!({ "count": words.len(), "words": words })))
}

pub async fn delete_word(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<Json<Value>> {
    ContentService::delete_item(&state.db, &user, id).await?;
    Ok(done("Word deleted"))
}
