use chrono::Utc;
use serde_json::json;
use sqlx::{types::Json, PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        exercise::{ContentDocument, ContentFilter, ContentType, Difficulty, LegacyContentView, NewContentItem},
    },
    services::{
        children::{can_manage_content, ChildService},
        metrics::CONTENT_COUNTER,
    },
};

const DOCUMENT_COLS: &str = "id, child_id, content_words, content_letters, created_at, updated_at";

/// Input for [`ContentService::add_item`], shared by `/content` and `/words`.
#[derive(Debug, Clone)]
pub struct AddItem {
    pub child_id: Uuid,
    pub content_type: ContentType,
    pub text: String,
    pub difficulty: Difficulty,
    pub image: Option<String>,
}

pub struct ContentService;

impl ContentService {
    /// Return the child's content document, creating it on first use. The
    /// partial unique index on `(child_id) WHERE kind = 'content'` keeps
    /// concurrent first writes down to a single row.
    pub async fn get_or_create(conn: &mut PgConnection, child_id: Uuid, created_by: Uuid) -> AppResult<ContentDocument> {
        sqlx::query(
            "INSERT INTO exercises (child_id, kind, created_by)
             VALUES ($1, 'content', $2)
             ON CONFLICT (child_id) WHERE kind = 'content' DO NOTHING",
        )
        .bind(child_id)
        .bind(created_by)
        .execute(&mut *conn)
        .await?;

        let doc = sqlx::query_as::<_, ContentDocument>(&format!(
            "SELECT {DOCUMENT_COLS} FROM exercises
             WHERE child_id = $1 AND kind = 'content'
             FOR UPDATE"
        ))
        .bind(child_id)
        .fetch_one(&mut *conn)
        .await?;
        Ok(doc)
    }

    async fn save(conn: &mut PgConnection, doc: &ContentDocument) -> AppResult<()> {
        sqlx::query(
            "UPDATE exercises
             SET content_words = $1, content_letters = $2, updated_at = NOW()
             WHERE id = $3",
        )
        .bind(&doc.content_words)
        .bind(&doc.content_letters)
        .bind(doc.id)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn add_item(pool: &PgPool, user: &AuthenticatedUser, input: AddItem) -> AppResult<LegacyContentView> {
        let child = ChildService::get_manageable(pool, user, input.child_id).await?;

        let mut tx = pool.begin().await?;
        let mut doc = Self::get_or_create(&mut tx, child.id, user.user_id).await?;
        let item = doc.add_item(
            input.content_type,
            NewContentItem {
                text: input.text,
                difficulty: input.difficulty,
                image: input.image,
                created_by: user.user_id,
                created_at: Utc::now(),
            },
        )?;
        Self::save(&mut tx, &doc).await?;
        tx.commit().await?;

        CONTENT_COUNTER.with_label_values(&[input.content_type.as_str(), "added"]).inc();
        tracing::info!(child = %child.id, item = %item.id, kind = input.content_type.as_str(), "content item added");
        Ok(LegacyContentView::project(child.id, input.content_type, &item))
    }

    /// Delete an item by its nested id, wherever it lives.
    pub async fn delete_item(pool: &PgPool, user: &AuthenticatedUser, item_id: Uuid) -> AppResult<()> {
        let needle = Json(json!([{ "id": item_id }]));

        let mut tx = pool.begin().await?;
        let mut doc = sqlx::query_as::<_, ContentDocument>(&format!(
            "SELECT {DOCUMENT_COLS} FROM exercises
             WHERE kind = 'content' AND (content_words @> $1 OR content_letters @> $1)
             FOR UPDATE"
        ))
        .bind(&needle)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Content item not found"))?;

        let child = ChildService::get(&mut *tx, doc.child_id).await?;
        if !can_manage_content(user, &child) {
            return Err(AppError::forbidden("Only the assigned specialist can manage this child"));
        }

        let (kind, _) = doc
            .remove_item(item_id)
            .ok_or_else(|| AppError::not_found("Content item not found"))?;
        Self::save(&mut tx, &doc).await?;
        tx.commit().await?;

        CONTENT_COUNTER.with_label_values(&[kind.as_str(), "deleted"]).inc();
        tracing::info!(child = %doc.child_id, item = %item_id, "content item deleted");
        Ok(())
    }

    /// Flat list of a child's library. A child without a document yet has
    /// an empty library.
    pub async fn list(
        pool: &PgPool,
        user: &AuthenticatedUser,
        child_id: Uuid,
        filter: &ContentFilter,
    ) -> AppResult<Vec<LegacyContentView>> {
        let child = ChildService::get_visible(pool, user, child_id).await?;
        let doc = sqlx::query_as::<_, ContentDocument>(&format!(
            "SELECT {DOCUMENT_COLS} FROM exercises WHERE child_id = $1 AND kind = 'content'"
        ))
        .bind(child.id)
        .fetch_optional(pool)
        .await?;
        Ok(doc.map(|d| d.legacy_view(filter)).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{child::Assignment, user::UserRole},
        services::fixtures,
    };

    fn word(child_id: Uuid, text: &str) -> AddItem {
        AddItem {
            child_id,
            content_type: ContentType::Word,
            text: text.into(),
            difficulty: Difficulty::Easy,
            image: None,
        }
    }

    async fn document_count(pool: &PgPool, child_id: Uuid) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM exercises WHERE child_id = $1 AND kind = 'content'")
            .bind(child_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn concurrent_first_writes_share_one_document(pool: PgPool) {
        let parent = fixtures::user(&pool, UserRole::Parent).await;
        let specialist = fixtures::user(&pool, UserRole::Specialist).await;
        let child = fixtures::child(&pool, parent.id, Assignment::approved(specialist.id)).await;

        let mut a = pool.acquire().await.unwrap();
        let mut b = pool.acquire().await.unwrap();
        let (first, second) = tokio::join!(
            ContentService::get_or_create(&mut a, child.id, specialist.id),
            ContentService::get_or_create(&mut b, child.id, specialist.id),
        );

        assert_eq!(first.unwrap().id, second.unwrap().id);
        assert_eq!(document_count(&pool, child.id).await, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn duplicate_text_is_scoped_to_one_child(pool: PgPool) {
        let specialist = fixtures::user(&pool, UserRole::Specialist).await;
        let actor = fixtures::principal(&specialist);
        let parent = fixtures::user(&pool, UserRole::Parent).await;
        let noor = fixtures::child(&pool, parent.id, Assignment::approved(specialist.id)).await;
        let adam = fixtures::child(&pool, parent.id, Assignment::approved(specialist.id)).await;

        ContentService::add_item(&pool, &actor, word(noor.id, "تفاحة")).await.unwrap();
        ContentService::add_item(&pool, &actor, word(adam.id, "تفاحة")).await.unwrap();

        let repeat = ContentService::add_item(&pool, &actor, word(noor.id, "تفاحة")).await;
        assert!(matches!(repeat, Err(AppError::Conflict(_))));

        let listed = ContentService::list(&pool, &actor, noor.id, &ContentFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(document_count(&pool, noor.id).await, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn only_the_assigned_specialist_deletes_items(pool: PgPool) {
        let specialist = fixtures::user(&pool, UserRole::Specialist).await;
        let actor = fixtures::principal(&specialist);
        let parent = fixtures::user(&pool, UserRole::Parent).await;
        let noor = fixtures::child(&pool, parent.id, Assignment::approved(specialist.id)).await;

        let item = ContentService::add_item(&pool, &actor, word(noor.id, "قمر")).await.unwrap();

        let by_parent = ContentService::delete_item(&pool, &fixtures::principal(&parent), item.id).await;
        assert!(matches!(by_parent, Err(AppError::Forbidden(_))));

        ContentService::delete_item(&pool, &actor, item.id).await.unwrap();
        let listed = ContentService::list(&pool, &actor, noor.id, &ContentFilter::default()).await.unwrap();
        assert!(listed.is_empty());

        let gone = ContentService::delete_item(&pool, &actor, item.id).await;
        assert!(matches!(gone, Err(AppError::NotFound(_))));
    }
}
