use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use crate::error::AppError;

/// Letters allow a base letter plus one vowel mark (e.g. "بَ").
pub const MAX_LETTER_CHARS: usize = 2;
pub const MAX_WORD_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Word,
    Letter,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Word => "word",
            ContentType::Letter => "letter",
        }
    }

    fn max_chars(&self) -> usize {
        match self {
            ContentType::Word => MAX_WORD_CHARS,
            ContentType::Letter => MAX_LETTER_CHARS,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ContentType::Word => "Word",
            ContentType::Letter => "Letter",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
}

/// One entry of a child's word or letter library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: Uuid,
    pub text: String,
    pub difficulty: Difficulty,
    pub image: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Trim and bound-check item text. Lengths count Unicode scalar values so
/// Arabic letters with diacritics are measured the way they are typed.
pub fn normalize_content_text(kind: ContentType, raw: &str) -> Result<String, AppError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(AppError::validation(format!("{} text is required", kind.label())));
    }
    let chars = text.chars().count();
    if chars > kind.max_chars() {
        return Err(AppError::validation(format!(
            "{} must be at most {} characters",
            kind.label(),
            kind.max_chars()
        )));
    }
    Ok(text.to_string())
}

/// The per-child content library (`kind = 'content'`).
#[derive(Debug, Clone, FromRow)]
pub struct ContentDocument {
    pub id: Uuid,
    pub child_id: Uuid,
    pub content_words: Json<Vec<ContentItem>>,
    pub content_letters: Json<Vec<ContentItem>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContentDocument {
    fn collection(&self, kind: ContentType) -> &Vec<ContentItem> {
        match kind {
            ContentType::Word => &self.content_words.0,
            ContentType::Letter => &self.content_letters.0,
        }
    }

    fn collection_mut(&mut self, kind: ContentType) -> &mut Vec<ContentItem> {
        match kind {
            ContentType::Word => &mut self.content_words.0,
            ContentType::Letter => &mut self.content_letters.0,
        }
    }

    /// Append an item, rejecting text already present in the same collection.
    pub fn add_item(&mut self, kind: ContentType, item: NewContentItem) -> Result<ContentItem, AppError> {
        let text = normalize_content_text(kind, &item.text)?;
        if self.collection(kind).iter().any(|existing| existing.text.trim() == text) {
            return Err(AppError::conflict(format!("{} \"{}\" already exists", kind.label(), text)));
        }
        let entry = ContentItem {
            id: Uuid::new_v4(),
            text,
            difficulty: item.difficulty,
            image: item.image,
            created_by: item.created_by,
            created_at: item.created_at,
        };
        self.collection_mut(kind).push(entry.clone());
        Ok(entry)
    }

    /// Remove the item with `id` from whichever collection holds it.
    pub fn remove_item(&mut self, id: Uuid) -> Option<(ContentType, ContentItem)> {
        for kind in [ContentType::Word, ContentType::Letter] {
            let items = self.collection_mut(kind);
            if let Some(pos) = items.iter().position(|i| i.id == id) {
                return Some((kind, items.remove(pos)));
            }
        }
        None
    }

    /// Flatten into the per-item shape older clients expect, newest first.
    pub fn legacy_view(&self, filter: &ContentFilter) -> Vec<LegacyContentView> {
        let mut out: Vec<LegacyContentView> = [ContentType::Word, ContentType::Letter]
            .into_iter()
            .filter(|kind| filter.content_type.map_or(true, |wanted| wanted == *kind))
            .flat_map(|kind| {
                self.collection(kind)
                    .iter()
                    .filter(|item| filter.difficulty.map_or(true, |d| d == item.difficulty))
                    .map(move |item| LegacyContentView::project(self.child_id, kind, item))
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}

pub struct NewContentItem {
    pub text: String,
    pub difficulty: Difficulty,
    pub image: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Flat projection kept for clients written against per-item documents.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyContentView {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub text: String,
    pub content_type: ContentType,
    pub difficulty: Difficulty,
    pub image: Option<String>,
    pub child: Uuid,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl LegacyContentView {
    pub fn project(child: Uuid, kind: ContentType, item: &ContentItem) -> Self {
        Self {
            id: item.id,
            text: item.text.clone(),
            content_type: kind,
            difficulty: item.difficulty,
            image: item.image.clone(),
            child,
            created_by: item.created_by,
            created_at: item.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFilter {
    pub difficulty: Option<Difficulty>,
    #[serde(rename = "type")]
    pub content_type: Option<ContentType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddContentRequest {
    pub child_id: Uuid,
    pub text: String,
    #[serde(rename = "type", alias = "contentType")]
    pub content_type: ContentType,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddWordRequest {
    pub child_id: Uuid,
    pub text: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub image: Option<String>,
}

// ─── Plans ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanLetter {
    pub letter: String,
    /// Place of articulation, e.g. "bilabial".
    pub articulation_point: Option<String>,
    pub vowels: Option<Vec<String>>,
    pub repetitions: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanWord {
    pub word: String,
    pub target_letter: Option<String>,
    pub position: Option<String>,
    pub image: Option<String>,
    pub repetitions: Option<u32>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExercisePlan {
    pub id: Uuid,
    #[serde(rename = "child")]
    pub child_id: Uuid,
    pub created_by: Option<Uuid>,
    pub title: Option<String>,
    pub letters: Json<Vec<PlanLetter>>,
    pub words: Json<Vec<PlanWord>>,
    pub target_duration: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    pub child_id: Uuid,
    pub title: Option<String>,
    #[serde(default)]
    pub letters: Vec<PlanLetter>,
    #[serde(default)]
    pub words: Vec<PlanWord>,
    pub target_duration: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlanRequest {
    pub title: Option<String>,
    pub letters: Option<Vec<PlanLetter>>,
    pub words: Option<Vec<PlanWord>>,
    pub target_duration: Option<i32>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
}

pub fn validate_plan_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    target_duration: Option<i32>,
) -> Result<(), AppError> {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            return Err(AppError::validation("End date must not be before start date"));
        }
    }
    if let Some(minutes) = target_duration {
        if minutes <= 0 {
            return Err(AppError::validation("Target duration must be positive"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn empty_doc(child: Uuid) -> ContentDocument {
        ContentDocument {
            id: Uuid::new_v4(),
            child_id: child,
            content_words: Json(vec![]),
            content_letters: Json(vec![]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn new_item(text: &str, difficulty: Difficulty, at: DateTime<Utc>) -> NewContentItem {
        NewContentItem {
            text: text.into(),
            difficulty,
            image: None,
            created_by: Uuid::nil(),
            created_at: at,
        }
    }

    #[test]
    fn duplicate_word_is_rejected_per_child() {
        let now = Utc::now();
        let mut x = empty_doc(Uuid::new_v4());
        let mut y = empty_doc(Uuid::new_v4());

        x.add_item(ContentType::Word, new_item("تفاحة", Difficulty::Easy, now)).unwrap();
        let again = x.add_item(ContentType::Word, new_item("تفاحة", Difficulty::Hard, now));
        assert!(matches!(again, Err(AppError::Conflict(_))));
        assert!(y.add_item(ContentType::Word, new_item("تفاحة", Difficulty::Easy, now)).is_ok());
        assert_eq!(x.content_words.0.len(), 1);
    }

    #[test]
    fn duplicate_check_uses_trimmed_text_and_is_case_sensitive() {
        let now = Utc::now();
        let mut doc = empty_doc(Uuid::new_v4());
        doc.add_item(ContentType::Word, new_item("Ball", Difficulty::Easy, now)).unwrap();
        assert!(doc.add_item(ContentType::Word, new_item("  Ball ", Difficulty::Easy, now)).is_err());
        assert!(doc.add_item(ContentType::Word, new_item("ball", Difficulty::Easy, now)).is_ok());
    }

    #[test]
    fn words_and_letters_are_separate_collections() {
        let now = Utc::now();
        let mut doc = empty_doc(Uuid::new_v4());
        doc.add_item(ContentType::Letter, new_item("ب", Difficulty::Easy, now)).unwrap();
        assert!(doc.add_item(ContentType::Word, new_item("ب", Difficulty::Easy, now)).is_ok());
        assert_eq!(doc.content_letters.0.len(), 1);
        assert_eq!(doc.content_words.0.len(), 1);
    }

    #[test]
    fn letter_accepts_base_plus_vowel_mark() {
        assert_eq!(normalize_content_text(ContentType::Letter, " بَ ").unwrap(), "بَ");
        assert!(normalize_content_text(ContentType::Letter, "بَا").is_err());
        assert!(normalize_content_text(ContentType::Letter, "   ").is_err());
    }

    #[test]
    fn word_length_is_bounded() {
        assert!(normalize_content_text(ContentType::Word, &"a".repeat(20)).is_ok());
        assert!(matches!(
            normalize_content_text(ContentType::Word, &"a".repeat(21)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn remove_item_finds_it_in_either_collection() {
        let now = Utc::now();
        let mut doc = empty_doc(Uuid::new_v4());
        let letter = doc.add_item(ContentType::Letter, new_item("س", Difficulty::Medium, now)).unwrap();
        doc.add_item(ContentType::Word, new_item("سمكة", Difficulty::Medium, now)).unwrap();

        let (kind, removed) = doc.remove_item(letter.id).unwrap();
        assert_eq!(kind, ContentType::Letter);
        assert_eq!(removed.text, "س");
        assert!(doc.content_letters.0.is_empty());
        assert!(doc.remove_item(letter.id).is_none());
    }

    #[test]
    fn legacy_view_sorts_newest_first_and_filters() {
        let base = Utc::now();
        let child = Uuid::new_v4();
        let mut doc = empty_doc(child);
        doc.add_item(ContentType::Word, new_item("قطة", Difficulty::Easy, base)).unwrap();
        doc.add_item(ContentType::Letter, new_item("ق", Difficulty::Hard, base + Duration::seconds(5))).unwrap();
        doc.add_item(ContentType::Word, new_item("قمر", Difficulty::Hard, base + Duration::seconds(10))).unwrap();

        let all = doc.legacy_view(&ContentFilter::default());
        let texts: Vec<&str> = all.iter().map(|v| v.text.as_str()).collect();
        assert_eq!(texts, vec!["قمر", "ق", "قطة"]);
        assert!(all.iter().all(|v| v.child == child));

        let hard = doc.legacy_view(&ContentFilter { difficulty: Some(Difficulty::Hard), content_type: None });
        assert_eq!(hard.len(), 2);

        let hard_words = doc.legacy_view(&ContentFilter {
            difficulty: Some(Difficulty::Hard),
            content_type: Some(ContentType::Word),
        });
        assert_eq!(hard_words.len(), 1);
        assert_eq!(hard_words[0].content_type, ContentType::Word);
    }

    #[test]
    fn legacy_view_serializes_underscore_id() {
        let mut doc = empty_doc(Uuid::new_v4());
        doc.add_item(ContentType::Word, new_item("موز", Difficulty::Easy, Utc::now())).unwrap();
        let json = serde_json::to_value(&doc.legacy_view(&ContentFilter::default())[0]).unwrap();
        assert!(json.get("_id").is_some());
        assert_eq!(json["contentType"], "word");
        assert_eq!(json["difficulty"], "easy");
    }

    #[test]
    fn plan_window_must_be_ordered() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(validate_plan_window(Some(start), Some(end), None).is_err());
        assert!(validate_plan_window(Some(end), Some(start), Some(20)).is_ok());
        assert!(validate_plan_window(None, None, Some(0)).is_err());
    }
}
