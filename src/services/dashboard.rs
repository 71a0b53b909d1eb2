use std::collections::HashMap;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        center::{CenterStats, PlatformStats, SpecialistStats},
        child::Child,
        progress::{OverallStats, ProgressSummary},
    },
    services::{children::ChildService, progress::ProgressService},
};

/// An assigned child with its progress rollup, for the specialist portal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildWithProgress {
    #[serde(flatten)]
    pub child: Child,
    pub progress: OverallStats,
    pub last_sync_date: Option<chrono::DateTime<chrono::Utc>>,
}

fn attach_progress(children: Vec<Child>, summaries: Vec<ProgressSummary>) -> Vec<ChildWithProgress> {
    let mut by_child: HashMap<Uuid, ProgressSummary> =
        summaries.into_iter().map(|s| (s.child_id, s)).collect();
    children
        .into_iter()
        .map(|child| {
            let summary = by_child.remove(&child.id);
            ChildWithProgress {
                progress: summary.as_ref().map(|s| s.overall_stats.clone()).unwrap_or_default(),
                last_sync_date: summary.and_then(|s| s.last_sync_date),
                child,
            }
        })
        .collect()
}

pub struct DashboardService;

impl DashboardService {
    pub async fn platform(pool: &PgPool) -> AppResult<PlatformStats> {
        let stats = sqlx::query_as::<_, PlatformStats>(
            "SELECT
                (SELECT COUNT(*) FROM centers) AS centers,
                (SELECT COUNT(*) FROM users WHERE role = 'admin') AS admins,
                (SELECT COUNT(*) FROM users WHERE role = 'specialist') AS specialists,
                (SELECT COUNT(*) FROM users WHERE role = 'parent') AS parents,
                (SELECT COUNT(*) FROM children) AS children,
                (SELECT COUNT(*) FROM children WHERE assigned_specialist_id IS NOT NULL) AS assigned_children,
                (SELECT COUNT(*) FROM link_requests WHERE status = 'pending')
                  + (SELECT COUNT(*) FROM children WHERE specialist_request_status = 'pending') AS pending_requests",
        )
        .fetch_one(pool)
        .await?;
        Ok(stats)
    }

    pub async fn center(pool: &PgPool, center_id: Uuid) -> AppResult<CenterStats> {
        let stats = sqlx::query_as::<_, CenterStats>(
            "WITH staff AS (
                 SELECT id FROM users WHERE role = 'specialist' AND center_id = $1
             )
             SELECT
                (SELECT COUNT(*) FROM staff) AS specialists,
                (SELECT COUNT(*) FROM users WHERE role = 'parent'
                   AND linked_specialist_id IN (SELECT id FROM staff)) AS linked_parents,
                (SELECT COUNT(*) FROM children
                   WHERE assigned_specialist_id IN (SELECT id FROM staff)) AS assigned_children,
                (SELECT COUNT(*) FROM link_requests
                   WHERE status = 'pending' AND to_specialist_id IN (SELECT id FROM staff))
                  + (SELECT COUNT(*) FROM children
                   WHERE specialist_request_status = 'pending'
                     AND requested_specialist_id IN (SELECT id FROM staff)) AS pending_requests,
                (SELECT COALESCE(SUM(
                     (SELECT COUNT(*) FROM jsonb_array_elements(p.sessions) s
                      WHERE (s->>'startedAt')::timestamptz > NOW() - INTERVAL '7 days')
                 ), 0)::BIGINT
                 FROM progress p
                 JOIN children c ON c.id = p.child_id
                 WHERE c.assigned_specialist_id IN (SELECT id FROM staff)) AS sessions_last_7_days",
        )
        .bind(center_id)
        .fetch_one(pool)
        .await?;
        Ok(stats)
    }

    pub async fn specialist(pool: &PgPool, specialist_id: Uuid) -> AppResult<SpecialistStats> {
        let stats = sqlx::query_as::<_, SpecialistStats>(
            "SELECT
                (SELECT COUNT(*) FROM users WHERE role = 'parent' AND linked_specialist_id = $1) AS linked_parents,
                (SELECT COUNT(*) FROM children WHERE assigned_specialist_id = $1) AS assigned_children,
                (SELECT COUNT(*) FROM link_requests
                   WHERE to_specialist_id = $1 AND status = 'pending') AS pending_link_requests,
                (SELECT COUNT(*) FROM children
                   WHERE requested_specialist_id = $1 AND specialist_request_status = 'pending') AS pending_queue,
                (SELECT COUNT(*) FROM messages WHERE receiver_id = $1 AND is_read = FALSE) AS unread_messages",
        )
        .bind(specialist_id)
        .fetch_one(pool)
        .await?;
        Ok(stats)
    }

    pub async fn specialist_children(pool: &PgPool, specialist_id: Uuid) -> AppResult<Vec<ChildWithProgress>> {
        let children = ChildService::list_assigned(pool, specialist_id).await?;
        let ids: Vec<Uuid> = children.iter().map(|c| c.id).collect();
        let summaries = ProgressService::summaries(pool, &ids).await?;
        Ok(attach_progress(children, summaries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;

    fn child() -> Child {
        Child {
            id: Uuid::new_v4(),
            child_code: "CH-00010".into(),
            parent_id: Uuid::new_v4(),
            name: "Sami".into(),
            age: 4,
            gender: "male".into(),
            target_letters: vec!["ر".into()],
            target_words: vec![],
            daily_play_duration: 10,
            session_structure: Json(Default::default()),
            profile_image: None,
            notes: None,
            assigned_specialist_id: Some(Uuid::new_v4()),
            requested_specialist_id: None,
            specialist_request_status: "approved".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn children_without_progress_get_empty_rollup() {
        let (a, b) = (child(), child());
        let synced = Utc::now();
        let summary = ProgressSummary {
            child_id: b.id,
            overall_stats: OverallStats { total_sessions: 3, ..Default::default() },
            last_sync_date: Some(synced),
        };

        let rows = attach_progress(vec![a.clone(), b.clone()], vec![summary]);
        assert_eq!(rows[0].child.id, a.id);
        assert_eq!(rows[0].progress, OverallStats::default());
        assert_eq!(rows[0].last_sync_date, None);
        assert_eq!(rows[1].progress.total_sessions, 3);
        assert_eq!(rows[1].last_sync_date, Some(synced));
    }

    #[test]
    fn child_fields_are_flattened_next_to_progress() {
        let rows = attach_progress(vec![child()], vec![]);
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert_eq!(json["childId"], "CH-00010");
        assert_eq!(json["progress"]["totalSessions"], 0);
    }
}
