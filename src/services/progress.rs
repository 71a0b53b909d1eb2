use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{types::Json, PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        child::Child,
        notification::{NewNotification, NotificationKind},
        progress::{AttemptView, OverallStats, Progress, ProgressSummary, Session, SessionInput},
        user::UserRole,
    },
    services::{
        children::ChildService,
        metrics::SESSIONS_COUNTER,
        outbox::{Outbox, OutboxJob},
        realtime::RealtimeEvent,
    },
};

/// How sessions reached the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// One live session from the training app.
    Append,
    /// A batch uploaded after the app was offline.
    Sync,
}

impl Entry {
    fn as_str(&self) -> &'static str {
        match self {
            Entry::Append => "append",
            Entry::Sync => "sync",
        }
    }
}

/// Only the owning parent's app and the assigned specialist record sessions.
fn can_record(user: &AuthenticatedUser, child: &Child) -> bool {
    match user.role {
        UserRole::Parent => child.parent_id == user.user_id,
        UserRole::Specialist => child.assigned_specialist_id == Some(user.user_id),
        UserRole::Admin | UserRole::SuperAdmin => false,
    }
}

/// Users told about a progress change: the parent and, when assigned, the
/// specialist.
fn audience(child: &Child) -> Vec<Uuid> {
    std::iter::once(child.parent_id).chain(child.assigned_specialist_id).collect()
}

/// Side effects of a recorded entry. Only a sync is announced; a live
/// append is already visible to the app that sent it.
fn announcements(
    entry: Entry,
    child: &Child,
    count: usize,
    stats: &OverallStats,
    now: DateTime<Utc>,
) -> Vec<OutboxJob> {
    if entry != Entry::Sync {
        return Vec::new();
    }
    let notice = NewNotification::new(
        child.parent_id,
        NotificationKind::ProgressUpdate,
        "Progress updated",
        format!("{} finished {} new session(s)", child.name, count),
    )
    .with_data(json!({
        "childId": child.id,
        "sessions": count,
        "successRate": stats.success_rate,
    }));
    std::iter::once(OutboxJob::Notify(notice))
        .chain(audience(child).into_iter().map(|user_id| OutboxJob::Realtime {
            user_id,
            event: RealtimeEvent::ProgressUpdated { child_id: child.id, timestamp: now },
        }))
        .collect()
}

pub struct ProgressService;

impl ProgressService {
    async fn lock_or_create(conn: &mut PgConnection, child_id: Uuid) -> AppResult<Progress> {
        sqlx::query(
            "INSERT INTO progress (child_id, overall_stats)
             VALUES ($1, $2)
             ON CONFLICT (child_id) DO NOTHING",
        )
        .bind(child_id)
        .bind(Json(OverallStats::default()))
        .execute(&mut *conn)
        .await?;

        let progress = sqlx::query_as::<_, Progress>("SELECT * FROM progress WHERE child_id = $1 FOR UPDATE")
            .bind(child_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(progress)
    }

    async fn find(pool: &PgPool, child_id: Uuid) -> AppResult<Option<Progress>> {
        let progress = sqlx::query_as::<_, Progress>("SELECT * FROM progress WHERE child_id = $1")
            .bind(child_id)
            .fetch_optional(pool)
            .await?;
        Ok(progress)
    }

    /// Append sessions to a child's ledger and recompute the rollup, all
    /// under the ledger's row lock.
    pub async fn record(
        pool: &PgPool,
        outbox: &Outbox,
        user: &AuthenticatedUser,
        child_id: Uuid,
        inputs: Vec<SessionInput>,
        entry: Entry,
    ) -> AppResult<ProgressSummary> {
        if inputs.is_empty() {
            return Err(AppError::validation("At least one session is required"));
        }
        let child = ChildService::get(pool, child_id).await?;
        if !can_record(user, &child) {
            return Err(AppError::forbidden("You cannot record progress for this child"));
        }

        let now = Utc::now();
        let sessions = inputs
            .into_iter()
            .map(|s| s.into_session(now))
            .collect::<AppResult<Vec<Session>>>()?;
        let count = sessions.len();

        let mut tx = pool.begin().await?;
        let mut progress = Self::lock_or_create(&mut tx, child.id).await?;
        progress.append_sessions(sessions, now);
        sqlx::query(
            "UPDATE progress
             SET sessions = $1, overall_stats = $2, last_sync_date = $3, updated_at = NOW()
             WHERE id = $4",
        )
        .bind(progress.sessions_json())
        .bind(progress.stats_json())
        .bind(progress.last_sync_date)
        .bind(progress.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        SESSIONS_COUNTER.with_label_values(&[entry.as_str()]).inc_by(count as f64);
        tracing::info!(child = %child.id, sessions = count, entry = entry.as_str(), "progress recorded");

        for job in announcements(entry, &child, count, progress.overall_stats(), now) {
            outbox.enqueue(job);
        }

        Ok(progress.summary())
    }

    pub async fn stats(pool: &PgPool, user: &AuthenticatedUser, child_id: Uuid) -> AppResult<ProgressSummary> {
        let child = ChildService::get_visible(pool, user, child_id).await?;
        Ok(Self::find(pool, child.id)
            .await?
            .map(|p| p.summary())
            .unwrap_or_else(|| ProgressSummary {
                child_id: child.id,
                overall_stats: OverallStats::default(),
                last_sync_date: None,
            }))
    }

    /// Sessions, newest first.
    pub async fn sessions(pool: &PgPool, user: &AuthenticatedUser, child_id: Uuid) -> AppResult<Vec<Session>> {
        let child = ChildService::get_visible(pool, user, child_id).await?;
        let mut sessions = Self::find(pool, child.id)
            .await?
            .map(|p| p.sessions().to_vec())
            .unwrap_or_default();
        sessions.reverse();
        Ok(sessions)
    }

    pub async fn attempts(
        pool: &PgPool,
        user: &AuthenticatedUser,
        child_id: Uuid,
        limit: usize,
    ) -> AppResult<Vec<AttemptView>> {
        let child = ChildService::get_visible(pool, user, child_id).await?;
        Ok(Self::find(pool, child.id)
            .await?
            .map(|p| p.recent_attempts(limit))
            .unwrap_or_default())
    }

    /// Rollups for many children at once, for portal listings.
    pub async fn summaries(pool: &PgPool, child_ids: &[Uuid]) -> AppResult<Vec<ProgressSummary>> {
        let rows = sqlx::query_as::<_, Progress>("SELECT * FROM progress WHERE child_id = ANY($1)")
            .bind(child_ids)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(Progress::summary).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(parent: Uuid, assigned: Option<Uuid>) -> Child {
        Child {
            id: Uuid::new_v4(),
            child_code: "CH-00003".into(),
            parent_id: parent,
            name: "Adam".into(),
            age: 5,
            gender: "male".into(),
            target_letters: vec![],
            target_words: vec![],
            daily_play_duration: 20,
            session_structure: Json(Default::default()),
            profile_image: None,
            notes: None,
            assigned_specialist_id: assigned,
            requested_specialist_id: None,
            specialist_request_status: if assigned.is_some() { "approved" } else { "none" }.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn progress_events_reach_parent_and_assigned_specialist() {
        let (parent, specialist) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(audience(&child(parent, Some(specialist))), vec![parent, specialist]);
        assert_eq!(audience(&child(parent, None)), vec![parent]);
    }

    #[test]
    fn sync_notifies_parent_and_broadcasts_to_both_sides() {
        let (parent, specialist) = (Uuid::new_v4(), Uuid::new_v4());
        let c = child(parent, Some(specialist));
        let now = Utc::now();

        let jobs = announcements(Entry::Sync, &c, 3, &OverallStats::default(), now);
        let kinds: Vec<&str> = jobs.iter().map(OutboxJob::kind).collect();
        assert_eq!(kinds, vec!["notify", "realtime", "realtime"]);
        assert!(matches!(&jobs[0], OutboxJob::Notify(n) if n.recipient_id == parent));
        assert!(matches!(
            &jobs[2],
            OutboxJob::Realtime { user_id, event: RealtimeEvent::ProgressUpdated { child_id, .. } }
                if *user_id == specialist && *child_id == c.id
        ));
    }

    #[test]
    fn live_append_is_not_announced() {
        let c = child(Uuid::new_v4(), Some(Uuid::new_v4()));
        assert!(announcements(Entry::Append, &c, 1, &OverallStats::default(), Utc::now()).is_empty());
    }

    #[test]
    fn only_family_and_assigned_specialist_record() {
        let (parent, specialist) = (Uuid::new_v4(), Uuid::new_v4());
        let c = child(parent, Some(specialist));
        let user = |id, role| AuthenticatedUser { user_id: id, role };
        assert!(can_record(&user(parent, UserRole::Parent), &c));
        assert!(can_record(&user(specialist, UserRole::Specialist), &c));
        assert!(!can_record(&user(Uuid::new_v4(), UserRole::Parent), &c));
        assert!(!can_record(&user(Uuid::new_v4(), UserRole::Admin), &c));
    }
}
