use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub const DEFAULT_ATTEMPTS_LIMIT: usize = 50;
pub const MAX_ATTEMPTS_LIMIT: usize = 200;
/// One day, in seconds.
pub const MAX_SESSION_DURATION: u64 = 86_400;
pub const MAX_SESSION_ATTEMPTS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub target_letter: Option<String>,
    pub target_word: Option<String>,
    pub vowel: Option<String>,
    pub recognized_text: Option<String>,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub success: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub exercise_type: Option<String>,
    /// Seconds.
    pub duration: u64,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub average_score: f64,
    pub attempts: Vec<Attempt>,
}

/// Session as posted by the training app. Totals are optional and default
/// to what the nested attempts say.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInput {
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub exercise_type: Option<String>,
    #[serde(default)]
    pub duration: u64,
    pub total_attempts: Option<u64>,
    pub successful_attempts: Option<u64>,
    pub average_score: Option<f64>,
    #[serde(default)]
    pub attempts: Vec<Attempt>,
}

impl SessionInput {
    pub fn into_session(self, received_at: DateTime<Utc>) -> AppResult<Session> {
        if self.duration > MAX_SESSION_DURATION {
            return Err(AppError::validation(format!(
                "Session duration cannot exceed {MAX_SESSION_DURATION} seconds"
            )));
        }
        let attempts = self.attempts;
        let total_attempts = self.total_attempts.unwrap_or(attempts.len() as u64);
        if total_attempts > MAX_SESSION_ATTEMPTS || attempts.len() as u64 > MAX_SESSION_ATTEMPTS {
            return Err(AppError::validation(format!(
                "A session cannot record more than {MAX_SESSION_ATTEMPTS} attempts"
            )));
        }
        let successful_attempts = self
            .successful_attempts
            .unwrap_or_else(|| attempts.iter().filter(|a| a.success).count() as u64)
            .min(total_attempts);
        let average_score = self.average_score.unwrap_or_else(|| {
            let scores: Vec<f64> = attempts.iter().filter_map(|a| a.score).collect();
            if scores.is_empty() {
                0.0
            } else {
                scores.iter().sum::<f64>() / scores.len() as f64
            }
        });
        Ok(Session {
            session_id: self.session_id.unwrap_or_else(Uuid::new_v4),
            started_at: self.started_at.unwrap_or(received_at),
            exercise_type: self.exercise_type,
            duration: self.duration,
            total_attempts,
            successful_attempts,
            average_score,
            attempts,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_sessions: u64,
    pub total_play_time: u64,
    pub total_attempts: u64,
    pub success_rate: f64,
    pub average_score: f64,
}

impl OverallStats {
    /// Pure fold over every session; the only way stats are produced.
    /// Totals saturate rather than wrap.
    pub fn from_sessions(sessions: &[Session]) -> Self {
        let total_sessions = sessions.len() as u64;
        let total_play_time = sessions.iter().fold(0u64, |acc, s| acc.saturating_add(s.duration));
        let total_attempts = sessions.iter().fold(0u64, |acc, s| acc.saturating_add(s.total_attempts));
        let successful = sessions.iter().fold(0u64, |acc, s| acc.saturating_add(s.successful_attempts));
        let success_rate = if total_attempts == 0 {
            0.0
        } else {
            100.0 * successful as f64 / total_attempts as f64
        };
        let average_score = if sessions.is_empty() {
            0.0
        } else {
            sessions.iter().map(|s| s.average_score).sum::<f64>() / sessions.len() as f64
        };
        Self { total_sessions, total_play_time, total_attempts, success_rate, average_score }
    }
}

/// Per-child ledger. Sessions only grow; `overall_stats` is private so it
/// can only change through [`Progress::append_sessions`].
#[derive(Debug, Clone, FromRow)]
pub struct Progress {
    pub id: Uuid,
    pub child_id: Uuid,
    sessions: Json<Vec<Session>>,
    overall_stats: Json<OverallStats>,
    pub last_sync_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Progress {
    pub fn sessions(&self) -> &[Session] {
        &self.sessions.0
    }

    pub fn overall_stats(&self) -> &OverallStats {
        &self.overall_stats.0
    }

    /// Append sessions in order and recompute the rollup once.
    pub fn append_sessions(&mut self, incoming: Vec<Session>, synced_at: DateTime<Utc>) {
        self.sessions.0.extend(incoming);
        self.overall_stats = Json(OverallStats::from_sessions(&self.sessions.0));
        self.last_sync_date = Some(synced_at);
    }

    pub fn sessions_json(&self) -> &Json<Vec<Session>> {
        &self.sessions
    }

    pub fn stats_json(&self) -> &Json<OverallStats> {
        &self.overall_stats
    }

    /// Every attempt across sessions, newest first. Missing timestamps sort
    /// as the epoch.
    pub fn recent_attempts(&self, limit: usize) -> Vec<AttemptView> {
        let mut all: Vec<AttemptView> = self
            .sessions
            .0
            .iter()
            .flat_map(|s| {
                s.attempts.iter().map(move |a| AttemptView {
                    session_id: s.session_id,
                    attempt: a.clone(),
                })
            })
            .collect();
        all.sort_by_key(|v| std::cmp::Reverse(v.attempt.timestamp.map_or(0, |t| t.timestamp_millis())));
        all.truncate(limit);
        all
    }

    pub fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            child_id: self.child_id,
            overall_stats: self.overall_stats.0.clone(),
            last_sync_date: self.last_sync_date,
        }
    }

    #[cfg(test)]
    pub fn empty(child_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            child_id,
            sessions: Json(vec![]),
            overall_stats: Json(OverallStats::default()),
            last_sync_date: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub attempt: Attempt,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub child_id: Uuid,
    pub overall_stats: OverallStats,
    pub last_sync_date: Option<DateTime<Utc>>,
}

/// Parse the caller's `limit`; anything non-numeric or non-positive falls
/// back to the default, large values are capped.
pub fn clamp_attempts_limit(raw: Option<&str>) -> usize {
    match raw.and_then(|s| s.trim().parse::<i64>().ok()) {
        Some(n) if n >= 1 => (n as usize).min(MAX_ATTEMPTS_LIMIT),
        _ => DEFAULT_ATTEMPTS_LIMIT,
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub child_id: Uuid,
    pub sessions: Vec<SessionInput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendSessionRequest {
    pub child_id: Uuid,
    pub session: SessionInput,
}

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    pub limit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attempt(success: bool, ts: Option<i64>) -> Attempt {
        Attempt {
            target_letter: Some("ر".into()),
            target_word: None,
            vowel: None,
            recognized_text: None,
            score: Some(if success { 90.0 } else { 40.0 }),
            confidence: None,
            success,
            timestamp: ts.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
        }
    }

    fn input(attempts: Vec<Attempt>, duration: u64) -> SessionInput {
        SessionInput {
            session_id: None,
            started_at: None,
            exercise_type: Some("letters".into()),
            duration,
            total_attempts: None,
            successful_attempts: None,
            average_score: None,
            attempts,
        }
    }

    #[test]
    fn seventy_percent_success_across_sessions() {
        let now = Utc::now();
        let mut progress = Progress::empty(Uuid::new_v4());
        let first: Vec<Attempt> = (0..4).map(|_| attempt(true, None)).chain([attempt(false, None)]).collect();
        let second: Vec<Attempt> = (0..3)
            .map(|_| attempt(true, None))
            .chain((0..2).map(|_| attempt(false, None)))
            .collect();

        progress.append_sessions(vec![input(first, 120).into_session(now).unwrap()], now);
        progress.append_sessions(vec![input(second, 180).into_session(now).unwrap()], now);

        let stats = progress.overall_stats();
        assert_eq!(stats.total_attempts, 10);
        assert_eq!(stats.success_rate, 70.0);
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.total_play_time, 300);
    }

    #[test]
    fn stats_always_equal_fold_of_sessions() {
        let now = Utc::now();
        let mut progress = Progress::empty(Uuid::new_v4());
        let batch = vec![
            input(vec![attempt(true, None)], 30).into_session(now).unwrap(),
            input(vec![attempt(false, None), attempt(true, None)], 45).into_session(now).unwrap(),
        ];
        progress.append_sessions(batch, now);
        assert_eq!(progress.overall_stats(), &OverallStats::from_sessions(progress.sessions()));
        assert_eq!(progress.last_sync_date, Some(now));
    }

    #[test]
    fn empty_ledger_has_zero_rates() {
        let stats = OverallStats::from_sessions(&[]);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_score, 0.0);
        assert_eq!(stats.total_sessions, 0);
    }

    #[test]
    fn average_score_is_mean_of_session_averages() {
        let now = Utc::now();
        let mut a = input(vec![], 10);
        a.average_score = Some(80.0);
        let mut b = input(vec![], 10);
        b.average_score = Some(60.0);
        let stats = OverallStats::from_sessions(&[a.into_session(now).unwrap(), b.into_session(now).unwrap()]);
        assert_eq!(stats.average_score, 70.0);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn explicit_totals_win_over_attempt_counts() {
        let mut s = input(vec![attempt(true, None)], 10);
        s.total_attempts = Some(8);
        s.successful_attempts = Some(6);
        let session = s.into_session(Utc::now()).unwrap();
        assert_eq!(session.total_attempts, 8);
        assert_eq!(session.successful_attempts, 6);
    }

    #[test]
    fn attempts_are_newest_first_with_missing_timestamps_last() {
        let now = Utc::now();
        let mut progress = Progress::empty(Uuid::new_v4());
        progress.append_sessions(
            vec![
                input(vec![attempt(true, Some(100)), attempt(false, None)], 10).into_session(now).unwrap(),
                input(vec![attempt(true, Some(300)), attempt(true, Some(200))], 10).into_session(now).unwrap(),
            ],
            now,
        );
        let recent = progress.recent_attempts(10);
        let stamps: Vec<Option<i64>> = recent.iter().map(|a| a.attempt.timestamp.map(|t| t.timestamp())).collect();
        assert_eq!(stamps, vec![Some(300), Some(200), Some(100), None]);
        assert_eq!(progress.recent_attempts(2).len(), 2);
    }

    #[test]
    fn oversized_sessions_are_rejected() {
        let now = Utc::now();
        let err = input(vec![], u64::MAX).into_session(now).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut s = input(vec![], 60);
        s.total_attempts = Some(u64::MAX);
        assert!(matches!(s.into_session(now), Err(AppError::Validation(_))));

        assert!(input(vec![], MAX_SESSION_DURATION).into_session(now).is_ok());
    }

    #[test]
    fn fold_saturates_instead_of_overflowing() {
        let now = Utc::now();
        let mut huge = input(vec![], 60).into_session(now).unwrap();
        huge.duration = u64::MAX;
        huge.total_attempts = u64::MAX;
        huge.successful_attempts = u64::MAX;
        let mut progress = Progress::empty(Uuid::new_v4());
        progress.append_sessions(vec![huge.clone(), huge], now);

        let stats = progress.overall_stats();
        assert_eq!(stats.total_play_time, u64::MAX);
        assert_eq!(stats.total_attempts, u64::MAX);
        assert_eq!(stats.success_rate, 100.0);
    }

    #[test]
    fn attempts_limit_is_clamped() {
        assert_eq!(clamp_attempts_limit(Some("500")), 200);
        assert_eq!(clamp_attempts_limit(Some("0")), 50);
        assert_eq!(clamp_attempts_limit(Some("abc")), 50);
        assert_eq!(clamp_attempts_limit(Some("-3")), 50);
        assert_eq!(clamp_attempts_limit(None), 50);
        assert_eq!(clamp_attempts_limit(Some("1")), 1);
        assert_eq!(clamp_attempts_limit(Some("200")), 200);
    }
}
