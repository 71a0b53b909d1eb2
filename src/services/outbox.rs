//! Best-effort side effects dispatched after the primary mutation commits.
//!
//! Handlers enqueue [`OutboxJob`]s without awaiting delivery. A single
//! dispatcher task drains the bounded queue and hands each job to a
//! [`JobSink`]; failures are logged and counted, then dropped. Nothing here
//! can fail or slow down the request that produced the job.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::models::notification::NewNotification;
use crate::services::{
    email::EmailService,
    metrics::OUTBOX_COUNTER,
    notifications::NotificationService,
    push::PushService,
    realtime::{Realtime, RealtimeEvent},
};

#[derive(Debug, Clone, PartialEq)]
pub enum OutboxJob {
    /// Store an in-app notification and mirror it as a push.
    Notify(NewNotification),
    Realtime { user_id: Uuid, event: RealtimeEvent },
    Email { to: String, subject: String, body: String },
}

impl OutboxJob {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboxJob::Notify(_) => "notify",
            OutboxJob::Realtime { .. } => "realtime",
            OutboxJob::Email { .. } => "email",
        }
    }
}

/// Where drained jobs are delivered.
pub trait JobSink: Send + Sync + 'static {
    fn deliver(&self, job: OutboxJob) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Cloneable handle used by handlers to enqueue jobs.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutboxJob>,
}

/// Owns the dispatcher task; used once at shutdown.
pub struct OutboxWorker {
    task: JoinHandle<()>,
}

impl Outbox {
    pub fn start<S: JobSink>(sink: S, capacity: usize) -> (Outbox, OutboxWorker) {
        let (tx, mut rx) = mpsc::channel::<OutboxJob>(capacity.max(1));
        let task = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let kind = job.kind();
                match sink.deliver(job).await {
                    Ok(()) => OUTBOX_COUNTER.with_label_values(&[kind, "delivered"]).inc(),
                    Err(e) => {
                        OUTBOX_COUNTER.with_label_values(&[kind, "failed"]).inc();
                        tracing::warn!(kind, "outbox job dropped: {e:#}");
                    }
                }
            }
            tracing::info!("outbox dispatcher stopped");
        });
        (Outbox { tx }, OutboxWorker { task })
    }

    /// Never blocks. A full queue drops the job.
    pub fn enqueue(&self, job: OutboxJob) {
        let kind = job.kind();
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                OUTBOX_COUNTER.with_label_values(&[kind, "overflow"]).inc();
                tracing::warn!(kind, "outbox full, dropping job");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(kind, "outbox closed, dropping job");
            }
        }
    }

    pub fn notify(&self, notification: NewNotification) {
        self.enqueue(OutboxJob::Notify(notification));
    }

    pub fn realtime(&self, user_id: Uuid, event: RealtimeEvent) {
        self.enqueue(OutboxJob::Realtime { user_id, event });
    }
}

impl OutboxWorker {
    /// Wait for queued jobs to drain once every [`Outbox`] handle is gone,
    /// giving up after `grace`.
    pub async fn drain(self, grace: Duration) {
        if tokio::time::timeout(grace, self.task).await.is_err() {
            tracing::warn!("outbox did not drain within {:?}", grace);
        }
    }
}

/// Production sink: database for in-app rows, Redis for real-time, FCM for
/// push, SMTP for email.
pub struct DeliverySink {
    pub db: PgPool,
    pub realtime: Realtime,
    pub push: PushService,
    pub email: Option<Arc<EmailService>>,
}

impl JobSink for DeliverySink {
    async fn deliver(&self, job: OutboxJob) -> anyhow::Result<()> {
        match job {
            OutboxJob::Notify(n) => {
                NotificationService::insert(&self.db, &n).await?;
                self.push
                    .notify_user(&self.db, n.recipient_id, &n.title, &n.body, n.data.clone())
                    .await
            }
            OutboxJob::Realtime { user_id, event } => self.realtime.publish(user_id, &event).await,
            OutboxJob::Email { to, subject, body } => match &self.email {
                Some(svc) => svc.send(&to, &subject, &body).await,
                None => {
                    tracing::debug!("SMTP not configured, skipping email");
                    Ok(())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::NotificationKind;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Recording {
        seen: Arc<Mutex<Vec<&'static str>>>,
        fail_email: bool,
    }

    impl JobSink for Recording {
        async fn deliver(&self, job: OutboxJob) -> anyhow::Result<()> {
            let kind = job.kind();
            self.seen.lock().unwrap().push(kind);
            if self.fail_email && kind == "email" {
                anyhow::bail!("smtp unreachable");
            }
            Ok(())
        }
    }

    fn email_job() -> OutboxJob {
        OutboxJob::Email { to: "p@example.com".into(), subject: "s".into(), body: "b".into() }
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_dispatcher() {
        let sink = Recording { fail_email: true, ..Default::default() };
        let seen = sink.seen.clone();
        let (outbox, worker) = Outbox::start(sink, 8);

        outbox.notify(NewNotification::new(Uuid::nil(), NotificationKind::LinkAccepted, "t", "b"));
        outbox.enqueue(email_job());
        outbox.realtime(
            Uuid::nil(),
            RealtimeEvent::UserTyping { from: Uuid::nil(), is_typing: true },
        );
        drop(outbox);
        worker.drain(Duration::from_secs(5)).await;

        assert_eq!(*seen.lock().unwrap(), vec!["notify", "email", "realtime"]);
    }

    #[tokio::test]
    async fn enqueue_after_close_is_silent() {
        let (outbox, worker) = Outbox::start(Recording::default(), 1);
        worker.task.abort();
        let _ = worker.task.await;
        outbox.enqueue(email_job());
    }
}
