//! Parent/specialist/child linkage.
//!
//! Three paths lead to an assigned child: a specialist registering a family
//! (Path A), a parent link request accepted by the specialist (Path B) and the
//! specialist's pending queue fed by `request-specialist` (Path C). Admins can
//! also assign directly. Every transition runs in one transaction with the
//! child row locked; the parent's `linked_specialist_id` is only ever set
//! through [`LinkageService::link_parent`], which refuses to overwrite a link
//! to somebody else. Referrals and notifications follow after commit and are
//! best-effort.

use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        auth::AuthenticatedUser,
        child::{Assignment, Child, SpecialistRequestStatus},
        linkage::{
            CreateFamilyRequest, CreateLinkRequest, LinkRequest, LinkRequestStatus, LinkRequestView,
            NewReferral, Referral, ReferralStatus, ReferralType,
        },
        notification::{NewNotification, NotificationKind},
        user::{NewUser, User, UserProfile, UserRole},
    },
    services::{
        auth::generate_temporary_password,
        children::ChildService,
        email::account_credentials_message,
        metrics,
        outbox::{Outbox, OutboxJob},
        users::{normalize_email, UserService},
    },
};

const LINK_REQUEST_VIEW: &str =
    "SELECT lr.id, lr.from_parent_id, p.name AS parent_name, p.email AS parent_email,
            lr.to_specialist_id, s.name AS specialist_name, lr.child_id, c.name AS child_name,
            lr.status, lr.message, lr.responded_at, lr.created_at
     FROM link_requests lr
     JOIN users p ON p.id = lr.from_parent_id
     JOIN users s ON s.id = lr.to_specialist_id
     JOIN children c ON c.id = lr.child_id";

/// Result of Path A.
#[derive(Debug)]
pub struct CreatedFamily {
    pub parent: UserProfile,
    pub child: Child,
    pub parent_created: bool,
}

/// Children of an unlinking parent that lose their specialist, with the
/// assignment each one currently holds and the one it moves to.
fn releases_for(children: &[Child], specialist_id: Uuid) -> AppResult<Vec<(Uuid, Assignment, Assignment)>> {
    children
        .iter()
        .filter(|c| c.assigned_specialist_id == Some(specialist_id))
        .map(|c| {
            let current = c.assignment()?;
            Ok((c.id, current, current.unassign()))
        })
        .collect()
}

/// The queue request a child carries, if it is the one `specialist_id` may act on.
fn queued_for(child: &Child, specialist_id: Uuid) -> AppResult<Assignment> {
    let current = child.assignment()?;
    if current.status() != SpecialistRequestStatus::Pending
        || child.requested_specialist_id != Some(specialist_id)
    {
        return Err(AppError::conflict("Child is not waiting for this specialist"));
    }
    Ok(current)
}

pub struct LinkageService;

impl LinkageService {
    /// Point `parent_id` at `specialist_id`. Linking to the same specialist
    /// again is a no-op; a parent linked elsewhere is a conflict.
    pub async fn link_parent(conn: &mut PgConnection, parent_id: Uuid, specialist_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users
             SET linked_specialist_id = $1, updated_at = NOW()
             WHERE id = $2 AND role = 'parent'
               AND (linked_specialist_id IS NULL OR linked_specialist_id = $1)",
        )
        .bind(specialist_id)
        .bind(parent_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND role = 'parent')")
                    .bind(parent_id)
                    .fetch_one(&mut *conn)
                    .await?;
            if !exists {
                return Err(AppError::not_found("Parent not found"));
            }
            return Err(AppError::conflict("Parent is already linked to another specialist"));
        }
        Ok(())
    }

    async fn require_specialist(conn: &mut PgConnection, specialist_id: Uuid) -> AppResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1 AND role = 'specialist' AND is_active = TRUE",
            crate::services::users::USER_COLS
        ))
        .bind(specialist_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found("Specialist not found"))
    }

    /// Append a referral. Runs after the transition committed, so a failure
    /// is logged and swallowed.
    pub async fn record_referral(pool: &PgPool, referral: NewReferral) {
        let result = sqlx::query(
            "INSERT INTO referrals (parent_id, specialist_id, child_id, referral_type, status, notes, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(referral.parent_id)
        .bind(referral.specialist_id)
        .bind(referral.child_id)
        .bind(referral.referral_type.as_str())
        .bind(ReferralStatus::Active.as_str())
        .bind(&referral.notes)
        .bind(referral.created_by)
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                parent = %referral.parent_id,
                specialist = %referral.specialist_id,
                kind = referral.referral_type.as_str(),
                "failed to record referral: {e}"
            );
        }
    }

    // ─── Path A ─────────────────────────────────────────────────────────────

    /// A specialist registers a parent (reusing an existing parent account
    /// with that email) and a child already assigned to them.
    pub async fn create_family(
        pool: &PgPool,
        outbox: &Outbox,
        login_url: &str,
        specialist_id: Uuid,
        req: CreateFamilyRequest,
    ) -> AppResult<CreatedFamily> {
        req.child.validate()?;
        let email = normalize_email(&req.parent_email)?;

        let mut tx = pool.begin().await?;
        Self::require_specialist(&mut tx, specialist_id).await?;

        let (parent, temporary_password) = match UserService::find_by_email(&mut tx, &email).await? {
            Some(existing) if existing.role() != UserRole::Parent => {
                return Err(AppError::conflict("This email belongs to a non-parent account"));
            }
            Some(existing) => (existing, None),
            None => {
                let password = generate_temporary_password();
                let created = UserService::create(
                    &mut tx,
                    NewUser {
                        email: email.clone(),
                        password: password.clone(),
                        name: req.parent_name.clone(),
                        phone: req.parent_phone.clone(),
                        role: UserRole::Parent,
                        specialization: None,
                        license_number: None,
                        center_id: None,
                    },
                )
                .await?;
                (created, Some(password))
            }
        };

        Self::link_parent(&mut tx, parent.id, specialist_id).await?;
        let child =
            ChildService::insert(&mut tx, parent.id, &req.child, Assignment::approved(specialist_id)).await?;
        tx.commit().await?;

        metrics::linkage("family_created");
        tracing::info!(
            specialist = %specialist_id,
            parent = %parent.id,
            child = %child.id,
            new_parent = temporary_password.is_some(),
            "family registered by specialist"
        );

        Self::record_referral(
            pool,
            NewReferral {
                parent_id: parent.id,
                specialist_id,
                child_id: Some(child.id),
                referral_type: ReferralType::SpecialistCreated,
                notes: req.notes,
                created_by: specialist_id,
            },
        )
        .await;

        outbox.notify(
            NewNotification::new(
                parent.id,
                NotificationKind::AccountCreated,
                "Welcome",
                format!("{} was registered and assigned to a specialist", child.name),
            )
            .with_data(json!({ "childId": child.id, "specialistId": specialist_id })),
        );
        if let Some(password) = &temporary_password {
            let (subject, body) = account_credentials_message(&parent.name, &parent.email, password, login_url);
            outbox.enqueue(OutboxJob::Email { to: parent.email.clone(), subject, body });
        }

        let parent_created = temporary_password.is_some();
        let mut parent = UserProfile::from(parent);
        parent.linked_specialist = Some(specialist_id);
        Ok(CreatedFamily { parent, child, parent_created })
    }

    // ─── Path B ─────────────────────────────────────────────────────────────

    pub async fn create_link_request(
        pool: &PgPool,
        outbox: &Outbox,
        parent_id: Uuid,
        req: &CreateLinkRequest,
    ) -> AppResult<LinkRequest> {
        let mut tx = pool.begin().await?;
        let child = ChildService::lock(&mut tx, req.child_id).await?;
        if child.parent_id != parent_id {
            return Err(AppError::forbidden("You can only request a specialist for your own child"));
        }
        let specialist = Self::require_specialist(&mut tx, req.specialist_id).await?;

        let current = child.assignment()?;
        let next = current.request()?;

        let duplicate: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM link_requests
                WHERE from_parent_id = $1 AND to_specialist_id = $2 AND child_id = $3 AND status = 'pending'
            )",
        )
        .bind(parent_id)
        .bind(specialist.id)
        .bind(child.id)
        .fetch_one(&mut *tx)
        .await?;
        if duplicate {
            return Err(AppError::conflict("A pending request already exists for this child and specialist"));
        }

        let request = sqlx::query_as::<_, LinkRequest>(
            "INSERT INTO link_requests (from_parent_id, to_specialist_id, child_id, message)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(parent_id)
        .bind(specialist.id)
        .bind(child.id)
        .bind(req.message.as_deref().map(str::trim).filter(|m| !m.is_empty()))
        .fetch_one(&mut *tx)
        .await?;

        ChildService::write_assignment(&mut tx, child.id, current, next, child.requested_specialist_id).await?;
        tx.commit().await?;

        metrics::linkage("request_created");
        tracing::info!(request = %request.id, parent = %parent_id, specialist = %specialist.id, "link request created");

        outbox.notify(
            NewNotification::new(
                specialist.id,
                NotificationKind::LinkRequest,
                "New link request",
                format!("A parent asked you to follow {}", child.name),
            )
            .with_data(json!({ "requestId": request.id, "childId": child.id })),
        );
        Ok(request)
    }

    /// Specialist decision on a pending link request.
    pub async fn respond_link_request(
        pool: &PgPool,
        outbox: &Outbox,
        specialist_id: Uuid,
        request_id: Uuid,
        accept: bool,
    ) -> AppResult<LinkRequest> {
        let mut tx = pool.begin().await?;
        let request = sqlx::query_as::<_, LinkRequest>("SELECT * FROM link_requests WHERE id = $1 FOR UPDATE")
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("Link request not found"))?;
        if request.to_specialist_id != specialist_id {
            return Err(AppError::forbidden("This request is addressed to another specialist"));
        }
        let status = request.status()?.respond(accept)?;

        let mut cascaded = 0;
        if status == LinkRequestStatus::Accepted {
            let child = ChildService::lock(&mut tx, request.child_id).await?;
            let current = child.assignment()?;
            let next = current.approve(specialist_id)?;
            Self::link_parent(&mut tx, request.from_parent_id, specialist_id).await?;
            ChildService::write_assignment(&mut tx, child.id, current, next, None).await?;

            // One accepted request settles the parent; the rest are declined.
            cascaded = sqlx::query(
                "UPDATE link_requests
                 SET status = 'rejected', responded_at = NOW(), updated_at = NOW()
                 WHERE from_parent_id = $1 AND status = 'pending' AND id <> $2",
            )
            .bind(request.from_parent_id)
            .bind(request.id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        let request = sqlx::query_as::<_, LinkRequest>(
            "UPDATE link_requests
             SET status = $1, responded_at = NOW(), updated_at = NOW()
             WHERE id = $2
             RETURNING *",
        )
        .bind(status.as_str())
        .bind(request.id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        let (transition, kind, title, body) = if accept {
            ("request_accepted", NotificationKind::LinkAccepted, "Request accepted", "Your specialist accepted your link request")
        } else {
            ("request_rejected", NotificationKind::LinkRejected, "Request declined", "The specialist declined your link request")
        };
        metrics::linkage(transition);
        tracing::info!(request = %request.id, specialist = %specialist_id, status = status.as_str(), cascaded, "link request answered");

        if accept {
            Self::record_referral(
                pool,
                NewReferral {
                    parent_id: request.from_parent_id,
                    specialist_id,
                    child_id: Some(request.child_id),
                    referral_type: ReferralType::LinkRequest,
                    notes: request.message.clone(),
                    created_by: specialist_id,
                },
            )
            .await;
        }

        outbox.notify(
            NewNotification::new(request.from_parent_id, kind, title, body)
                .with_data(json!({ "requestId": request.id, "childId": request.child_id })),
        );
        Ok(request)
    }

    pub async fn requests_for_specialist(
        pool: &PgPool,
        specialist_id: Uuid,
        status: Option<LinkRequestStatus>,
    ) -> AppResult<Vec<LinkRequestView>> {
        let rows = sqlx::query_as::<_, LinkRequestView>(&format!(
            "{LINK_REQUEST_VIEW}
             WHERE lr.to_specialist_id = $1 AND ($2::TEXT IS NULL OR lr.status = $2)
             ORDER BY lr.created_at DESC"
        ))
        .bind(specialist_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn requests_for_parent(pool: &PgPool, parent_id: Uuid) -> AppResult<Vec<LinkRequestView>> {
        let rows = sqlx::query_as::<_, LinkRequestView>(&format!(
            "{LINK_REQUEST_VIEW}
             WHERE lr.from_parent_id = $1
             ORDER BY lr.created_at DESC"
        ))
        .bind(parent_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    // ─── Path C ─────────────────────────────────────────────────────────────

    /// Parent puts an unassigned child in a specialist's queue.
    pub async fn request_specialist(
        pool: &PgPool,
        outbox: &Outbox,
        parent_id: Uuid,
        child_id: Uuid,
        specialist_id: Uuid,
    ) -> AppResult<Child> {
        let mut tx = pool.begin().await?;
        let child = ChildService::lock(&mut tx, child_id).await?;
        if child.parent_id != parent_id {
            return Err(AppError::forbidden("You can only request a specialist for your own child"));
        }
        Self::require_specialist(&mut tx, specialist_id).await?;

        let current = child.assignment()?;
        let next = current.request()?;
        ChildService::write_assignment(&mut tx, child.id, current, next, Some(specialist_id)).await?;
        let child = ChildService::lock(&mut tx, child.id).await?;
        tx.commit().await?;

        metrics::linkage("queue_requested");
        tracing::info!(child = %child.id, specialist = %specialist_id, "child queued for specialist");

        outbox.notify(
            NewNotification::new(
                specialist_id,
                NotificationKind::SpecialistRequest,
                "New child waiting",
                format!("{} is waiting for your approval", child.name),
            )
            .with_data(json!({ "childId": child.id })),
        );
        Ok(child)
    }

    /// Accept or reject a child from a specialist's queue. Specialists act on
    /// their own queue; admins act for specialists of their center.
    pub async fn respond_queue(
        pool: &PgPool,
        outbox: &Outbox,
        actor: &AuthenticatedUser,
        child_id: Uuid,
        accept: bool,
    ) -> AppResult<Child> {
        let mut tx = pool.begin().await?;
        let child = ChildService::lock(&mut tx, child_id).await?;
        let specialist_id = child
            .requested_specialist_id
            .ok_or_else(|| AppError::conflict("Child has no pending specialist request"))?;

        match actor.role {
            UserRole::Specialist if actor.user_id == specialist_id => {}
            UserRole::Admin => Self::require_same_center(&mut tx, actor.user_id, specialist_id).await?,
            _ => return Err(AppError::forbidden("Not allowed to answer this request")),
        }

        let current = queued_for(&child, specialist_id)?;
        let next = if accept {
            let next = current.approve(specialist_id)?;
            Self::link_parent(&mut tx, child.parent_id, specialist_id).await?;
            next
        } else {
            current.reject()?
        };
        ChildService::write_assignment(&mut tx, child.id, current, next, None).await?;
        let child = ChildService::lock(&mut tx, child.id).await?;
        tx.commit().await?;

        metrics::linkage(if accept { "queue_accepted" } else { "queue_rejected" });
        tracing::info!(child = %child.id, specialist = %specialist_id, actor = %actor.user_id, accept, "queue request answered");

        if accept {
            let referral_type =
                if actor.is(UserRole::Admin) { ReferralType::AdminAssigned } else { ReferralType::LinkRequest };
            Self::record_referral(
                pool,
                NewReferral {
                    parent_id: child.parent_id,
                    specialist_id,
                    child_id: Some(child.id),
                    referral_type,
                    notes: None,
                    created_by: actor.user_id,
                },
            )
            .await;
            outbox.notify(
                NewNotification::new(
                    child.parent_id,
                    NotificationKind::SpecialistAssigned,
                    "Specialist assigned",
                    format!("{} now has a specialist", child.name),
                )
                .with_data(json!({ "childId": child.id, "specialistId": specialist_id })),
            );
        } else {
            outbox.notify(
                NewNotification::new(
                    child.parent_id,
                    NotificationKind::SpecialistRejected,
                    "Request declined",
                    format!("The specialist could not take {}", child.name),
                )
                .with_data(json!({ "childId": child.id })),
            );
        }
        Ok(child)
    }

    // ─── Admin assignment ───────────────────────────────────────────────────

    pub async fn admin_assign(
        pool: &PgPool,
        outbox: &Outbox,
        admin_id: Uuid,
        child_id: Uuid,
        specialist_id: Uuid,
    ) -> AppResult<Child> {
        let mut tx = pool.begin().await?;
        Self::require_specialist(&mut tx, specialist_id).await?;
        Self::require_same_center(&mut tx, admin_id, specialist_id).await?;

        let child = ChildService::lock(&mut tx, child_id).await?;
        let current = child.assignment()?;
        let next = current.approve(specialist_id)?;
        Self::link_parent(&mut tx, child.parent_id, specialist_id).await?;
        ChildService::write_assignment(&mut tx, child.id, current, next, None).await?;
        let child = ChildService::lock(&mut tx, child.id).await?;
        tx.commit().await?;

        metrics::linkage("admin_assigned");
        tracing::info!(child = %child.id, specialist = %specialist_id, admin = %admin_id, "child assigned by admin");

        Self::record_referral(
            pool,
            NewReferral {
                parent_id: child.parent_id,
                specialist_id,
                child_id: Some(child.id),
                referral_type: ReferralType::AdminAssigned,
                notes: None,
                created_by: admin_id,
            },
        )
        .await;

        let data = json!({ "childId": child.id, "specialistId": specialist_id });
        outbox.notify(
            NewNotification::new(
                child.parent_id,
                NotificationKind::SpecialistAssigned,
                "Specialist assigned",
                format!("{} now has a specialist", child.name),
            )
            .with_data(data.clone()),
        );
        outbox.notify(
            NewNotification::new(
                specialist_id,
                NotificationKind::SpecialistAssigned,
                "New child assigned",
                format!("{} was assigned to you", child.name),
            )
            .with_data(data),
        );
        Ok(child)
    }

    async fn require_same_center(conn: &mut PgConnection, admin_id: Uuid, specialist_id: Uuid) -> AppResult<()> {
        let same: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM users a JOIN users s ON s.center_id = a.center_id
                WHERE a.id = $1 AND a.role = 'admin' AND s.id = $2 AND s.role = 'specialist'
            )",
        )
        .bind(admin_id)
        .bind(specialist_id)
        .fetch_one(conn)
        .await?;
        if !same {
            return Err(AppError::forbidden("Specialist does not belong to your center"));
        }
        Ok(())
    }

    // ─── Unlink ─────────────────────────────────────────────────────────────

    /// Parent leaves their specialist: the link is cleared and every child of
    /// theirs that specialist was following becomes unassigned.
    pub async fn unlink(pool: &PgPool, outbox: &Outbox, parent_id: Uuid) -> AppResult<Vec<Uuid>> {
        let mut tx = pool.begin().await?;
        let specialist_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT linked_specialist_id FROM users WHERE id = $1 AND role = 'parent' FOR UPDATE",
        )
        .bind(parent_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Parent not found"))?;
        let specialist_id =
            specialist_id.ok_or_else(|| AppError::validation("You are not linked to a specialist"))?;

        let children = sqlx::query_as::<_, Child>(
            "SELECT * FROM children WHERE parent_id = $1 ORDER BY created_at FOR UPDATE",
        )
        .bind(parent_id)
        .fetch_all(&mut *tx)
        .await?;

        let releases = releases_for(&children, specialist_id)?;
        for (child_id, current, next) in &releases {
            ChildService::write_assignment(&mut tx, *child_id, *current, *next, None).await?;
        }

        sqlx::query("UPDATE users SET linked_specialist_id = NULL, updated_at = NOW() WHERE id = $1")
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let released: Vec<Uuid> = releases.iter().map(|(id, _, _)| *id).collect();
        let names: Vec<&str> = children
            .iter()
            .filter(|c| released.contains(&c.id))
            .map(|c| c.name.as_str())
            .collect();

        metrics::linkage("unlinked");
        tracing::info!(parent = %parent_id, specialist = %specialist_id, released = released.len(), "parent unlinked");

        let body = if names.is_empty() {
            "A parent ended the link with you".to_string()
        } else {
            format!("A parent ended the link with you. Unassigned: {}", names.join(", "))
        };
        outbox.notify(
            NewNotification::new(specialist_id, NotificationKind::Unlinked, "Parent unlinked", body)
                .with_data(json!({ "parentId": parent_id, "childIds": released })),
        );
        Ok(released)
    }

    pub async fn referrals_for_specialist(pool: &PgPool, specialist_id: Uuid) -> AppResult<Vec<Referral>> {
        let rows = sqlx::query_as::<_, Referral>(
            "SELECT * FROM referrals WHERE specialist_id = $1 ORDER BY created_at DESC",
        )
        .bind(specialist_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures;
    use chrono::Utc;
    use sqlx::types::Json;

    fn child(parent: Uuid, assigned: Option<Uuid>, requested: Option<Uuid>, status: &str) -> Child {
        Child {
            id: Uuid::new_v4(),
            child_code: "CH-00001".into(),
            parent_id: parent,
            name: "Noor".into(),
            age: 4,
            gender: "female".into(),
            target_letters: vec![],
            target_words: vec![],
            daily_play_duration: 15,
            session_structure: Json(Default::default()),
            profile_image: None,
            notes: None,
            assigned_specialist_id: assigned,
            requested_specialist_id: requested,
            specialist_request_status: status.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn unlink_releases_only_children_of_that_specialist() {
        let (parent, s, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let kids = vec![
            child(parent, Some(s), None, "approved"),
            child(parent, Some(other), None, "approved"),
            child(parent, None, Some(s), "pending"),
            child(parent, Some(s), None, "approved"),
        ];

        let releases = releases_for(&kids, s).unwrap();
        let ids: Vec<Uuid> = releases.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec![kids[0].id, kids[3].id]);
        for (_, before, after) in releases {
            assert_eq!(before.specialist(), Some(s));
            assert_eq!(after, Assignment::unassigned());
        }
    }

    #[test]
    fn unlink_rejects_inconsistent_rows() {
        let s = Uuid::new_v4();
        let broken = vec![child(Uuid::new_v4(), Some(s), None, "pending")];
        assert!(matches!(releases_for(&broken, s), Err(AppError::Internal(_))));
    }

    #[test]
    fn queue_action_requires_matching_pending_request() {
        let s = Uuid::new_v4();
        let pending = child(Uuid::new_v4(), None, Some(s), "pending");
        assert!(queued_for(&pending, s).is_ok());
        assert!(matches!(queued_for(&pending, Uuid::new_v4()), Err(AppError::Conflict(_))));

        let rejected = child(Uuid::new_v4(), None, Some(s), "rejected");
        assert!(matches!(queued_for(&rejected, s), Err(AppError::Conflict(_))));
    }

    #[test]
    fn request_lifecycle_for_a_child() {
        // Parent asks, specialist accepts, a second accept is refused,
        // unlink returns the child to the pool.
        let s = Uuid::new_v4();
        let parent = Uuid::new_v4();
        let mut c = child(parent, None, None, "none");

        let pending = c.assignment().unwrap().request().unwrap();
        assert_eq!(pending.status(), SpecialistRequestStatus::Pending);
        c.specialist_request_status = pending.status().as_str().into();

        let approved = pending.approve(s).unwrap();
        c.assigned_specialist_id = approved.specialist();
        c.specialist_request_status = approved.status().as_str().into();
        assert!(c.assignment().unwrap().is_assigned());
        assert!(matches!(
            c.assignment().unwrap().approve(Uuid::new_v4()),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(LinkRequestStatus::Accepted.respond(true), Err(AppError::Conflict(_))));

        let releases = releases_for(std::slice::from_ref(&c), s).unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].2.status(), SpecialistRequestStatus::None);
    }

    async fn request_status(pool: &PgPool, id: Uuid) -> String {
        sqlx::query_scalar("SELECT status FROM link_requests WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn linked_specialist(pool: &PgPool, parent: Uuid) -> Option<Uuid> {
        sqlx::query_scalar("SELECT linked_specialist_id FROM users WHERE id = $1")
            .bind(parent)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn link(specialist: &User, child: &Child) -> CreateLinkRequest {
        CreateLinkRequest { specialist_id: specialist.id, child_id: child.id, message: None }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn accepting_a_request_links_the_family_and_declines_the_rest(pool: PgPool) {
        let outbox = fixtures::outbox();
        let parent = fixtures::user(&pool, UserRole::Parent).await;
        let first = fixtures::user(&pool, UserRole::Specialist).await;
        let second = fixtures::user(&pool, UserRole::Specialist).await;
        let noor = fixtures::child(&pool, parent.id, Assignment::unassigned()).await;

        let to_first = LinkageService::create_link_request(&pool, &outbox, parent.id, &link(&first, &noor))
            .await
            .unwrap();
        let to_second = LinkageService::create_link_request(&pool, &outbox, parent.id, &link(&second, &noor))
            .await
            .unwrap();

        let duplicate = LinkageService::create_link_request(&pool, &outbox, parent.id, &link(&first, &noor)).await;
        assert!(matches!(duplicate, Err(AppError::Conflict(_))));

        let wrong_specialist =
            LinkageService::respond_link_request(&pool, &outbox, second.id, to_first.id, true).await;
        assert!(matches!(wrong_specialist, Err(AppError::Forbidden(_))));

        let accepted = LinkageService::respond_link_request(&pool, &outbox, first.id, to_first.id, true)
            .await
            .unwrap();
        assert_eq!(accepted.status, "accepted");
        assert_eq!(request_status(&pool, to_second.id).await, "rejected");

        let child = ChildService::get(&pool, noor.id).await.unwrap();
        assert_eq!(child.assigned_specialist_id, Some(first.id));
        assert_eq!(child.specialist_request_status, "approved");
        assert_eq!(linked_specialist(&pool, parent.id).await, Some(first.id));

        let late = LinkageService::respond_link_request(&pool, &outbox, second.id, to_second.id, true).await;
        assert!(matches!(late, Err(AppError::Conflict(_))));
        let again = LinkageService::create_link_request(&pool, &outbox, parent.id, &link(&second, &noor)).await;
        assert!(matches!(again, Err(AppError::Conflict(_))));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn parent_linked_elsewhere_blocks_queue_accept(pool: PgPool) {
        let outbox = fixtures::outbox();
        let parent = fixtures::user(&pool, UserRole::Parent).await;
        let current = fixtures::user(&pool, UserRole::Specialist).await;
        let other = fixtures::user(&pool, UserRole::Specialist).await;
        fixtures::child(&pool, parent.id, Assignment::approved(current.id)).await;
        {
            let mut conn = pool.acquire().await.unwrap();
            LinkageService::link_parent(&mut conn, parent.id, current.id).await.unwrap();
            // Same specialist again is a no-op.
            LinkageService::link_parent(&mut conn, parent.id, current.id).await.unwrap();
        }

        let adam = fixtures::child(&pool, parent.id, Assignment::unassigned()).await;
        let queued = LinkageService::request_specialist(&pool, &outbox, parent.id, adam.id, other.id)
            .await
            .unwrap();
        assert_eq!(queued.requested_specialist_id, Some(other.id));

        let result =
            LinkageService::respond_queue(&pool, &outbox, &fixtures::principal(&other), adam.id, true).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let adam = ChildService::get(&pool, adam.id).await.unwrap();
        assert_eq!(adam.specialist_request_status, "pending");
        assert_eq!(adam.assigned_specialist_id, None);
        assert_eq!(linked_specialist(&pool, parent.id).await, Some(current.id));

        let rejected =
            LinkageService::respond_queue(&pool, &outbox, &fixtures::principal(&other), adam.id, false)
                .await
                .unwrap();
        assert_eq!(rejected.specialist_request_status, "rejected");
        assert_eq!(rejected.requested_specialist_id, None);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn unlink_clears_parent_and_releases_children(pool: PgPool) {
        let outbox = fixtures::outbox();
        let parent = fixtures::user(&pool, UserRole::Parent).await;
        let specialist = fixtures::user(&pool, UserRole::Specialist).await;
        let other = fixtures::user(&pool, UserRole::Specialist).await;

        let mut assigned = Vec::new();
        for name in ["Noor", "Adam"] {
            let family = LinkageService::create_family(
                &pool,
                &outbox,
                "https://app.test/login",
                specialist.id,
                CreateFamilyRequest {
                    parent_name: parent.name.clone(),
                    parent_email: parent.email.clone(),
                    parent_phone: None,
                    child: fixtures::child_request(name),
                    notes: None,
                },
            )
            .await
            .unwrap();
            assert!(!family.parent_created);
            assigned.push(family.child.id);
        }
        let waiting = fixtures::child(&pool, parent.id, Assignment::unassigned()).await;
        LinkageService::request_specialist(&pool, &outbox, parent.id, waiting.id, other.id)
            .await
            .unwrap();
        assert_eq!(linked_specialist(&pool, parent.id).await, Some(specialist.id));

        let mut released = LinkageService::unlink(&pool, &outbox, parent.id).await.unwrap();
        released.sort();
        assigned.sort();
        assert_eq!(released, assigned);

        assert_eq!(linked_specialist(&pool, parent.id).await, None);
        for id in &assigned {
            let child = ChildService::get(&pool, *id).await.unwrap();
            assert_eq!(child.assigned_specialist_id, None);
            assert_eq!(child.specialist_request_status, "none");
        }
        let waiting = ChildService::get(&pool, waiting.id).await.unwrap();
        assert_eq!(waiting.specialist_request_status, "pending");
        assert_eq!(waiting.requested_specialist_id, Some(other.id));

        let twice = LinkageService::unlink(&pool, &outbox, parent.id).await;
        assert!(matches!(twice, Err(AppError::Validation(_))));
    }
}
