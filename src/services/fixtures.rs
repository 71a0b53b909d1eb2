//! Database-backed fixtures for service tests.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{
        auth::AuthenticatedUser,
        child::{Assignment, Child, CreateChildRequest, Gender},
        user::{NewUser, User, UserRole},
    },
    services::{
        children::ChildService,
        outbox::{JobSink, Outbox, OutboxJob},
        users::UserService,
    },
};

struct Discard;

impl JobSink for Discard {
    async fn deliver(&self, _job: OutboxJob) -> anyhow::Result<()> {
        Ok(())
    }
}

/// An outbox whose jobs go nowhere.
pub fn outbox() -> Outbox {
    Outbox::start(Discard, 64).0
}

pub fn principal(user: &User) -> AuthenticatedUser {
    AuthenticatedUser { user_id: user.id, role: user.role() }
}

pub async fn user(pool: &PgPool, role: UserRole) -> User {
    let mut conn = pool.acquire().await.unwrap();
    UserService::create(
        &mut conn,
        NewUser {
            email: format!("{}@clinic.test", Uuid::new_v4().simple()),
            password: "correct-horse".into(),
            name: format!("{} fixture", role.as_str()),
            phone: None,
            role,
            specialization: None,
            license_number: None,
            center_id: None,
        },
    )
    .await
    .unwrap()
}

pub fn child_request(name: &str) -> CreateChildRequest {
    CreateChildRequest {
        name: name.into(),
        age: 4,
        gender: Gender::Female,
        target_letters: vec![],
        target_words: vec![],
        daily_play_duration: None,
        session_structure: None,
        profile_image: None,
        notes: None,
    }
}

pub async fn child(pool: &PgPool, parent_id: Uuid, assignment: Assignment) -> Child {
    let mut conn = pool.acquire().await.unwrap();
    ChildService::insert(&mut conn, parent_id, &child_request("Noor"), assignment)
        .await
        .unwrap()
}
