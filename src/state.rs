use std::sync::Arc;

use redis::Client as RedisClient;
use sqlx::PgPool;

use crate::{
    config::Config,
    services::{email::EmailService, outbox::Outbox, realtime::Realtime},
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: redis::aio::MultiplexedConnection,
    pub redis_client: RedisClient,
    pub realtime: Realtime,
    pub config: Arc<Config>,
    pub outbox: Outbox,
    pub email: Option<Arc<EmailService>>,
}
