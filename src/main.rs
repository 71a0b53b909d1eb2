use std::sync::Arc;
use std::time::Duration;

use redis::Client as RedisClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nutq_api::{
    config::Config,
    db, router,
    services::{
        email::EmailService,
        outbox::{DeliverySink, Outbox},
        push::PushService,
        realtime::Realtime,
    },
    AppState,
};

const OUTBOX_DRAIN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis_client = RedisClient::open(config.redis_url.as_str())?;
    let redis_conn = redis_client.get_multiplexed_async_connection().await?;
    info!("Redis connected");

    let email = EmailService::new(&config).map(Arc::new);
    if email.is_some() {
        info!("SMTP email service configured");
    } else {
        info!("SMTP not configured, email features disabled");
    }

    let realtime = Realtime::new(redis_conn.clone());
    let (outbox, worker) = Outbox::start(
        DeliverySink {
            db: pool.clone(),
            realtime: realtime.clone(),
            push: PushService::new(config.fcm_api_key.clone()),
            email: email.clone(),
        },
        config.outbox_capacity,
    );

    let state = AppState {
        db: pool.clone(),
        redis: redis_conn,
        redis_client,
        realtime,
        config: config.clone(),
        outbox,
        email,
    };

    let app = router::build(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router (and every Outbox handle in it) is gone; flush what is queued.
    worker.drain(OUTBOX_DRAIN_GRACE).await;
    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
