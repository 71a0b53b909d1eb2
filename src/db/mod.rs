use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run the migrations embedded from ./migrations/
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Atomically bump a named counter and return its new value.
///
/// Backs the human-readable staff and child identifiers. Runs inside the
/// caller's transaction so an aborted creation does not consume a number
/// visibly.
pub async fn next_sequence(conn: &mut PgConnection, name: &str) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "INSERT INTO sequence_counters (name, value) VALUES ($1, 1)
         ON CONFLICT (name) DO UPDATE SET value = sequence_counters.value + 1
         RETURNING value",
    )
    .bind(name)
    .fetch_one(conn)
    .await
}
