use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db = sqlx::query("SELECT 1").execute(&state.db).await;
    let mut redis = state.redis.clone();
    let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut redis).await;
    let redis_ok = pong.is_ok();

    match db {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": "ok",
                "db": "connected",
                "redis": if redis_ok { "connected" } else { "unavailable" },
            })),
        ),
        Err(e) => {
            tracing::error!("health check database error: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "success": false, "status": "error", "db": "unavailable" })),
            )
        }
    }
}
