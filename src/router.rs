use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::{middleware::auth::JwtSecret, routes, services::upload::uploads_root, AppState};

/// Localhost is always allowed for development; otherwise only the app origin.
fn origin_allowed(origin: &str, app_base_url: &str) -> bool {
    origin.starts_with("http://localhost")
        || origin.starts_with("http://127.0.0.1")
        || origin == app_base_url.trim_end_matches('/')
}

fn cors(app_base_url: String) -> CorsLayer {
    let origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        origin.to_str().map(|o| origin_allowed(o, &app_base_url)).unwrap_or(false)
    });
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]))
        .allow_origin(origin)
}

fn api() -> Router<AppState> {
    Router::new()
        // Auth
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/me", get(routes::auth::me))
        .route("/auth/profile", put(routes::auth::update_profile))
        .route("/auth/change-password", post(routes::auth::change_password))
        .route("/auth/forgot-password", post(routes::auth::forgot_password))
        .route("/auth/reset-password", post(routes::auth::reset_password))
        // Children
        .route("/children", get(routes::children::list_children).post(routes::children::create_child))
        .route(
            "/children/{id}",
            get(routes::children::get_child)
                .put(routes::children::update_child)
                .delete(routes::children::delete_child),
        )
        .route("/children/{id}/request-specialist", post(routes::children::request_specialist))
        // Parents
        .route("/parents/my-specialist", get(routes::parents::my_specialist))
        .route("/parents/specialists", get(routes::parents::browse_specialists))
        .route(
            "/parents/link-requests",
            get(routes::parents::list_link_requests).post(routes::parents::create_link_request),
        )
        .route("/parents/unlink", post(routes::parents::unlink))
        // Specialists
        .route("/specialists/create-family", post(routes::specialists::create_family))
        .route("/specialists/link-requests", get(routes::specialists::list_link_requests))
        .route("/specialists/link-requests/{id}/accept", post(routes::specialists::accept_link_request))
        .route("/specialists/link-requests/{id}/reject", post(routes::specialists::reject_link_request))
        .route("/specialists/pending-children", get(routes::specialists::pending_children))
        .route("/specialists/pending-children/{id}/accept", post(routes::specialists::accept_pending_child))
        .route("/specialists/pending-children/{id}/reject", post(routes::specialists::reject_pending_child))
        // Specialist portal
        .route("/specialist-portal/stats", get(routes::specialist_portal::stats))
        .route("/specialist-portal/parents", get(routes::specialist_portal::linked_parents))
        .route("/specialist-portal/children", get(routes::specialist_portal::children))
        .route("/specialist-portal/referrals", get(routes::specialist_portal::referrals))
        // Exercise plans
        .route("/exercises", post(routes::exercises::create_plan))
        .route("/exercises/child/{child_id}", get(routes::exercises::list_for_child))
        .route(
            "/exercises/{id}",
            get(routes::exercises::get_plan)
                .put(routes::exercises::update_plan)
                .delete(routes::exercises::delete_plan),
        )
        // Content library and its word-only alias
        .route("/content", post(routes::content::add_content))
        .route("/content/child/{child_id}", get(routes::content::list_content))
        .route("/content/{id}", delete(routes::content::delete_content))
        .route("/words", post(routes::content::add_word))
        .route("/words/child/{child_id}", get(routes::content::list_words))
        .route("/words/{id}", delete(routes::content::delete_word))
        // Progress
        .route("/progress/session", post(routes::progress::append_session))
        .route("/progress/sync", post(routes::progress::sync))
        .route("/progress/{child_id}/stats", get(routes::progress::stats))
        .route("/progress/{child_id}/sessions", get(routes::progress::sessions))
        .route("/progress/{child_id}/attempts", get(routes::progress::attempts))
        // Messages
        .route("/messages", post(routes::messages::send_message))
        .route("/messages/conversations", get(routes::messages::get_conversations))
        .route("/messages/unread-count", get(routes::messages::unread_count))
        .route("/messages/conversation/{user_id}", get(routes::messages::get_conversation))
        .route("/messages/conversation/{user_id}/read", put(routes::messages::mark_conversation_read))
        .route(
            "/messages/{id}",
            put(routes::messages::edit_message).delete(routes::messages::delete_message),
        )
        .route("/messages/{id}/read", put(routes::messages::mark_read))
        // Notifications
        .route("/notifications", get(routes::notifications::list_notifications))
        .route("/notifications/unread-count", get(routes::notifications::unread_count))
        .route("/notifications/read-all", put(routes::notifications::mark_all_read))
        .route(
            "/notifications/device-token",
            post(routes::notifications::register_device_token)
                .delete(routes::notifications::unregister_device_token),
        )
        .route("/notifications/{id}/read", put(routes::notifications::mark_read))
        .route("/notifications/{id}", delete(routes::notifications::delete_notification))
        // Superadmin
        .route("/superadmin/stats", get(routes::superadmin::stats))
        .route("/superadmin/centers", get(routes::superadmin::list_centers).post(routes::superadmin::create_center))
        .route(
            "/superadmin/centers/{id}",
            get(routes::superadmin::get_center)
                .put(routes::superadmin::update_center)
                .delete(routes::superadmin::delete_center),
        )
        .route("/superadmin/centers/{id}/assign-admin", post(routes::superadmin::assign_admin))
        .route("/superadmin/admins", get(routes::superadmin::list_admins).post(routes::superadmin::create_admin))
        .route("/superadmin/admins/{id}", delete(routes::superadmin::delete_admin))
        // Admin
        .route("/admin/stats", get(routes::admin::stats))
        .route("/admin/specialists", get(routes::admin::list_specialists).post(routes::admin::create_specialist))
        .route("/admin/specialists/{id}", delete(routes::admin::remove_specialist))
        .route("/admin/assign-child", post(routes::admin::assign_child))
        // Upload
        .route("/upload", post(routes::upload::upload_image))
}

pub fn build(state: AppState) -> Router {
    let jwt_secret = JwtSecret(state.config.jwt_secret.clone());
    let uploads = ServeDir::new(uploads_root(&state.config.media_dir));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        .route("/ws", get(routes::websocket::ws_handler))
        .nest("/api", api())
        .nest_service("/uploads", uploads)
        .layer(axum::Extension(jwt_secret))
        .layer(TraceLayer::new_for_http())
        .layer(cors(state.config.app_base_url.clone()))
        // Covers image uploads plus multipart overhead
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_accepts_app_origin_and_localhost() {
        let base = "https://app.nutq.example/";
        assert!(origin_allowed("https://app.nutq.example", base));
        assert!(origin_allowed("http://localhost:5173", base));
        assert!(!origin_allowed("https://evil.example", base));
    }
}
