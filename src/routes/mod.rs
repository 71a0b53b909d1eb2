pub mod admin;
pub mod auth;
pub mod children;
pub mod content;
pub mod exercises;
pub mod health;
pub mod messages;
pub mod metrics;
pub mod notifications;
pub mod parents;
pub mod progress;
pub mod specialist_portal;
pub mod specialists;
pub mod superadmin;
pub mod upload;
pub mod websocket;

use axum::{http::StatusCode, Json};
use serde_json::{Map, Value};

/// Success envelope: `{ "success": true, "message"?: ..., ...payload }`.
/// Object payloads are merged at the top level; anything else lands under `data`.
pub fn envelope(message: Option<&str>, payload: Value) -> Json<Value> {
    let mut body = Map::new();
    body.insert("success".into(), Value::Bool(true));
    if let Some(message) = message {
        body.insert("message".into(), Value::String(message.into()));
    }
    match payload {
        Value::Object(fields) => body.extend(fields),
        Value::Null => {}
        other => {
            body.insert("data".into(), other);
        }
    }
    Json(Value::Object(body))
}

pub fn ok(payload: Value) -> Json<Value> {
    envelope(None, payload)
}

pub fn done(message: &str) -> Json<Value> {
    envelope(Some(message), Value::Null)
}

pub fn created(message: &str, payload: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::CREATED, envelope(Some(message), payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_fields_sit_next_to_success() {
        let Json(body) = envelope(Some("Child created"), json!({ "child": { "name": "Lina" } }));
        assert_eq!(
            body,
            json!({ "success": true, "message": "Child created", "child": { "name": "Lina" } })
        );
    }

    #[test]
    fn bare_message_and_non_object_payloads() {
        let Json(body) = done("Logged out");
        assert_eq!(body, json!({ "success": true, "message": "Logged out" }));

        let Json(body) = ok(json!([1, 2]));
        assert_eq!(body, json!({ "success": true, "data": [1, 2] }));
    }

    #[test]
    fn created_uses_201() {
        let (status, Json(body)) = created("Center created", json!({ "center": {} }));
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
    }
}
