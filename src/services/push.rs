use reqwest::Client;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

/// Mobile push over the FCM HTTP API. Best-effort, one attempt per token.
pub struct PushService {
    client: Client,
    fcm_api_key: Option<String>,
}

impl PushService {
    pub fn new(fcm_api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            fcm_api_key,
        }
    }

    /// Send a push notification to every device `user_id` registered.
    pub async fn notify_user(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        if self.fcm_api_key.is_none() {
            tracing::debug!("FCM not configured, skipping push notification");
            return Ok(());
        }

        let tokens: Vec<String> =
            sqlx::query_scalar("SELECT token FROM device_tokens WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(pool)
                .await?;

        for token in tokens {
            if let Err(e) = self.send_fcm(&token, title, body, data.clone()).await {
                tracing::warn!(user = %user_id, "push delivery failed: {e}");
            }
        }
        Ok(())
    }

    async fn send_fcm(
        &self,
        token: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        let Some(api_key) = &self.fcm_api_key else {
            return Ok(());
        };

        let response = self
            .client
            .post("https://fcm.googleapis.com/fcm/send")
            .header("Authorization", format!("key={}", api_key))
            .header("Content-Type", "application/json")
            .json(&fcm_payload(token, title, body, data))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            tracing::warn!("FCM error {}: {}", status, text);
        }

        Ok(())
    }
}

fn fcm_payload(token: &str, title: &str, body: &str, data: Option<serde_json::Value>) -> serde_json::Value {
    let mut payload = json!({
        "to": token,
        "notification": {
            "title": title,
            "body": body,
        }
    });
    if let Some(d) = data {
        payload["data"] = d;
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_data_when_present() {
        let p = fcm_payload("tok", "Hi", "There", Some(json!({ "childId": "x" })));
        assert_eq!(p["to"], "tok");
        assert_eq!(p["notification"]["title"], "Hi");
        assert_eq!(p["data"]["childId"], "x");

        let bare = fcm_payload("tok", "Hi", "There", None);
        assert!(bare.get("data").is_none());
    }
}
