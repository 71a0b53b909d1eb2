use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    extract::AppQuery,
    middleware::auth::decode_access_token,
    services::realtime::{user_channel, RealtimeEvent},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    pub token: String,
}

/// Frames a client may send. Anything else is ignored.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Typing {
        to: Uuid,
        #[serde(default = "default_true")]
        is_typing: bool,
    },
}

fn default_true() -> bool {
    true
}

/// The event to relay for an inbound frame, addressed to its peer.
fn relay_for(from: Uuid, text: &str) -> Option<(Uuid, RealtimeEvent)> {
    match serde_json::from_str::<ClientFrame>(text).ok()? {
        ClientFrame::Typing { to, .. } if to == from => None,
        ClientFrame::Typing { to, is_typing } => Some((to, RealtimeEvent::UserTyping { from, is_typing })),
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<WsQueryParams>,
) -> Response {
    let auth_user = decode_access_token(&params.token, &state.config.jwt_secret);

    ws.on_upgrade(move |socket| async move {
        match auth_user {
            Ok(user) => {
                info!(user = %user.user_id, "WebSocket connected");
                handle_socket(socket, state, user.user_id).await;
            }
            Err(e) => {
                error!("WebSocket auth failed: {}", e);
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    // Dedicated pub/sub connection per socket
    let mut pubsub = match state.redis_client.get_async_pubsub().await {
        Ok(c) => c,
        Err(e) => {
            error!("Redis pubsub error: {}", e);
            return;
        }
    };

    if let Err(e) = pubsub.subscribe(user_channel(user_id)).await {
        error!("Redis subscribe error: {}", e);
        return;
    }

    // Redis Pub/Sub → WebSocket. Payloads are already `{type, payload}`.
    let mut redis_task = tokio::spawn(async move {
        let mut pubsub_stream = pubsub.on_message();
        while let Some(msg) = pubsub_stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(_) => continue,
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let realtime = state.realtime.clone();
    let mut client_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match relay_for(user_id, text.as_str()) {
                    Some((peer, event)) => {
                        if let Err(e) = realtime.publish(peer, &event).await {
                            debug!(user = %user_id, "typing relay failed: {e:#}");
                        }
                    }
                    None => debug!(user = %user_id, "ignoring client frame"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut redis_task) => client_task.abort(),
        _ = (&mut client_task) => redis_task.abort(),
    }

    info!(user = %user_id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_frames_are_relayed_to_the_peer() {
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let frame = format!(r#"{{"type":"typing","to":"{peer}","isTyping":false}}"#);
        assert_eq!(
            relay_for(me, &frame),
            Some((peer, RealtimeEvent::UserTyping { from: me, is_typing: false }))
        );

        let frame = format!(r#"{{"type":"typing","to":"{peer}"}}"#);
        assert_eq!(
            relay_for(me, &frame),
            Some((peer, RealtimeEvent::UserTyping { from: me, is_typing: true }))
        );
    }

    #[test]
    fn other_frames_are_ignored() {
        let me = Uuid::new_v4();
        assert_eq!(relay_for(me, "hello"), None);
        assert_eq!(relay_for(me, r#"{"type":"new_message","content":"x"}"#), None);
        let to_self = format!(r#"{{"type":"typing","to":"{me}"}}"#);
        assert_eq!(relay_for(me, &to_self), None);
    }
}
