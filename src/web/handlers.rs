use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_error::ServiceError;
use crate::crypto::{self, SESSION_SALT};
use crate::service::{self, CreateBotRequest};

use super::state::AppState;

#[derive(Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Serialize)]
struct BotStatusBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<serde_json::Value>,
}

fn status_body(status: StatusCode, message: impl Into<String>, session: Option<serde_json::Value>) -> Response {
    let label = if status == StatusCode::OK { "ok" } else { "error" };
    (status, Json(BotStatusBody { status: label, message: message.into(), session })).into_response()
}

pub async fn health() -> impl IntoResponse {
    Json(json!({"message": "OK"}))
}

/// Verifies the signed `session_id` the same way `POST /bot` minted it
/// (§6 "must pass the signed-value check"). Returns the token unchanged
/// on success — it is used verbatim as the Redis `sid`.
fn verify_session_id<'a>(secret: &str, session_id: &'a str) -> Option<&'a str> {
    crypto::validate_signed(session_id, SESSION_SALT, secret).is_some().then_some(session_id)
}

pub async fn get_bot(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ServiceError> {
    let Some(sid) = verify_session_id(&state.service.config.secret, &query.session_id) else {
        return Ok(status_body(StatusCode::SEE_OTHER, "invalid session", None));
    };
    match service::get_bot_state(&state.service, sid).await? {
        Some(bot) => Ok(status_body(StatusCode::OK, "OK", Some(bot))),
        None => Ok(status_body(StatusCode::SEE_OTHER, "no bot for this session", None)),
    }
}

pub async fn create_bot(
    State(state): State<AppState>,
    Json(body): Json<CreateBotRequest>,
) -> Result<Response, ServiceError> {
    let sid = crypto::mint_session_id(&state.service.config.secret);
    service::create_bot(&state.service, &sid, &body.user_name, &body.bot_name, &body.room_url, body.hidden).await?;
    Ok((StatusCode::OK, Json(json!({"session_id": sid}))).into_response())
}

pub async fn delete_bot(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ServiceError> {
    let Some(sid) = verify_session_id(&state.service.config.secret, &query.session_id) else {
        return Ok(status_body(StatusCode::SEE_OTHER, "invalid session", None));
    };
    match service::delete_bot(&state.service, sid).await {
        Ok(()) => Ok(status_body(StatusCode::OK, "OK", None)),
        Err(ServiceError::NoBot) => Ok(status_body(StatusCode::SEE_OTHER, "no bot for this session", None)),
        Err(err) => Err(err),
    }
}

pub async fn bot_ws(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Some(sid) = verify_session_id(&state.service.config.secret, &query.session_id).map(str::to_string)
        else {
            return;
        };
        stream_bot_state(socket, state, sid).await;
    })
}

/// Pushes `$.bot` every 5 s; closes with code 1000 the moment the session
/// disappears from Redis (§6 `WS /bot/ws`).
async fn stream_bot_state(mut socket: WebSocket, state: AppState, sid: String) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        match service::get_bot_state(&state.service, &sid).await {
            Ok(Some(bot)) => {
                if socket.send(Message::Text(bot.to_string())).await.is_err() {
                    return;
                }
            }
            _ => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: 1000,
                        reason: "session closed".into(),
                    })))
                    .await;
                return;
            }
        }
    }
}
