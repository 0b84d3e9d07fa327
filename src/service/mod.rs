//! Front-end core (§4.1): validates a caller's request, consults Postgres
//! and the chat service for identity, materializes session state in
//! Redis, and hands off to the [`Router`] for broker-side placement.
//!
//! This is the one layer in the fleet that owns no long-lived state of
//! its own — every call opens a Postgres/Redis connection from the
//! shared pools and returns. `web/` is the only caller; it exists mainly
//! so the HTTP wire shapes (§6) stay separate from this business logic.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use crate::app_error::ServiceError;
use crate::broker::router::Router;
use crate::chat::{Chat, ChatApiError};
use crate::config::FleetConfig;
use crate::crypto;
use crate::models::{BotState, RoomInfo, Session, UserIdentity};
use crate::redis::RedisPool;

#[derive(Clone)]
pub struct ServiceState {
    pub config: FleetConfig,
    pub db: PgPool,
    pub redis: RedisPool,
    pub router: Arc<Router>,
}

impl ServiceState {
    pub async fn connect(config: FleetConfig) -> anyhow::Result<Self> {
        let db = config.connect_database().await?;
        let redis = config.connect_redis().await.map_err(|err| anyhow::anyhow!("{err}"))?;
        let router = Router::connect(&config.rabbitmq_url, redis.clone()).await?;
        Ok(ServiceState { config, db, redis, router })
    }
}

fn session_key(sid: &str) -> String {
    format!("session:{sid}")
}

/// `name#passcode`, the wire shape `user_name`/`bot_name` arrive in
/// (§8 scenario A: `"alice#pass12"`). A bare name with no `#` is treated
/// as a passcode-less identity.
fn split_name_passcode(field: &str) -> (&str, &str) {
    field.split_once('#').unwrap_or((field, ""))
}

/// No name regex is given in §6 beyond the room/YouTube patterns; this
/// enforces the minimum any chat-service name must satisfy (non-empty,
/// no whitespace, printable ASCII) rather than inventing a stricter one.
fn validate_name(name: &str, field: &str) -> Result<(), ServiceError> {
    if name.is_empty() || name.len() > 20 || name.chars().any(|c| c.is_whitespace() || !c.is_ascii_graphic()) {
        return Err(ServiceError::Validation(format!("invalid {field}")));
    }
    Ok(())
}

fn value_name(v: &Value) -> Option<&str> {
    v.as_str().or_else(|| v.get("name").and_then(Value::as_str))
}

fn lounge_self_tripcode(lounge: &Value, name: &str) -> String {
    for key in ["you", "user", "self"] {
        if let Some(tripcode) = lounge.get(key).and_then(|v| v.get("tripcode")).and_then(Value::as_str) {
            return tripcode.to_string();
        }
    }
    lounge
        .get("users")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|u| u.get("name").and_then(Value::as_str) == Some(name))
        .and_then(|u| u.get("tripcode"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn find_room<'a>(lounge: &'a Value, room_url: &str) -> Option<&'a Value> {
    lounge.get("rooms")?.as_array()?.iter().find(|room| room.get("url").and_then(Value::as_str) == Some(room_url))
}

/// §4.1 step 3's "verify the room exists, user is its host, room not
/// full, and the bot name is not already in the room" (the non-`hidden`
/// path only).
fn validate_room_visibility(lounge: &Value, room_url: &str, user_name: &str, bot_name: &str) -> Result<(), ServiceError> {
    let Some(room) = find_room(lounge, room_url) else {
        return Err(ServiceError::Identity("room does not exist".to_string()));
    };
    let is_host = room.get("host").and_then(value_name).map(|host| host == user_name).unwrap_or(false);
    if !is_host {
        return Err(ServiceError::Identity("caller is not the room's host".to_string()));
    }
    let users = room.get("users").and_then(Value::as_array);
    let occupancy = users.map(Vec::len).unwrap_or(0);
    let limit = room.get("limit").and_then(Value::as_u64).unwrap_or(u64::MAX);
    if occupancy as u64 >= limit {
        return Err(ServiceError::Identity("room is full".to_string()));
    }
    let bot_present = users.into_iter().flatten().any(|u| value_name(u) == Some(bot_name));
    if bot_present {
        return Err(ServiceError::Identity("bot name is already in the room".to_string()));
    }
    Ok(())
}

/// Logs in transiently as `name#passcode`, fetches the lounge JSON, logs
/// back out, and returns `(lounge, resolved tripcode)`. Used once for the
/// calling user (mandatory) and once more for the bot identity (to
/// resolve `BotState.tripcode`, which otherwise has no source before the
/// worker performs its own durable login).
async fn resolve_identity(config: &FleetConfig, name: &str, passcode: &str) -> Result<(Value, String), ChatApiError> {
    let mut chat = Chat::new(&config.chat_base_url, config.chat_request_timeout)?;
    let label_icon = "kyo-2x";
    chat.login(name, passcode, label_icon).await?;
    let lounge = chat.get_lounge_json().await;
    let _ = chat.logout().await;
    let lounge = lounge?;
    let tripcode = lounge_self_tripcode(&lounge, name);
    Ok((lounge, tripcode))
}

/// `create_bot(sid, user_name, bot_name, room_url, hidden)` (§4.1).
pub async fn create_bot(
    state: &ServiceState,
    sid: &str,
    user_name: &str,
    bot_name: &str,
    room_url: &str,
    hidden: bool,
) -> Result<(), ServiceError> {
    let mut conn = state.redis.get().await.map_err(|err| anyhow::anyhow!("{err}"))?;
    let existing: Option<String> =
        redis::cmd("GET").arg(session_key(sid)).query_async(&mut *conn).await.unwrap_or(None);
    if existing.is_some() {
        return Err(ServiceError::AlreadyCreated);
    }

    let (user_display, user_passcode) = split_name_passcode(user_name);
    let (bot_display, bot_passcode) = split_name_passcode(bot_name);
    validate_name(user_display, "user_name")?;
    validate_name(bot_display, "bot_name")?;
    if !crate::chat::validate_room_url(room_url) {
        return Err(ServiceError::Validation("invalid room_url".to_string()));
    }

    let (lounge, user_tripcode) = resolve_identity(&state.config, user_display, user_passcode).await?;
    if !hidden {
        validate_room_visibility(&lounge, room_url, user_display, bot_display)?;
    }
    let (_, bot_tripcode) = resolve_identity(&state.config, bot_display, bot_passcode).await?;

    let (passcode_hash, salt) = crypto::hash_passcode(user_passcode, None);
    let user_row =
        crate::db::queries::get_or_create_user(&state.db, user_display, &user_tripcode, &passcode_hash, &salt)
            .await?;
    crate::db::queries::get_or_create_bot(
        &state.db,
        user_row.id,
        bot_display,
        &bot_tripcode,
        bot_passcode,
        "kyo-2x",
        "EN",
        "-",
    )
    .await?;

    let (bot_passcode_hash, _) = crypto::hash_passcode(bot_passcode, None);
    let session = Session {
        room: RoomInfo { id: String::new(), url: room_url.to_string(), name: String::new() },
        user: UserIdentity {
            id: user_row.id.to_string(),
            name: user_display.to_string(),
            tripcode: user_tripcode,
            passcode_hash,
        },
        bot: BotState {
            name: bot_display.to_string(),
            tripcode: bot_tripcode,
            passcode_hash: bot_passcode_hash,
            icon: "kyo-2x".to_string(),
            language: "EN".to_string(),
            command_prefix: "-".to_string(),
            whitelist: Default::default(),
            blacklist: Default::default(),
            groups: Default::default(),
            user_id: user_row.id,
        },
    };

    write_session(&state.redis, sid, &session, state.config.session_ttl).await?;

    if let Err(err) = state.router.create(sid).await {
        delete_session(&state.redis, sid).await;
        return Err(err.into());
    }
    Ok(())
}

/// `delete_bot(sid)` (§4.1).
pub async fn delete_bot(state: &ServiceState, sid: &str) -> Result<(), ServiceError> {
    let mut conn = state.redis.get().await.map_err(|err| anyhow::anyhow!("{err}"))?;
    let existing: Option<String> =
        redis::cmd("GET").arg(session_key(sid)).query_async(&mut *conn).await.unwrap_or(None);
    if existing.is_none() {
        return Err(ServiceError::NoBot);
    }
    state.router.delete(sid).await?;
    Ok(())
}

/// Session read for UI/WebSocket: `redis.json.get("session:{sid}", "$.bot")`.
pub async fn get_bot_state(state: &ServiceState, sid: &str) -> Result<Option<Value>, ServiceError> {
    let mut conn = state.redis.get().await.map_err(|err| anyhow::anyhow!("{err}"))?;
    let raw: Option<String> =
        redis::cmd("GET").arg(session_key(sid)).query_async(&mut *conn).await.unwrap_or(None);
    let Some(raw) = raw else { return Ok(None) };
    let session: Session = serde_json::from_str(&raw)?;
    Ok(Some(serde_json::to_value(session.bot)?))
}

async fn write_session(redis: &RedisPool, sid: &str, session: &Session, ttl: Duration) -> Result<(), ServiceError> {
    let mut conn = redis.get().await.map_err(|err| anyhow::anyhow!("{err}"))?;
    let body = serde_json::to_string(session)?;
    let _: () = redis::cmd("SET")
        .arg(session_key(sid))
        .arg(body)
        .arg("EX")
        .arg(ttl.as_secs())
        .query_async(&mut *conn)
        .await
        .map_err(|err: redis::RedisError| anyhow::anyhow!("{err}"))?;
    Ok(())
}

async fn delete_session(redis: &RedisPool, sid: &str) {
    if let Ok(mut conn) = redis.get().await {
        let _: Result<(), _> = redis::cmd("DEL").arg(session_key(sid)).query_async(&mut *conn).await;
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateBotRequest {
    pub user_name: String,
    pub bot_name: String,
    pub room_url: String,
    #[serde(default)]
    pub hidden: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_name_and_passcode() {
        assert_eq!(split_name_passcode("alice#pass12"), ("alice", "pass12"));
        assert_eq!(split_name_passcode("alice"), ("alice", ""));
    }

    #[test]
    fn validates_name_shape() {
        assert!(validate_name("alice", "user_name").is_ok());
        assert!(validate_name("", "user_name").is_err());
        assert!(validate_name("has space", "user_name").is_err());
    }

    #[test]
    fn finds_room_by_url_and_checks_host_and_occupancy() {
        let lounge = serde_json::json!({
            "rooms": [{
                "url": "drrr.com/room/?id=ABCDEFGHIJ",
                "host": "alice",
                "users": [{"name": "alice"}],
                "limit": 10,
            }]
        });
        assert!(validate_room_visibility(&lounge, "drrr.com/room/?id=ABCDEFGHIJ", "alice", "dj").is_ok());
        assert!(validate_room_visibility(&lounge, "drrr.com/room/?id=ABCDEFGHIJ", "bob", "dj").is_err());
        assert!(validate_room_visibility(&lounge, "drrr.com/room/?id=ZZZZZZZZZZ", "alice", "dj").is_err());
    }

    #[test]
    fn rejects_bot_name_already_present() {
        let lounge = serde_json::json!({
            "rooms": [{
                "url": "drrr.com/room/?id=ABCDEFGHIJ",
                "host": "alice",
                "users": [{"name": "alice"}, {"name": "dj"}],
                "limit": 10,
            }]
        });
        assert!(validate_room_visibility(&lounge, "drrr.com/room/?id=ABCDEFGHIJ", "alice", "dj").is_err());
    }
}
