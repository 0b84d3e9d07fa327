use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::error::ChatApiError;
use super::messages::{RawMessage, RoomMessage};

pub const ROOM_URL_PATTERN: &str = r"(?:https?://)?drrr\.com/room/\?id=.{10}";

pub fn validate_room_url(url: &str) -> bool {
    let re = regex::Regex::new(&format!("^{ROOM_URL_PATTERN}$")).expect("valid regex");
    re.is_match(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub tripcode: String,
}

impl User {
    fn from_json(info: &RawUserInfo) -> Self {
        User {
            id: info.id.clone(),
            name: info.name.clone(),
            tripcode: info.tripcode.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawUserInfo {
    id: String,
    name: String,
    #[serde(default)]
    tripcode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RoomUpdate {
    #[serde(default)]
    users: Option<Vec<RawUserInfo>>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    talks: Option<Vec<Value>>,
    #[serde(default, rename = "djMode")]
    dj_mode: bool,
    music: bool,
    update: f64,
}

/// Mirrors the "current view of a joined chat room" held by each bot
/// instance: membership, host, and whether the room is still connected
/// (§3 `room`, §4.4 `MessagesUpdating`).
#[derive(Debug, Default)]
pub struct Room {
    pub connected: bool,
    pub url: Option<String>,
    pub dj_mode: bool,
    pub music: bool,
    pub update_time: f64,
    pub host: Option<User>,
    pub users: HashMap<String, User>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_host(&self, user: &User) -> Option<bool> {
        self.host
            .as_ref()
            .map(|host| host.name == user.name && host.tripcode == user.tripcode)
    }

    pub fn reset(&mut self) {
        self.update_time = 0.0;
        self.connected = true;
        self.url = None;
        self.dj_mode = false;
        self.music = false;
        self.host = None;
        self.users.clear();
    }

    pub fn mark_joined(&mut self, url: &str) {
        self.reset();
        self.url = Some(url.to_string());
    }

    pub fn leave(&mut self) {
        self.connected = false;
    }

    fn update_users(&mut self, users: &[RawUserInfo], host_id: &str) {
        for info in users {
            let user = self
                .users
                .entry(info.name.clone())
                .or_insert_with(|| User::from_json(info));
            *user = User::from_json(info);
            if user.id == host_id {
                self.host = Some(user.clone());
            }
        }
    }

    fn remove_stale_users(&mut self, users: &[RawUserInfo]) {
        let present: std::collections::HashSet<&str> =
            users.iter().map(|u| u.name.as_str()).collect();
        self.users.retain(|name, _| present.contains(name.as_str()));
    }

    /// Applies a chat-update payload, returning any newly-arrived messages
    /// resolved against the refreshed user table.
    pub fn apply_update(&mut self, payload: &Value) -> Result<Vec<RoomMessage>, ChatApiError> {
        let update: RoomUpdate =
            serde_json::from_value(payload.clone()).map_err(|_| ChatApiError::InvalidResponse)?;

        if let (Some(users), Some(host_id)) = (&update.users, &update.host) {
            self.update_users(users, host_id);
        }

        let had_previous_update = self.update_time > 0.0;
        let messages = match (&update.talks, had_previous_update) {
            (Some(talks), true) => self.process_messages(talks)?,
            _ => Vec::new(),
        };

        if let Some(users) = &update.users {
            self.remove_stale_users(users);
        }

        self.dj_mode = update.dj_mode;
        self.music = update.music;
        self.update_time = update.update;

        Ok(messages)
    }

    fn process_messages(&self, talks: &[Value]) -> Result<Vec<RoomMessage>, ChatApiError> {
        let mut messages = Vec::with_capacity(talks.len());
        for raw in talks {
            let parsed: RawMessage = match serde_json::from_value(raw.clone()) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };
            messages.push(self.resolve_message(parsed)?);
        }
        Ok(messages)
    }

    fn resolve_message(&self, raw: RawMessage) -> Result<RoomMessage, ChatApiError> {
        Ok(match raw {
            RawMessage::Join(msg) => RoomMessage::Join {
                time: msg.time,
                user: self.lookup(&msg.user.name)?,
            },
            RawMessage::Text(msg) => RoomMessage::Text {
                time: msg.time,
                user: self.lookup(&msg.from.name)?,
                text: msg.message,
                private: msg.secret,
            },
            RawMessage::Music(msg) => RoomMessage::Music {
                time: msg.time,
                user: self.lookup(&msg.from.name)?,
            },
        })
    }

    fn lookup(&self, name: &str) -> Result<User, ChatApiError> {
        self.users
            .get(name)
            .cloned()
            .ok_or_else(|| ChatApiError::UserNotFound(name.to_string()))
    }

    pub fn get_user(&self, name: &str) -> Option<&User> {
        self.users.get(name)
    }

    pub fn get_user_or_raise(&self, name: &str) -> Result<&User, ChatApiError> {
        self.users
            .get(name)
            .ok_or_else(|| ChatApiError::UserNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_url_pattern_matches_spec_example() {
        assert!(validate_room_url("drrr.com/room/?id=ABCDEFGHIJ"));
        assert!(validate_room_url("https://drrr.com/room/?id=ABCDEFGHIJ"));
        assert!(!validate_room_url("drrr.com/room/?id=short"));
    }

    #[test]
    fn apply_update_tracks_host_and_drops_stale_users() {
        let mut room = Room::new();
        room.mark_joined("drrr.com/room/?id=ABCDEFGHIJ");

        let first = serde_json::json!({
            "users": [{"id": "u1", "name": "alice", "tripcode": "abc"}],
            "host": "u1",
            "talks": [],
            "djMode": false,
            "music": false,
            "update": 1.0,
        });
        room.apply_update(&first).unwrap();
        assert_eq!(room.host.as_ref().unwrap().name, "alice");

        let second = serde_json::json!({
            "users": [],
            "host": "u1",
            "talks": [],
            "djMode": false,
            "music": false,
            "update": 2.0,
        });
        room.apply_update(&second).unwrap();
        assert!(room.users.is_empty());
    }

    #[test]
    fn apply_update_resolves_text_message_after_first_snapshot() {
        let mut room = Room::new();
        room.mark_joined("drrr.com/room/?id=ABCDEFGHIJ");
        room.apply_update(&serde_json::json!({
            "users": [{"id": "u1", "name": "alice", "tripcode": ""}],
            "host": "u1",
            "talks": [],
            "djMode": false,
            "music": false,
            "update": 1.0,
        }))
        .unwrap();

        let messages = room
            .apply_update(&serde_json::json!({
                "users": [{"id": "u1", "name": "alice", "tripcode": ""}],
                "host": "u1",
                "talks": [{"type": "message", "time": 2.0, "from": {"name": "alice"}, "message": "hi"}],
                "djMode": false,
                "music": false,
                "update": 2.0,
            }))
            .unwrap();

        assert_eq!(messages.len(), 1);
        match &messages[0] {
            RoomMessage::Text { text, .. } => assert_eq!(text, "hi"),
            _ => panic!("expected text message"),
        }
    }
}
