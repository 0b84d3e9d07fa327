use serde::Deserialize;

use super::room::User;

/// A chat-room event as delivered by the update feed, already resolved
/// against the room's current user table.
#[derive(Debug, Clone)]
pub enum RoomMessage {
    Join { time: f64, user: User },
    Text { time: f64, user: User, text: String, private: bool },
    Music { time: f64, user: User },
}

impl RoomMessage {
    pub fn time(&self) -> f64 {
        match self {
            RoomMessage::Join { time, .. } => *time,
            RoomMessage::Text { time, .. } => *time,
            RoomMessage::Music { time, .. } => *time,
        }
    }

    pub fn user(&self) -> &User {
        match self {
            RoomMessage::Join { user, .. } => user,
            RoomMessage::Text { user, .. } => user,
            RoomMessage::Music { user, .. } => user,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(super) enum RawMessage {
    #[serde(rename = "message")]
    Text(RawTextMessage),
    #[serde(rename = "join")]
    Join(RawJoinMessage),
    #[serde(rename = "music")]
    Music(RawMusicMessage),
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTextMessage {
    pub time: f64,
    pub from: RawMessageUser,
    pub message: String,
    #[serde(default)]
    pub secret: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawJoinMessage {
    pub time: f64,
    pub user: RawMessageUser,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawMusicMessage {
    pub time: f64,
    pub from: RawMessageUser,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawMessageUser {
    pub name: String,
}
