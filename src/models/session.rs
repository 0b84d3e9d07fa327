use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::user::{Blacklist, Groups, UserIdentity, Whitelist};

/// `room` slice of a session (§3 `room: {id, url, name}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: String,
    pub url: String,
    pub name: String,
}

/// `bot` slice of a session — the durable identity and moderation state
/// a Worker materializes into a running Bot (§3 `bot: {...}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotState {
    pub name: String,
    pub tripcode: String,
    #[serde(rename = "passcode-hash")]
    pub passcode_hash: String,
    pub icon: String,
    pub language: String,
    pub command_prefix: String,
    #[serde(default)]
    pub whitelist: Whitelist,
    #[serde(default)]
    pub blacklist: Blacklist,
    #[serde(default)]
    pub groups: Groups,
    pub user_id: Uuid,
}

/// The full record held at Redis key `session:{sid}`, TTL-refreshed on
/// every heartbeat (§3 Session, §3 Invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub room: RoomInfo,
    pub user: UserIdentity,
    pub bot: BotState,
}
