use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `user` slice of a session: the chat identity that requested the bot
/// (§3 `user: {id, name, tripcode, passcode-hash}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    pub tripcode: String,
    #[serde(rename = "passcode-hash")]
    pub passcode_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistStatus {
    Banned,
    Muted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub status: BlacklistStatus,
    pub reason: String,
}

/// A named permission group: members (by name) mapped to the tripcodes
/// accepted for them — an empty list accepts any tripcode (§4.5 Groups).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub permit: String,
    #[serde(default)]
    pub require_tripcode: bool,
    #[serde(default)]
    pub members: HashMap<String, Vec<String>>,
}

/// `bot.whitelist` / `bot.blacklist` / `bot.groups` maps carried in the
/// session and snapshot-written to Postgres (§3).
pub type Whitelist = HashMap<String, i64>;
pub type Blacklist = HashMap<String, BlacklistEntry>;
pub type Groups = HashMap<String, Group>;
