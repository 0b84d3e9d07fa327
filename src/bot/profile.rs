use chrono::Utc;
use uuid::Uuid;

use crate::bot::groups::{default_permits, GroupsManager};
use crate::models::user::{BlacklistEntry, BlacklistStatus};
use crate::models::{BotState, UserIdentity};

/// The live, mutable moderation state for one Bot — whitelist, blacklist,
/// groups, and the bot/admin identities (§3 "Bot in-memory" `profile`).
pub struct Profile {
    pub whitelist: crate::models::user::Whitelist,
    pub blacklist: crate::models::user::Blacklist,
    pub groups: GroupsManager,
    pub admin_name: String,
    pub admin_tripcode: String,
    pub bot_name: String,
    pub bot_tripcode: String,
    pub bot_passcode_hash: String,
    pub bot_icon: String,
    pub command_prefix: String,
    pub language: String,
    pub user_id: Uuid,
}

impl Profile {
    pub fn from_session(bot: &BotState, user: &UserIdentity) -> Self {
        Profile {
            whitelist: bot.whitelist.clone(),
            blacklist: bot.blacklist.clone(),
            groups: GroupsManager::new(bot.groups.clone(), default_permits()),
            admin_name: user.name.clone(),
            admin_tripcode: user.tripcode.clone(),
            bot_name: bot.name.clone(),
            bot_tripcode: bot.tripcode.clone(),
            bot_passcode_hash: bot.passcode_hash.clone(),
            bot_icon: bot.icon.clone(),
            command_prefix: bot.command_prefix.clone(),
            language: bot.language.clone(),
            user_id: bot.user_id,
        }
    }

    pub fn is_bot(&self, name: &str, tripcode: &str) -> bool {
        name == self.bot_name && tripcode == self.bot_tripcode
    }

    pub fn is_admin(&self, name: &str, tripcode: &str) -> bool {
        name == self.admin_name && tripcode == self.admin_tripcode
    }

    pub fn is_banned(&self, name: &str) -> bool {
        self.blacklist.contains_key(name)
    }

    pub fn ban_status(&self, name: &str) -> Option<BlacklistStatus> {
        self.blacklist.get(name).map(|entry| entry.status)
    }

    pub fn ban_reason(&self, name: &str) -> Option<&str> {
        self.blacklist.get(name).map(|entry| entry.reason.as_str())
    }

    pub fn add_to_whitelist(&mut self, name: &str) {
        self.whitelist.insert(name.to_string(), Utc::now().timestamp());
    }

    pub fn remove_from_whitelist(&mut self, name: &str) {
        self.whitelist.remove(name);
    }

    pub fn add_to_blacklist(&mut self, name: &str, reason: Option<&str>, permanent: bool) {
        let status = if permanent { BlacklistStatus::Banned } else { BlacklistStatus::Muted };
        self.blacklist
            .insert(name.to_string(), BlacklistEntry { status, reason: reason.unwrap_or_default().to_string() });
    }

    pub fn remove_from_blacklist(&mut self, name: &str, full: bool) {
        if full {
            self.blacklist.remove(name);
        } else if let Some(entry) = self.blacklist.get_mut(name) {
            entry.status = BlacklistStatus::Muted;
        }
    }

    pub fn user_permit(&self, name: &str, tripcode: &str) -> i64 {
        self.groups.user_permit(name, tripcode, self.is_admin(name, tripcode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BotState, UserIdentity};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn profile() -> Profile {
        let bot = BotState {
            name: "dj".into(),
            tripcode: "bottc".into(),
            passcode_hash: String::new(),
            icon: "kyo-2x".into(),
            language: "EN".into(),
            command_prefix: "-".into(),
            whitelist: HashMap::new(),
            blacklist: HashMap::new(),
            groups: HashMap::new(),
            user_id: Uuid::nil(),
        };
        let user = UserIdentity {
            id: "u1".into(),
            name: "alice".into(),
            tripcode: "abc".into(),
            passcode_hash: String::new(),
        };
        Profile::from_session(&bot, &user)
    }

    #[test]
    fn admin_identity_short_circuits_permit() {
        let p = profile();
        assert!(p.is_admin("alice", "abc"));
        assert_eq!(p.user_permit("alice", "abc"), 0);
    }

    #[test]
    fn blacklist_round_trips_full_removal() {
        let mut p = profile();
        p.add_to_blacklist("troll", Some("spam"), true);
        assert!(p.is_banned("troll"));
        p.remove_from_blacklist("troll", true);
        assert!(!p.is_banned("troll"));
    }
}
