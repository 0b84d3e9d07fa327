//! Join/message hooks fired from `MessagesProcessing` (§4.5 item 3),
//! grounded in `original_source/bot/hooks.py`. Each hook returns whether it
//! "handled" the event — analogous to the source's truthy `return True`,
//! which in the pipeline's Python form stopped the remaining hooks; ours
//! mirrors that by having the caller stop iterating once a hook returns
//! `Ok(true)`.

use std::collections::HashSet;

use async_trait::async_trait;

use super::Bot;
use crate::chat::User;
use crate::models::user::BlacklistStatus;

#[async_trait]
pub trait Hook: Send + Sync {
    async fn on_join(&mut self, _bot: &mut Bot, _user: &User) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn on_message(&mut self, _bot: &mut Bot, _user: &User, _text: &str, _private: bool) -> anyhow::Result<bool> {
        Ok(false)
    }
}

/// Kicks a newly-joined user when the whitelist is switched on and they
/// are neither whitelisted, admin, nor the room's host is someone other
/// than the bot.
pub struct WhitelistHook;

#[async_trait]
impl Hook for WhitelistHook {
    async fn on_join(&mut self, bot: &mut Bot, user: &User) -> anyhow::Result<bool> {
        if !bot.whitelist_status
            || bot.profile.whitelist.contains_key(&user.name)
            || bot.is_admin_user(user)
        {
            return Ok(false);
        }
        let Some(bot_user) = bot.bot_user().cloned() else { return Ok(false) };
        if !bot.chat.room.is_host(&bot_user).unwrap_or(false) {
            return Ok(false);
        }
        bot.chat.kick(user).await?;
        Ok(true)
    }
}

/// Bans a newly-joined user who is permanently blacklisted, when the bot
/// currently holds host.
pub struct BlacklistHook;

#[async_trait]
impl Hook for BlacklistHook {
    async fn on_join(&mut self, bot: &mut Bot, user: &User) -> anyhow::Result<bool> {
        let Some(bot_user) = bot.bot_user().cloned() else { return Ok(false) };
        if !bot.chat.room.is_host(&bot_user).unwrap_or(false) {
            return Ok(false);
        }
        if bot.profile.ban_status(&user.name) != Some(BlacklistStatus::Banned) {
            return Ok(false);
        }
        bot.chat.ban(user).await?;
        Ok(true)
    }
}

/// Relays a private message to the admin, unless the admin sent it.
pub struct PrivateMessageHook;

#[async_trait]
impl Hook for PrivateMessageHook {
    async fn on_message(&mut self, bot: &mut Bot, user: &User, text: &str, private: bool) -> anyhow::Result<bool> {
        if !private || bot.is_admin_user(user) {
            return Ok(false);
        }
        if let Some(admin) = bot.admin_user().cloned() {
            bot.send_message(&format!("{}: {}", user.name, text), Some(admin), None, false);
        }
        Ok(false)
    }
}

/// Sends the help message to every user the first time they're seen.
#[derive(Default)]
pub struct NoticeHook {
    notified: HashSet<String>,
}

#[async_trait]
impl Hook for NoticeHook {
    async fn on_join(&mut self, bot: &mut Bot, user: &User) -> anyhow::Result<bool> {
        if self.notified.insert(user.name.clone()) {
            bot.send_message("help_message", Some(user.clone()), None, true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notice_hook_only_notifies_a_user_once() {
        let mut bot = Bot::for_test();
        let mut hook = NoticeHook::default();
        let user = User { id: "u1".into(), name: "alice".into(), tripcode: String::new() };
        hook.on_join(&mut bot, &user).await.unwrap();
        hook.on_join(&mut bot, &user).await.unwrap();
        // One message for the first join only.
        let mut sent = 0;
        while bot.outbox.pop_due().is_some() {
            sent += 1;
        }
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn private_message_hook_relays_to_admin() {
        let mut bot = Bot::for_test();
        bot.chat.room.mark_joined("drrr.com/room/?id=ABCDEFGHIJ");
        bot.chat.room.apply_update(&serde_json::json!({
            "users": [{"id": "admin-id", "name": "admin", "tripcode": "admintc"}],
            "host": "admin-id",
            "talks": [],
            "djMode": false,
            "music": false,
            "update": 1.0,
        }))
        .unwrap();
        let sender = User { id: "u1".into(), name: "bob".into(), tripcode: String::new() };
        let mut hook = PrivateMessageHook;
        hook.on_message(&mut bot, &sender, "help me", true).await.unwrap();
        let (text, user, _) = bot.outbox.pop_due().unwrap();
        assert_eq!(text, "bob: help me");
        assert_eq!(user.unwrap().name, "admin");
    }
}
