//! Command handlers (§4.5 item 4 "ExecuteCommand"), grounded in
//! `original_source/bot/commands.py`. The dynamic `getattr(commands,
//! spec.name)` dispatch from the source is replaced by the static `match`
//! in [`dispatch`] per §9 "Dynamic command dispatch".

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::spec::{CommandSpec, FlagSpec};
use super::Bot;
use crate::chat::User;

#[derive(Debug, Error)]
pub enum CommandError {
    /// User made a mistake (bad argument, missing resource): shown verbatim.
    #[error("{0}")]
    Command(String),
    /// A context guard (`dj_mode`/`require_host`/`require_player`) refused.
    #[error("{0}")]
    Context(String),
    /// Refused, but worth a server-side log line too.
    #[error("{0}")]
    Mod(String),
}

fn flag_values<'a>(flags: &'a [(Arc<FlagSpec>, Vec<String>)], name: &str) -> Option<&'a [String]> {
    flags.iter().find(|(spec, _)| spec.name == name).map(|(_, values)| values.as_slice())
}

fn has_flag(flags: &[(Arc<FlagSpec>, Vec<String>)], name: &str) -> bool {
    flags.iter().any(|(spec, _)| spec.name == name)
}

fn validate_index(raw: &str, min_index: i64, max_index: i64, error_msg: &str) -> Result<i64, CommandError> {
    let value: i64 = raw.parse().map_err(|_| CommandError::Command(error_msg.to_string()))?;
    if value < min_index || value > max_index {
        return Err(CommandError::Command(error_msg.to_string()));
    }
    Ok(value)
}

fn shorten(s: &str, size: usize) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() > size {
        let truncated: String = trimmed.chars().take(size).collect();
        format!("{truncated}…")
    } else {
        trimmed.to_string()
    }
}

fn queue_message(queue: &[crate::models::Track], page: i64, page_size: i64) -> String {
    let start = ((page - 1) * page_size).max(0) as usize;
    queue
        .iter()
        .enumerate()
        .skip(start)
        .take(page_size as usize)
        .map(|(i, track)| format!("{}. {}\nyoutu.be/{}", i + 1, shorten(&track.title, 20), track.origin_id))
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_user(issuer: &User, private: bool) -> Option<User> {
    if private {
        Some(issuer.clone())
    } else {
        None
    }
}

/// Dispatches one parsed, authorized command. `private` carries whether
/// the triggering message was a DRRR private message (replies are
/// targeted back to the sender only in that case, per `Mediator.to_user`).
pub async fn dispatch(
    bot: &mut Bot,
    issuer: &User,
    name: &str,
    values: &[String],
    flags: &[(Arc<FlagSpec>, Vec<String>)],
    private: bool,
) -> Result<(), CommandError> {
    let reply_user = to_user(issuer, private);
    match name {
        "help" => {
            let is_moder = bot.check_permit("moder", issuer).unwrap_or(false);
            let user = if is_moder {
                if let Some([name]) = values.first().map(|n| [n.clone()]) {
                    Some(bot.chat.room.get_user_or_raise(&name).map_err(|e| CommandError::Command(e.to_string()))?.clone())
                } else if has_flag(flags, "public") {
                    None
                } else {
                    reply_user
                }
            } else {
                reply_user
            };
            bot.send_message("help_message", user, None, true);
            Ok(())
        }
        "leave" => {
            if let Some(admin) = bot.admin_user().cloned() {
                bot.give_host(&admin).await.map_err(|e| CommandError::Mod(e.to_string()))?;
            }
            bot.chat.leave_room().await.map_err(|e| CommandError::Mod(e.to_string()))?;
            Ok(())
        }
        "give_host" => {
            require_host(bot)?;
            let target = match values.first() {
                Some(name) => Some(bot.chat.room.get_user_or_raise(name).map_err(|e| CommandError::Command(e.to_string()))?.clone()),
                None => bot.admin_user().cloned(),
            };
            if let Some(user) = target {
                bot.give_host(&user).await.map_err(|e| CommandError::Mod(e.to_string()))?;
            }
            Ok(())
        }
        "add_moder" | "add_dj" => {
            let group = if name == "add_moder" { "moder" } else { "dj" };
            let target_name = values.first().ok_or_else(|| CommandError::Command("name required".into()))?;
            let user = bot.chat.room.get_user_or_raise(target_name).map_err(|e| CommandError::Command(e.to_string()))?.clone();
            bot.add_user_to_group(group, &user).map_err(|e| CommandError::Command(e.to_string()))?;
            Ok(())
        }
        "remove_moder" | "remove_dj" => {
            let group = if name == "remove_moder" { "moder" } else { "dj" };
            let target_name = values.first().ok_or_else(|| CommandError::Command("name required".into()))?;
            bot.profile.groups.remove_user(group, target_name);
            Ok(())
        }
        "add_to_whitelist" => {
            let target_name = values.first().ok_or_else(|| CommandError::Command("name required".into()))?;
            bot.profile.add_to_whitelist(target_name);
            Ok(())
        }
        "remove_from_whitelist" => {
            let target_name = values.first().ok_or_else(|| CommandError::Command("name required".into()))?;
            bot.profile.remove_from_whitelist(target_name);
            Ok(())
        }
        "whitelist" => {
            require_host(bot)?;
            let status = bot.switch_whitelist_status();
            bot.send_message(if status { "whitelist_on" } else { "whitelist_off" }, reply_user, None, true);
            Ok(())
        }
        "whitelist_status" => {
            let label = if bot.whitelist_status { "whitelist_on" } else { "whitelist_off" };
            bot.send_message(label, reply_user, None, true);
            Ok(())
        }
        "block_commands" => {
            let target_name = values.first().ok_or_else(|| CommandError::Command("name required".into()))?;
            let reason = values.get(1).cloned();
            let user = bot.chat.room.get_user_or_raise(target_name).map_err(|e| CommandError::Command(e.to_string()))?.clone();
            if bot.is_admin_user(&user) || bot.is_bot_user(&user) {
                return Ok(());
            }
            bot.profile.add_to_blacklist(target_name, reason.as_deref(), false);
            Ok(())
        }
        "kick" => {
            require_host(bot)?;
            let target_name = values.first().ok_or_else(|| CommandError::Command("name required".into()))?;
            let user = bot.chat.room.get_user_or_raise(target_name).map_err(|e| CommandError::Command(e.to_string()))?.clone();
            if bot.is_admin_user(&user) || bot.is_bot_user(&user) {
                return Ok(());
            }
            bot.chat.kick(&user).await.map_err(|e| CommandError::Mod(e.to_string()))?;
            if has_flag(flags, "block_commands") {
                bot.profile.add_to_blacklist(target_name, None, false);
            }
            Ok(())
        }
        "ban" => {
            require_host(bot)?;
            let target_name = values.first().ok_or_else(|| CommandError::Command("name required".into()))?;
            let reason = flag_values(flags, "reason").and_then(|v| v.first()).cloned();
            let permanent = has_flag(flags, "permanent");
            let user = bot.chat.room.get_user_or_raise(target_name).map_err(|e| CommandError::Command(e.to_string()))?.clone();
            if bot.is_admin_user(&user) || bot.is_bot_user(&user) {
                return Ok(());
            }
            bot.chat.ban(&user).await.map_err(|e| CommandError::Mod(e.to_string()))?;
            bot.profile.add_to_blacklist(target_name, reason.as_deref(), permanent);
            Ok(())
        }
        "unban" => {
            let target_name = values.first().ok_or_else(|| CommandError::Command("name required".into()))?;
            bot.profile.remove_from_blacklist(target_name, has_flag(flags, "full"));
            Ok(())
        }
        "dj_mode" => {
            bot.dj_mode_on = !bot.dj_mode_on;
            let label = if bot.dj_mode_on { "dj_mode_on" } else { "dj_mode_off" };
            bot.send_message(label, None, None, true);
            Ok(())
        }
        "queue" => {
            let page = validate_index(values.first().map(String::as_str).unwrap_or("1"), 1, i64::MAX, "Invalid page value")?;
            let text = if bot.player.queue.is_empty() {
                "Queue is empty".to_string()
            } else {
                queue_message(&bot.player.queue, page, 3)
            };
            bot.send_message(&text, reply_user, None, false);
            Ok(())
        }
        "search_results" => {
            let text = if bot.search_results.is_empty() {
                "Nothing was searched yet".to_string()
            } else {
                queue_message(&bot.search_results, 1, bot.search_results.len() as i64)
            };
            bot.send_message(&text, reply_user, None, false);
            Ok(())
        }
        "play" => {
            require_dj_mode(bot, issuer)?;
            require_player(bot)?;
            let url = values.first().ok_or_else(|| CommandError::Command("url required".into()))?.clone();
            bot.send_message("Extracting track...", reply_user.clone(), None, false);
            let track = bot.extractor.extract(&url).await.map_err(|e| CommandError::Command(e.to_string()))?;
            add_track(bot, track, has_flag(flags, "force"), None)?;
            Ok(())
        }
        "search" => {
            require_dj_mode(bot, issuer)?;
            require_player(bot)?;
            bot.send_message("Searching...", reply_user.clone(), None, false);
            let tracks = bot.extractor.search(&values.join(" ")).await.map_err(|e| CommandError::Command(e.to_string()))?;
            let formatted = queue_message(&tracks, 1, tracks.len().max(1) as i64);
            bot.search_results = tracks;
            bot.send_message(&formatted, reply_user, None, false);
            Ok(())
        }
        "choose" => {
            require_dj_mode(bot, issuer)?;
            require_player(bot)?;
            if bot.search_results.is_empty() {
                return Err(CommandError::Command("No search results".into()));
            }
            let number = validate_index(values.first().map(String::as_str).unwrap_or("1"), 1, 3, "Invalid number value")?;
            let index = (number - 1) as usize;
            let track = bot
                .search_results
                .get(index)
                .cloned()
                .ok_or_else(|| CommandError::Command("Invalid number value".to_string()))?;
            bot.search_results.clear();
            add_track(bot, track, has_flag(flags, "force"), None)?;
            Ok(())
        }
        "repeat" => {
            require_dj_mode(bot, issuer)?;
            bot.player.repeat = !bot.player.repeat;
            let label = if bot.player.repeat { "Repeat on" } else { "Repeat off" };
            bot.send_message(label, reply_user, None, false);
            Ok(())
        }
        "next" => {
            require_dj_mode(bot, issuer)?;
            bot.player.reset_timestamp();
            bot.send_message("Skipping current track", reply_user, None, false);
            Ok(())
        }
        "remove_song" => {
            require_dj_mode(bot, issuer)?;
            let index = validate_index(values.first().map(String::as_str).unwrap_or("1"), 1, i64::MAX, "Invalid index value")?;
            bot.player.pop_track((index - 1) as usize).map_err(|e| CommandError::Command(e.to_string()))?;
            bot.send_message("Track removed", reply_user, None, false);
            Ok(())
        }
        "clear_queue" => {
            require_dj_mode(bot, issuer)?;
            bot.player.clear_queue();
            bot.send_message("Queue cleared", reply_user, None, false);
            Ok(())
        }
        "pause" => {
            require_dj_mode(bot, issuer)?;
            bot.player.pause();
            bot.send_message("Player paused", reply_user, None, false);
            Ok(())
        }
        "unpause" => {
            require_dj_mode(bot, issuer)?;
            bot.player.unpause();
            bot.send_message("Player unpaused", reply_user, None, false);
            Ok(())
        }
        other => Err(CommandError::Command(format!("no such command as <{other}>"))),
    }
}

/// `add_track`: not itself user-addressable (it has no registry entry);
/// invoked by `play`/`choose` once a track has been extracted.
pub fn add_track(bot: &mut Bot, track: crate::models::Track, force: bool, index: Option<usize>) -> Result<(), CommandError> {
    if force {
        bot.player.add_track(track, Some(0), true, true).map_err(|e| CommandError::Command(e.to_string()))?;
        bot.player.reset_timestamp();
    } else {
        bot.player.add_track(track, index, false, false).map_err(|e| CommandError::Command(e.to_string()))?;
    }
    Ok(())
}

fn require_host(bot: &Bot) -> Result<(), CommandError> {
    let Some(bot_user) = bot.bot_user() else {
        return Err(CommandError::Context("Bot must be host to execute this command".into()));
    };
    if bot.chat.room.is_host(bot_user).unwrap_or(false) {
        Ok(())
    } else {
        Err(CommandError::Context("Bot must be host to execute this command".into()))
    }
}

fn require_player(bot: &Bot) -> Result<(), CommandError> {
    if bot.is_player_available() {
        Ok(())
    } else {
        Err(CommandError::Context("Player not available in this room".into()))
    }
}

fn require_dj_mode(bot: &Bot, issuer: &User) -> Result<(), CommandError> {
    if bot.dj_mode_on && !bot.check_permit("dj", issuer).unwrap_or(false) {
        return Err(CommandError::Context("Not enough rights to use this command in dj mode".into()));
    }
    Ok(())
}

fn spec(
    name: &str,
    permit: &str,
    aliases: &[&str],
    require_value: bool,
    multiple_values: bool,
    batch_values: bool,
    threaded: bool,
    flags: Vec<FlagSpec>,
) -> CommandSpec {
    CommandSpec {
        name: name.to_string(),
        permit: permit.to_string(),
        aliases: aliases.iter().map(|s| s.to_string()).collect(),
        flags: flags.into_iter().map(|f| (f.name.clone(), Arc::new(f))).collect::<HashMap<_, _>>(),
        require_value,
        multiple_values,
        batch_values,
        threaded,
        terminates: false,
    }
}

fn flag(name: &str, permit: &str, aliases: &[&str], require_value: bool, multiple_values: bool) -> FlagSpec {
    FlagSpec {
        name: name.to_string(),
        permit: permit.to_string(),
        aliases: aliases.iter().map(|s| s.to_string()).collect(),
        require_value,
        multiple_values,
    }
}

/// The full command table (§9 "Dynamic command dispatch" static
/// registry), one entry per user-addressable command in
/// `original_source/bot/commands.py`.
pub fn registry() -> Vec<CommandSpec> {
    vec![
        spec("help", "user", &["h"], false, false, true, false, vec![flag("public", "user", &[], false, false)]),
        CommandSpec { terminates: true, ..spec("leave", "admin", &["l"], false, false, true, false, vec![]) },
        spec("give_host", "moder", &["host"], false, false, true, false, vec![]),
        spec("add_moder", "admin", &[], true, false, true, false, vec![]),
        spec("remove_moder", "admin", &[], true, false, true, false, vec![]),
        spec("add_dj", "moder", &[], true, false, true, false, vec![]),
        spec("remove_dj", "moder", &[], true, false, true, false, vec![]),
        spec("add_to_whitelist", "moder", &["allow"], true, false, true, false, vec![]),
        spec("remove_from_whitelist", "moder", &["disallow"], true, false, true, false, vec![]),
        spec("whitelist", "moder", &[], false, false, true, false, vec![]),
        spec("whitelist_status", "user", &[], false, false, true, false, vec![]),
        spec(
            "block_commands",
            "moder",
            &["mute"],
            true,
            true,
            true,
            false,
            vec![],
        ),
        spec(
            "kick",
            "moder",
            &[],
            true,
            false,
            true,
            false,
            vec![flag("block_commands", "moder", &[], false, false)],
        ),
        spec(
            "ban",
            "moder",
            &[],
            true,
            false,
            true,
            false,
            vec![
                flag("reason", "moder", &[], true, false),
                flag("permanent", "moder", &[], false, false),
            ],
        ),
        spec("unban", "moder", &[], true, false, true, false, vec![flag("full", "moder", &[], false, false)]),
        spec("dj_mode", "moder", &[], false, false, true, false, vec![]),
        spec("queue", "user", &["q"], false, false, true, false, vec![]),
        spec("search_results", "dj", &["results"], false, false, true, false, vec![]),
        spec(
            "play",
            "dj",
            &["p"],
            true,
            false,
            true,
            true,
            vec![flag("force", "dj", &["f"], false, false)],
        ),
        spec("search", "dj", &["s"], true, true, true, true, vec![]),
        spec("choose", "dj", &["c"], false, false, true, true, vec![flag("force", "dj", &["f"], false, false)]),
        spec("repeat", "dj", &[], false, false, true, false, vec![]),
        spec("next", "dj", &["skip"], false, false, true, false, vec![]),
        spec("remove_song", "dj", &["rm"], false, false, true, false, vec![]),
        spec("clear_queue", "dj", &["clear"], false, false, true, false, vec![]),
        spec("pause", "dj", &[], false, false, true, false, vec![]),
        spec("unpause", "dj", &["resume"], false, false, true, false, vec![]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User { id: format!("{name}-id"), name: name.to_string(), tripcode: String::new() }
    }

    #[tokio::test]
    async fn whitelist_status_reports_off_by_default() {
        let mut bot = Bot::for_test();
        let issuer = user("alice");
        dispatch(&mut bot, &issuer, "whitelist_status", &[], &[], false).await.unwrap();
        let (text, _, _) = bot.outbox.pop_due().unwrap();
        assert_eq!(text, "whitelist_off");
    }

    #[tokio::test]
    async fn dj_mode_rejects_non_dj_when_active() {
        let mut bot = Bot::for_test();
        bot.dj_mode_on = true;
        let issuer = user("rando");
        let err = dispatch(&mut bot, &issuer, "pause", &[], &[], false).await.unwrap_err();
        assert!(matches!(err, CommandError::Context(_)));
    }

    #[tokio::test]
    async fn queue_reports_empty_queue() {
        let mut bot = Bot::for_test();
        let issuer = user("alice");
        dispatch(&mut bot, &issuer, "queue", &[], &[], false).await.unwrap();
        let (text, _, _) = bot.outbox.pop_due().unwrap();
        assert_eq!(text, "Queue is empty");
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let mut bot = Bot::for_test();
        let issuer = user("alice");
        let err = dispatch(&mut bot, &issuer, "nope", &[], &[], false).await.unwrap_err();
        assert!(matches!(err, CommandError::Command(_)));
    }
}
