pub mod commands;
pub mod executor;
pub mod groups;
pub mod hooks;
pub mod mediator;
pub mod parser;
pub mod player;
pub mod profile;
pub mod routines;
pub mod spec;
pub mod translator;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::chat::{Chat, User};
use crate::models::{BotState, Session, UserIdentity};

pub use executor::{RoutinesExecutor, Signal, Subroutine};
pub use mediator::MessageSender;
pub use player::Player;
pub use profile::Profile;
pub use spec::{CommandRegistry, ResolvedCommand};
pub use translator::Translator;

pub const COMMANDS_SPAM_DELAY: Duration = Duration::from_secs(2);

/// The full in-process state of one session's bot (§3 "Bot in-memory",
/// §4.5). This is the aggregate every [`Subroutine`] operates on — the
/// Rust translation collapses the source's `BaseMediator`/`Mediator`
/// split into a single owned struct, since nothing here is shared across
/// OS threads: a Bot lives entirely on the worker's cooperative event
/// loop, and work that the source offloads onto a thread pool is instead
/// `tokio::spawn`ed and rejoins the loop through `outbox`/`commands_queue`.
pub struct Bot {
    pub sid: String,
    pub chat: Chat,
    pub player: Player,
    pub profile: Profile,
    pub registry: CommandRegistry,
    pub translator: Translator,
    pub extractor: crate::extractor::Client,
    pub outbox: MessageSender,
    pub whitelist_status: bool,
    pub messages_queue: std::collections::VecDeque<crate::chat::RoomMessage>,
    /// `(issuer, parsed command, was-a-private-message)`, drained by
    /// `CommandsProcessing` (§4.5 item 4).
    pub commands_queue: std::collections::VecDeque<(User, ResolvedCommand, bool)>,
    pub last_command_at: HashMap<String, Instant>,
    pub exceptions: Vec<String>,
    pub running: bool,
    pub dj_mode_on: bool,
    pub search_results: Vec<crate::models::Track>,
}

impl Bot {
    pub fn new(
        sid: String,
        chat_base_url: &str,
        chat_timeout: Duration,
        extractor_host: &str,
        extractor_port: u16,
        bot: &BotState,
        user: &UserIdentity,
    ) -> anyhow::Result<Self> {
        let profile = Profile::from_session(bot, user);
        let registry = CommandRegistry::new(commands::registry(), &profile.command_prefix);
        Ok(Bot {
            sid,
            chat: Chat::new(chat_base_url, chat_timeout).context("building chat client")?,
            player: Player::new(player::DEFAULT_DURATION_LIMIT, player::DEFAULT_QUEUE_LIMIT),
            profile,
            registry,
            translator: Translator::new(HashMap::new(), bot.language.as_str()),
            extractor: crate::extractor::Client::new(extractor_host.to_string(), extractor_port),
            outbox: MessageSender::new(),
            whitelist_status: false,
            messages_queue: std::collections::VecDeque::new(),
            commands_queue: std::collections::VecDeque::new(),
            last_command_at: HashMap::new(),
            exceptions: Vec::new(),
            running: true,
            dj_mode_on: false,
            search_results: Vec::new(),
        })
    }

    /// Builds a Bot with no live chat connection, for unit tests that only
    /// need the executor/player/profile machinery.
    #[cfg(test)]
    pub fn for_test() -> Self {
        use std::collections::HashMap as Map;
        let bot_state = BotState {
            name: "dj".into(),
            tripcode: "bottc".into(),
            passcode_hash: String::new(),
            icon: "kyo-2x".into(),
            language: "EN".into(),
            command_prefix: "-".into(),
            whitelist: Map::new(),
            blacklist: Map::new(),
            groups: Map::new(),
            user_id: uuid::Uuid::nil(),
        };
        let user = UserIdentity { id: "admin-id".into(), name: "admin".into(), tripcode: "admintc".into(), passcode_hash: String::new() };
        Bot::new("test-sid".into(), "https://drrr.example", Duration::from_secs(30), "127.0.0.1", 0, &bot_state, &user).expect("test bot")
    }

    pub fn snapshot(&self, room: &crate::models::RoomInfo, user: &UserIdentity) -> Session {
        Session {
            room: room.clone(),
            user: user.clone(),
            bot: BotState {
                name: self.profile.bot_name.clone(),
                tripcode: self.profile.bot_tripcode.clone(),
                passcode_hash: self.profile.bot_passcode_hash.clone(),
                icon: self.profile.bot_icon.clone(),
                language: self.profile.language.clone(),
                command_prefix: self.profile.command_prefix.clone(),
                whitelist: self.profile.whitelist.clone(),
                blacklist: self.profile.blacklist.clone(),
                groups: self.profile.groups.snapshot(),
                user_id: self.profile.user_id,
            },
        }
    }

    // --- mediator-facade methods (§4.5, grounded in bot/mediator.py's Mediator) ---

    pub fn is_player_available(&self) -> bool {
        let Some(bot_user) = self.bot_user() else { return false };
        self.chat.room.music && (!self.chat.room.dj_mode || self.chat.room.is_host(bot_user).unwrap_or(false))
    }

    pub fn admin_user(&self) -> Option<&User> {
        self.chat.room.get_user(&self.profile.admin_name)
    }

    pub fn bot_user(&self) -> Option<&User> {
        self.chat.room.get_user(&self.profile.bot_name)
    }

    pub fn is_admin_user(&self, user: &User) -> bool {
        self.profile.is_admin(&user.name, &user.tripcode)
    }

    pub fn is_bot_user(&self, user: &User) -> bool {
        self.profile.is_bot(&user.name, &user.tripcode)
    }

    pub fn user_permit(&self, user: &User) -> i64 {
        self.profile.user_permit(&user.name, &user.tripcode)
    }

    pub fn check_permit(&self, group: &str, user: &User) -> Result<bool, groups::GroupsError> {
        self.profile.groups.check_permit(group, &user.name, &user.tripcode, self.is_admin_user(user))
    }

    pub fn add_user_to_group(&mut self, group: &str, user: &User) -> Result<(), groups::GroupsError> {
        let tripcode = if user.tripcode.is_empty() { None } else { Some(user.tripcode.as_str()) };
        self.profile.groups.add_user(group, &user.name, tripcode)
    }

    pub fn remove_user_from_group(&mut self, group: &str, user: &User) {
        self.profile.groups.remove_user(group, &user.name);
    }

    pub fn switch_whitelist_status(&mut self) -> bool {
        self.whitelist_status = !self.whitelist_status;
        self.whitelist_status
    }

    pub async fn give_host(&mut self, user: &User) -> Result<(), crate::chat::ChatApiError> {
        let is_bot_host = self.bot_user().map(|bu| self.chat.room.is_host(bu).unwrap_or(false)).unwrap_or(false);
        if is_bot_host {
            self.chat.give_host(user).await?;
        }
        Ok(())
    }

    /// Enqueues a message onto the rate-limited outbound sender,
    /// translating `msg` as a label unless `translate` is false.
    pub fn send_message(&mut self, msg: &str, user: Option<User>, url: Option<String>, translate: bool) {
        let text = if translate { self.translator.translate(msg) } else { msg.to_string() };
        self.outbox.enqueue(text, user, url);
    }

    pub fn send_error(&mut self, error: &str, user: Option<User>, url: Option<String>, translate: bool) {
        self.send_message(error, user, url, translate);
    }

    /// §4.5 item 1: re-raise any background-task exception, terminating
    /// the Bot (translated as `Err` propagating out of the executor tick).
    pub fn take_exception(&mut self) -> Option<String> {
        if self.exceptions.is_empty() {
            None
        } else {
            Some(self.exceptions.remove(0))
        }
    }

    pub fn record_exception(&mut self, err: impl std::fmt::Display) {
        self.exceptions.push(err.to_string());
    }
}
