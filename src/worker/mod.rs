//! One Worker process: hosts up to `instances_per_worker` Bots on a single
//! cooperative event loop, talking to the Balancer over a length-prefixed
//! control socket (§4.4).
//!
//! `original_source/worker/__init__.py` is OS-threaded: one event-loop
//! thread cooperative across all hosted Bots, one command receiver thread,
//! one disconnect reporter thread, one heartbeat thread. This module keeps
//! that shape but swaps OS threads for Tokio tasks talking over channels —
//! there is no `run_coroutine_threadsafe` bridge to reimplement, the
//! channels already cross task boundaries safely.
//!
//! The "selector demuxer" (§9) that multiplexes every hosted Bot's I/O
//! readiness into one process-wide sentinel has no literal analogue here:
//! Tokio's own reactor already plays that role for any real socket a Bot
//! might wait on. What we still need is a single channel the scheduling
//! loop can select on to learn *which* Bot wants attention next, so each
//! hosted Bot gets a lightweight ticker task that mirrors its own cadence
//! into that channel, tagged with its `sid` — the same "register into a
//! sentinel tagged with sid" trick, just riding Tokio's timer wheel instead
//! of a raw poller.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use crate::bot::{routines, Bot, RoutinesExecutor};
use crate::control::{self, ControlCommand, WorkerSignal};
use crate::models::{RoomInfo, Session, UserIdentity};

/// Everything a Worker needs that isn't carried in the `Session` payload
/// itself (§4.2's chat-service and extractor endpoints, plus the
/// scheduling cadences described in §4.4).
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub chat_base_url: String,
    pub chat_request_timeout: Duration,
    pub extractor_host: String,
    pub extractor_port: u16,
    pub instances_per_worker: usize,
    /// How often a heartbeat-reporter pass emits an `update` signal per
    /// hosted Bot (§4.3 `update(sid, session)`).
    pub heartbeat_interval: Duration,
    /// How often each hosted Bot's ticker mirrors its sid into the sentinel.
    pub sentinel_interval: Duration,
    /// The scheduling loop's short timeout when nothing signals the
    /// sentinel (§4.4 "select on the sentinel with a short timeout").
    pub select_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            chat_base_url: String::new(),
            chat_request_timeout: Duration::from_secs(10),
            extractor_host: "127.0.0.1".to_string(),
            extractor_port: 9000,
            instances_per_worker: 50,
            heartbeat_interval: Duration::from_secs(5),
            sentinel_interval: Duration::from_millis(200),
            select_timeout: Duration::from_millis(100),
        }
    }
}

type Writer = WriteHalf<TcpStream>;

struct HostedBot {
    bot: Bot,
    executor: RoutinesExecutor,
    room: RoomInfo,
    user: UserIdentity,
    stop_ticker: Arc<Notify>,
}

#[derive(Debug, Clone, Copy)]
enum TeardownReason {
    Disconnected,
    Deleted,
}

struct TeardownJob {
    sid: String,
    bot: Bot,
    room: RoomInfo,
    user: UserIdentity,
    reason: TeardownReason,
}

/// Connects to the Balancer's control socket and runs until it sends
/// `stop` or the connection drops.
pub async fn run(control_addr: SocketAddr, settings: WorkerSettings) -> anyhow::Result<()> {
    let stream = TcpStream::connect(control_addr).await?;
    let (reader, writer) = tokio::io::split(stream);
    let writer = Arc::new(AsyncMutex::new(writer));

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(command_receiver(reader, cmd_tx));

    let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
    tokio::spawn(disconnect_reporter(teardown_rx, writer.clone()));

    let mut worker = Worker::new(settings, writer.clone(), teardown_tx);
    let result = worker.run_loop(cmd_rx).await;
    if let Err(ref err) = result {
        tracing::error!(error = %err, "worker crashed");
        send_signal(&writer, &WorkerSignal::Crashed).await;
    }
    result
}

/// Reads control frames and forwards them to the scheduling loop; the
/// Tokio-task analogue of the source's command receiver thread.
async fn command_receiver(mut reader: ReadHalf<TcpStream>, cmd_tx: mpsc::UnboundedSender<ControlCommand>) {
    loop {
        match control::read_command(&mut reader).await {
            Ok(command) => {
                let is_stop = matches!(command, ControlCommand::Stop);
                if cmd_tx.send(command).is_err() || is_stop {
                    return;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "control channel closed while reading commands");
                return;
            }
        }
    }
}

/// Drains teardown jobs off the hot path: `returnHost → leaveRoom →
/// logout`, then replies with the matching signal frame (§4.4 item 2).
async fn disconnect_reporter(mut rx: mpsc::UnboundedReceiver<TeardownJob>, writer: Arc<AsyncMutex<Writer>>) {
    while let Some(job) = rx.recv().await {
        let TeardownJob { sid, mut bot, room, user, reason } = job;
        teardown_bot(&mut bot).await;
        let session = bot.snapshot(&room, &user);
        let signal = match reason {
            TeardownReason::Disconnected => WorkerSignal::Disconnected { sid, session: Box::new(session) },
            TeardownReason::Deleted => WorkerSignal::Deleted { sid, session: Some(Box::new(session)), error: None },
        };
        send_signal(&writer, &signal).await;
    }
}

/// `returnHost → leaveRoom → logout`, each step best-effort: a failure
/// partway through must not stop the rest of cleanup (§8 "Cleanup is
/// strictly finally-based").
async fn teardown_bot(bot: &mut Bot) {
    if let Some(bot_user) = bot.bot_user().cloned() {
        if bot.chat.room.is_host(&bot_user).unwrap_or(false) {
            if let Some(admin) = bot.admin_user().cloned() {
                if let Err(err) = bot.give_host(&admin).await {
                    tracing::warn!(sid = %bot.sid, error = %err, "returnHost failed during teardown");
                }
            }
        }
    }
    if let Err(err) = bot.chat.leave_room().await {
        tracing::warn!(sid = %bot.sid, error = %err, "leaveRoom failed during teardown");
    }
    if let Err(err) = bot.chat.logout().await {
        tracing::warn!(sid = %bot.sid, error = %err, "logout failed during teardown");
    }
}

async fn send_signal(writer: &Arc<AsyncMutex<Writer>>, signal: &WorkerSignal) {
    let mut guard = writer.lock().await;
    if let Err(err) = control::write_signal(&mut *guard, signal).await {
        tracing::error!(error = %err, "failed to write a control signal");
    }
}

struct Worker {
    settings: WorkerSettings,
    writer: Arc<AsyncMutex<Writer>>,
    teardown_tx: mpsc::UnboundedSender<TeardownJob>,
    bots: HashMap<String, HostedBot>,
    sentinel_tx: mpsc::UnboundedSender<String>,
    sentinel_rx: mpsc::UnboundedReceiver<String>,
}

impl Worker {
    fn new(settings: WorkerSettings, writer: Arc<AsyncMutex<Writer>>, teardown_tx: mpsc::UnboundedSender<TeardownJob>) -> Self {
        let (sentinel_tx, sentinel_rx) = mpsc::unbounded_channel();
        Worker { settings, writer, teardown_tx, bots: HashMap::new(), sentinel_tx, sentinel_rx }
    }

    async fn run_loop(&mut self, mut cmd_rx: mpsc::UnboundedReceiver<ControlCommand>) -> anyhow::Result<()> {
        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                command = cmd_rx.recv() => {
                    match command {
                        None => break,
                        Some(ControlCommand::Stop) => {
                            self.shutdown_all().await;
                            break;
                        }
                        Some(ControlCommand::Create { sid, session }) => self.create_instance(sid, *session).await,
                        Some(ControlCommand::Delete { sid }) => self.delete_instance(sid).await,
                    }
                }
                sid = self.sentinel_rx.recv() => {
                    if let Some(sid) = sid {
                        self.tick_one(&sid).await;
                        self.tick_all_except(&sid).await;
                    }
                }
                _ = tokio::time::sleep(self.settings.select_timeout), if !self.bots.is_empty() => {
                    self.tick_all_except("").await;
                }
                _ = heartbeat.tick() => {
                    self.report_heartbeats().await;
                }
            }
        }
        Ok(())
    }

    async fn reply(&self, signal: WorkerSignal) {
        send_signal(&self.writer, &signal).await;
    }

    async fn create_instance(&mut self, sid: String, session: Session) {
        if self.bots.contains_key(&sid) {
            self.reply(WorkerSignal::Failed { sid, reason: "already created".to_string() }).await;
            return;
        }
        match self.login_and_join(&sid, &session).await {
            Ok(bot) => {
                let room = session.room.clone();
                let user = session.user.clone();
                let stop_ticker = Arc::new(Notify::new());
                self.spawn_sentinel_ticker(sid.clone(), stop_ticker.clone());
                let executor = RoutinesExecutor::new(routines::default_pipeline());
                let reply_session = bot.snapshot(&room, &user);
                self.bots.insert(sid.clone(), HostedBot { bot, executor, room, user, stop_ticker });
                self.reply(WorkerSignal::Connected { sid, session: Box::new(reply_session) }).await;
            }
            Err(err) => {
                self.reply(WorkerSignal::Failed { sid, reason: err.to_string() }).await;
            }
        }
    }

    /// Builds a Bot, logs it in and joins its room; any failure after a
    /// successful login is cleaned up with a best-effort logout before the
    /// error is returned (§8 "Cleanup is strictly finally-based").
    async fn login_and_join(&self, sid: &str, session: &Session) -> anyhow::Result<Bot> {
        let mut bot = Bot::new(
            sid.to_string(),
            &self.settings.chat_base_url,
            self.settings.chat_request_timeout,
            &self.settings.extractor_host,
            self.settings.extractor_port,
            &session.bot,
            &session.user,
        )?;
        bot.chat.login(&session.bot.name, &session.bot.passcode_hash, &session.bot.icon).await?;
        if let Err(err) = bot.chat.join_room(&session.room.url).await {
            let _ = bot.chat.logout().await;
            return Err(err.into());
        }
        Ok(bot)
    }

    async fn delete_instance(&mut self, sid: String) {
        match self.bots.remove(&sid) {
            Some(hosted) => {
                hosted.stop_ticker.notify_one();
                let HostedBot { bot, room, user, .. } = hosted;
                let _ = self.teardown_tx.send(TeardownJob { sid, bot, room, user, reason: TeardownReason::Deleted });
            }
            None => {
                self.reply(WorkerSignal::Deleted { sid, session: None, error: Some("no such bot".to_string()) }).await;
            }
        }
    }

    async fn tick_one(&mut self, sid: &str) {
        let died = match self.bots.get_mut(sid) {
            Some(hosted) => match hosted.executor.run_tick(&mut hosted.bot).await {
                Ok(()) => !hosted.executor.running || !hosted.bot.running,
                Err(err) => {
                    tracing::error!(sid, error = %err, "bot tick raised, tearing down");
                    true
                }
            },
            None => return,
        };
        if died {
            self.evict(sid, TeardownReason::Disconnected);
        }
    }

    async fn tick_all_except(&mut self, exclude_sid: &str) {
        let sids: Vec<String> = self.bots.keys().filter(|sid| sid.as_str() != exclude_sid).cloned().collect();
        for sid in sids {
            self.tick_one(&sid).await;
        }
    }

    fn evict(&mut self, sid: &str, reason: TeardownReason) {
        if let Some(hosted) = self.bots.remove(sid) {
            hosted.stop_ticker.notify_one();
            let HostedBot { bot, room, user, .. } = hosted;
            let _ = self.teardown_tx.send(TeardownJob { sid: sid.to_string(), bot, room, user, reason });
        }
    }

    async fn report_heartbeats(&self) {
        for (sid, hosted) in &self.bots {
            let session = hosted.bot.snapshot(&hosted.room, &hosted.user);
            self.reply(WorkerSignal::Update { sid: sid.clone(), session: Box::new(session) }).await;
        }
    }

    async fn shutdown_all(&mut self) {
        let sids: Vec<String> = self.bots.keys().cloned().collect();
        for sid in sids {
            if let Some(hosted) = self.bots.remove(&sid) {
                hosted.stop_ticker.notify_one();
                let HostedBot { mut bot, room, user, .. } = hosted;
                teardown_bot(&mut bot).await;
                let session = bot.snapshot(&room, &user);
                self.reply(WorkerSignal::Disconnected { sid, session: Box::new(session) }).await;
            }
        }
    }

    fn spawn_sentinel_ticker(&self, sid: String, stop: Arc<Notify>) {
        let tx = self.sentinel_tx.clone();
        let interval = self.settings.sentinel_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if tx.send(sid.clone()).is_err() {
                            return;
                        }
                    }
                    _ = stop.notified() => return,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn test_room_and_user() -> (RoomInfo, UserIdentity) {
        (
            RoomInfo { id: "room-id".to_string(), url: "https://drrr.example/room/?id=abc".to_string(), name: "Room".to_string() },
            UserIdentity {
                id: "admin-id".to_string(),
                name: "admin".to_string(),
                tripcode: "admintc".to_string(),
                passcode_hash: String::new(),
            },
        )
    }

    fn new_worker_with_writer() -> (Worker, tokio::io::DuplexStream) {
        let (client_end, server_end) = duplex(8192);
        let (_client_reader, client_writer) = tokio::io::split(client_end);
        let writer = Arc::new(AsyncMutex::new(client_writer));
        let (teardown_tx, teardown_rx) = mpsc::unbounded_channel();
        tokio::spawn(disconnect_reporter(teardown_rx, writer.clone()));
        (Worker::new(WorkerSettings::default(), writer, teardown_tx), server_end)
    }

    #[tokio::test]
    async fn spontaneous_leave_evicts_the_bot_and_emits_disconnected() {
        let (mut worker, mut server_end) = new_worker_with_writer();

        let mut bot = Bot::for_test();
        let admin = bot.admin_user().cloned().expect("test bot has an admin in the room");
        let resolved_leave = bot.registry.parse("-leave").expect("leave parses").remove(0);
        bot.commands_queue.push_back((admin, resolved_leave, false));

        let executor = RoutinesExecutor::new(routines::default_pipeline());
        let (room, user) = test_room_and_user();
        worker.bots.insert(
            "sid-1".to_string(),
            HostedBot { bot, executor, room, user, stop_ticker: Arc::new(Notify::new()) },
        );

        worker.tick_one("sid-1").await;
        assert!(!worker.bots.contains_key("sid-1"));

        let signal = control::read_signal(&mut server_end).await.unwrap();
        match signal {
            WorkerSignal::Disconnected { sid, .. } => assert_eq!(sid, "sid-1"),
            other => panic!("expected a disconnected signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_of_unknown_sid_replies_deleted_with_error() {
        let (mut worker, mut server_end) = new_worker_with_writer();

        worker.delete_instance("missing".to_string()).await;

        let signal = control::read_signal(&mut server_end).await.unwrap();
        match signal {
            WorkerSignal::Deleted { sid, session, error } => {
                assert_eq!(sid, "missing");
                assert!(session.is_none());
                assert!(error.is_some());
            }
            other => panic!("expected a deleted(no_bot) signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_of_hosted_sid_tears_down_and_emits_deleted() {
        let (mut worker, mut server_end) = new_worker_with_writer();

        let bot = Bot::for_test();
        let executor = RoutinesExecutor::new(routines::default_pipeline());
        let (room, user) = test_room_and_user();
        worker.bots.insert(
            "sid-2".to_string(),
            HostedBot { bot, executor, room, user, stop_ticker: Arc::new(Notify::new()) },
        );

        worker.delete_instance("sid-2".to_string()).await;
        assert!(!worker.bots.contains_key("sid-2"));

        let signal = control::read_signal(&mut server_end).await.unwrap();
        match signal {
            WorkerSignal::Deleted { sid, session, error } => {
                assert_eq!(sid, "sid-2");
                assert!(session.is_some());
                assert!(error.is_none());
            }
            other => panic!("expected a deleted signal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn heartbeat_emits_an_update_per_hosted_bot() {
        let (mut worker, mut server_end) = new_worker_with_writer();

        let bot = Bot::for_test();
        let executor = RoutinesExecutor::new(routines::default_pipeline());
        let (room, user) = test_room_and_user();
        worker.bots.insert(
            "sid-3".to_string(),
            HostedBot { bot, executor, room, user, stop_ticker: Arc::new(Notify::new()) },
        );

        worker.report_heartbeats().await;

        let signal = control::read_signal(&mut server_end).await.unwrap();
        match signal {
            WorkerSignal::Update { sid, .. } => assert_eq!(sid, "sid-3"),
            other => panic!("expected an update signal, got {other:?}"),
        }
    }
}
