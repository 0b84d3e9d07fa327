use std::sync::Arc;

use dashmap::DashMap;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use super::protocol::{format_request, Command, EXCHANGE_NAME, QUEUE_REGISTRY_KEY as QUEUE_KEY};
use crate::redis::RedisPool;

/// Errors a broker round-trip can fail with (§7 Transport/Capacity/State).
#[derive(Debug, Error, Clone)]
pub enum RouterError {
    #[error("bot already created")]
    AlreadyCreated,
    #[error("bot already deleted")]
    NoBot,
    #[error("no balancer is currently registered")]
    NoBalancers,
    #[error("the selected balancer has no free worker capacity")]
    NoWorkers,
    #[error("delivery to the balancer fleet failed")]
    PublishError,
    #[error("{0}")]
    Failure(String),
}

/// Tracks outstanding correlation ids and resolves them as replies arrive
/// on the router's exclusive reply queue (mirrors the Python `RPC` class).
struct Rpc {
    futures: DashMap<String, oneshot::Sender<String>>,
}

impl Rpc {
    fn new() -> Self {
        Rpc { futures: DashMap::new() }
    }

    fn register(&self) -> (String, oneshot::Receiver<String>) {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.futures.insert(correlation_id.clone(), tx);
        (correlation_id, rx)
    }

    fn resolve(&self, correlation_id: &str, body: String) {
        if let Some((_, tx)) = self.futures.remove(correlation_id) {
            let _ = tx.send(body);
        }
    }

    /// Drops every outstanding future; receivers observe a closed channel,
    /// which `publish_message` maps to `PublishError`.
    fn cancel_all(&self) {
        self.futures.clear();
    }
}

/// Front-end side client of the broker (§4.2): selects a balancer queue via
/// Redis, publishes `"{cmd}/{sid}"`, and awaits exactly one reply.
pub struct Router {
    channel: Channel,
    reply_queue: String,
    rpc: Arc<Rpc>,
    redis: RedisPool,
    lock: Mutex<()>,
}

impl Router {
    pub async fn connect(amqp_url: &str, redis: RedisPool) -> Result<Arc<Self>, lapin::Error> {
        let connection =
            Connection::connect(amqp_url, ConnectionProperties::default().with_connection_name("router".into()))
                .await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                EXCHANGE_NAME,
                ExchangeKind::Topic,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions { exclusive: true, auto_delete: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;
        let reply_queue = queue.name().to_string();

        channel
            .queue_bind(&reply_queue, EXCHANGE_NAME, &reply_queue, QueueBindOptions::default(), FieldTable::default())
            .await?;

        let rpc = Arc::new(Rpc::new());
        let router = Arc::new(Router { channel, reply_queue, rpc: rpc.clone(), redis, lock: Mutex::new(()) });

        let mut consumer = router
            .channel
            .basic_consume(&router.reply_queue, "router", BasicConsumeOptions::default(), FieldTable::default())
            .await?;
        tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                let Ok(delivery) = delivery else { continue };
                if let Some(correlation_id) =
                    delivery.properties.correlation_id().as_ref().map(|id| id.to_string())
                {
                    let body = String::from_utf8_lossy(&delivery.data).to_string();
                    rpc.resolve(&correlation_id, body);
                }
                let _ = delivery.ack(lapin::options::BasicAckOptions::default()).await;
            }
            rpc.cancel_all();
        });

        // A `mandatory: true` publish (every `publish_message` call) bounces
        // back here instead of reaching a consumer when no balancer is bound
        // to the routing key. Without this, the `oneshot` registered for
        // that correlation id in `rpc.futures` would never resolve and
        // `await_reply` would hang forever (mirrors the Python `RPC`
        // class's `on_message_return`).
        let return_rpc = rpc.clone();
        router.channel.on_return(move |returned| {
            let Some(correlation_id) =
                returned.properties.correlation_id().as_ref().map(|id| id.to_string())
            else {
                tracing::warn!("basic.return without a correlation id; dropping");
                return;
            };
            tracing::warn!(%correlation_id, reply_text = %returned.reply_text, "message returned undeliverable");
            return_rpc.resolve(&correlation_id, format!("undeliverable: {}", returned.reply_text));
        });

        Ok(router)
    }

    async fn publish_message(
        &self,
        body: Vec<u8>,
        balancer_queue: &str,
    ) -> Result<oneshot::Receiver<String>, RouterError> {
        let (correlation_id, rx) = self.rpc.register();
        let properties = BasicProperties::default()
            .with_correlation_id(correlation_id.clone().into())
            .with_reply_to(self.reply_queue.clone().into());

        let confirm = self
            .channel
            .basic_publish(
                EXCHANGE_NAME,
                balancer_queue,
                BasicPublishOptions { mandatory: true, ..Default::default() },
                &body,
                properties,
            )
            .await
            .map_err(|_| RouterError::PublishError)?
            .await
            .map_err(|_| RouterError::PublishError)?;

        if !matches!(confirm, Confirmation::Ack(_)) {
            self.rpc.futures.remove(&correlation_id);
            return Err(RouterError::PublishError);
        }

        Ok(rx)
    }

    async fn await_reply(rx: oneshot::Receiver<String>) -> Result<String, RouterError> {
        rx.await.map_err(|_| RouterError::PublishError)
    }

    /// `create`: claim a balancer queue with spare capacity, then publish
    /// `"create/{sid}"`; rolls back the Redis claim on any broker failure.
    pub async fn create(&self, session_id: &str) -> Result<(), RouterError> {
        let balancer_key = format!("balancers:{session_id}");
        let mut conn = self.redis.get().await.map_err(|_| RouterError::NoBalancers)?;

        let balancer_queue = {
            let _guard = self.lock.lock().await;

            let existing: Option<String> =
                redis::cmd("GET").arg(&balancer_key).query_async(&mut *conn).await.unwrap_or(None);
            if existing.is_some() {
                return Err(RouterError::AlreadyCreated);
            }

            let top: Vec<(String, f64)> = redis::cmd("ZRANGE")
                .arg(QUEUE_KEY)
                .arg(0)
                .arg(0)
                .arg("REV")
                .arg("WITHSCORES")
                .query_async(&mut *conn)
                .await
                .unwrap_or_default();
            let Some((queue_name, capacity)) = top.into_iter().next() else {
                return Err(RouterError::NoBalancers);
            };
            if capacity <= 0.0 {
                return Err(RouterError::NoWorkers);
            }

            let _: () = redis::cmd("SET")
                .arg(&balancer_key)
                .arg(&queue_name)
                .query_async(&mut *conn)
                .await
                .map_err(|_| RouterError::NoBalancers)?;
            let _: () = redis::cmd("ZINCRBY")
                .arg(QUEUE_KEY)
                .arg(-1)
                .arg(&queue_name)
                .query_async(&mut *conn)
                .await
                .map_err(|_| RouterError::NoBalancers)?;

            queue_name
        };

        let rx = self
            .publish_message(format_request(Command::Create, session_id).into_bytes(), &balancer_queue)
            .await;
        let rx = match rx {
            Ok(rx) => rx,
            Err(err) => {
                self.revert_create(&balancer_key, &balancer_queue).await;
                return Err(err);
            }
        };

        let reply = Self::await_reply(rx).await;
        match reply {
            Ok(body) if body.is_empty() => Ok(()),
            Ok(body) => {
                self.revert_create(&balancer_key, &balancer_queue).await;
                Err(RouterError::Failure(body))
            }
            Err(err) => {
                self.revert_create(&balancer_key, &balancer_queue).await;
                Err(err)
            }
        }
    }

    async fn revert_create(&self, balancer_key: &str, balancer_queue: &str) {
        let _guard = self.lock.lock().await;
        if let Ok(mut conn) = self.redis.get().await {
            let _: Result<(), _> = redis::cmd("DEL").arg(balancer_key).query_async(&mut *conn).await;
            let _: Result<(), _> =
                redis::cmd("ZINCRBY").arg(QUEUE_KEY).arg(1).arg(balancer_queue).query_async(&mut *conn).await;
        }
    }

    /// `delete`: release the session's claim first, then publish
    /// `"delete/{sid}"` — capacity is returned even if the broker round
    /// trip fails, since the balancer may already be gone.
    pub async fn delete(&self, session_id: &str) -> Result<(), RouterError> {
        let balancer_key = format!("balancers:{session_id}");
        let balancer_queue = {
            let _guard = self.lock.lock().await;
            let mut conn = self.redis.get().await.map_err(|_| RouterError::NoBot)?;
            let queue_name: Option<String> =
                redis::cmd("GETDEL").arg(&balancer_key).query_async(&mut *conn).await.unwrap_or(None);
            let Some(queue_name) = queue_name else {
                return Err(RouterError::NoBot);
            };
            let _: Result<(), _> =
                redis::cmd("ZINCRBY").arg(QUEUE_KEY).arg(1).arg(&queue_name).query_async(&mut *conn).await;
            queue_name
        };

        let rx = self
            .publish_message(format_request(Command::Delete, session_id).into_bytes(), &balancer_queue)
            .await?;
        let reply = Self::await_reply(rx).await?;
        if reply.is_empty() {
            Ok(())
        } else {
            Err(RouterError::Failure(reply))
        }
    }

    pub async fn close(&self) -> Result<(), lapin::Error> {
        self.channel.close(200, "shutting down").await
    }
}
