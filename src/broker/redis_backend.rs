//! Redis implementation of the `Broker` trait.

use async_trait::async_trait;
use redis::{AsyncCommands, ConnectionInfo};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::traits::Broker;
use crate::error::BrokerError;

/// Redis-backed broker.
///
/// Ordinary commands go through a reconnecting `ConnectionManager`. The
/// unbounded `BRPOP` gets its own connection: a multiplexed connection
/// answers in order, so a parked `BRPOP` would otherwise hold up heartbeat
/// and log writes.
pub struct RedisBroker {
    commands: ConnectionManager,
    blocking: Mutex<MultiplexedConnection>,
}

impl RedisBroker {
    /// Connect and verify the server answers.
    pub async fn connect(info: ConnectionInfo) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(info).map_err(|e| BrokerError::Connection(e.to_string()))?;

        // Plain connection first: it fails fast, the manager retries
        let blocking = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let commands = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        let broker = Self {
            commands,
            blocking: Mutex::new(blocking),
        };
        broker.ping().await?;

        info!("Connected to Redis");
        Ok(broker)
    }

    fn conn(&self) -> ConnectionManager {
        self.commands.clone()
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        let reply: String = redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        if reply != "PONG" {
            return Err(BrokerError::Decode {
                command: "PING".to_string(),
                reason: format!("unexpected reply {reply:?}"),
            });
        }
        Ok(())
    }

    async fn blocking_pop(&self, queues: &[String]) -> Result<(String, String), BrokerError> {
        let mut conn = self.blocking.lock().await;
        loop {
            // Timeout 0 blocks forever; a nil reply only shows up if the
            // server gives up on us, in which case we wait again.
            let popped: Option<(String, String)> = redis::cmd("BRPOP")
                .arg(queues)
                .arg(0)
                .query_async(&mut *conn)
                .await
                .map_err(|e| BrokerError::command("BRPOP", e))?;
            match popped {
                Some(pair) => return Ok(pair),
                None => debug!("BRPOP returned nil, waiting again"),
            }
        }
    }

    async fn lpush(&self, list: &str, value: &str) -> Result<(), BrokerError> {
        let _: i64 = self
            .conn()
            .lpush(list, value)
            .await
            .map_err(|e| BrokerError::command("LPUSH", e))?;
        Ok(())
    }

    async fn rpush(&self, list: &str, value: &str) -> Result<(), BrokerError> {
        let _: i64 = self
            .conn()
            .rpush(list, value)
            .await
            .map_err(|e| BrokerError::command("RPUSH", e))?;
        Ok(())
    }

    async fn lrem_all(&self, list: &str, value: &str) -> Result<usize, BrokerError> {
        // Count 0 removes every occurrence.
        let removed: usize = self
            .conn()
            .lrem(list, 0, value)
            .await
            .map_err(|e| BrokerError::command("LREM", e))?;
        Ok(removed)
    }

    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>, BrokerError> {
        match self.hget_bytes(hash, field).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| BrokerError::Decode {
                    command: "HGET".to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn hget_bytes(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, BrokerError> {
        let value: Option<Vec<u8>> = self
            .conn()
            .hget(hash, field)
            .await
            .map_err(|e| BrokerError::command("HGET", e))?;
        Ok(value)
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), BrokerError> {
        let _: i64 = self
            .conn()
            .hset(hash, field, value)
            .await
            .map_err(|e| BrokerError::command("HSET", e))?;
        Ok(())
    }

    async fn hdel(&self, hash: &str, field: &str) -> Result<bool, BrokerError> {
        let removed: i64 = self
            .conn()
            .hdel(hash, field)
            .await
            .map_err(|e| BrokerError::command("HDEL", e))?;
        Ok(removed > 0)
    }
}
