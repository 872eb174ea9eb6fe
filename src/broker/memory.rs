//! In-process broker backed by tokio primitives.
//!
//! Behaves like the Redis backend for every primitive the worker uses.
//! Blocking pops scan the requested queues in order, so earlier queues win
//! when several have work.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::traits::Broker;
use crate::error::BrokerError;

#[derive(Default)]
struct Data {
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, Vec<u8>>>,
}

/// In-memory store with list and hash primitives.
#[derive(Default)]
pub struct MemoryBroker {
    data: Mutex<Data>,
    pushed: Notify,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of a list, head first.
    pub async fn list(&self, list: &str) -> Vec<String> {
        self.data
            .lock()
            .await
            .lists
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Read a hash field as text, lossily.
    pub async fn hash_get(&self, hash: &str, field: &str) -> Option<String> {
        self.data
            .lock()
            .await
            .hashes
            .get(hash)
            .and_then(|h| h.get(field))
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    /// Number of fields in a hash.
    pub async fn hash_len(&self, hash: &str) -> usize {
        self.data
            .lock()
            .await
            .hashes
            .get(hash)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    /// Store binary data in a hash field.
    pub async fn hset_bytes(&self, hash: &str, field: &str, value: Vec<u8>) {
        self.data
            .lock()
            .await
            .hashes
            .entry(hash.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }

    async fn try_pop(&self, queues: &[String]) -> Option<(String, String)> {
        let mut data = self.data.lock().await;
        for queue in queues {
            if let Some(value) = data.lists.get_mut(queue).and_then(|l| l.pop_back()) {
                return Some((queue.clone(), value));
            }
        }
        None
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ping(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn blocking_pop(&self, queues: &[String]) -> Result<(String, String), BrokerError> {
        loop {
            // Register interest before scanning so a push between the scan
            // and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(popped) = self.try_pop(queues).await {
                return Ok(popped);
            }
            notified.await;
        }
    }

    async fn lpush(&self, list: &str, value: &str) -> Result<(), BrokerError> {
        self.data
            .lock()
            .await
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn rpush(&self, list: &str, value: &str) -> Result<(), BrokerError> {
        self.data
            .lock()
            .await
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn lrem_all(&self, list: &str, value: &str) -> Result<usize, BrokerError> {
        let mut data = self.data.lock().await;
        let Some(entries) = data.lists.get_mut(list) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|v| v != value);
        let removed = before - entries.len();
        if entries.is_empty() {
            data.lists.remove(list);
        }
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
        Ok(self
            .data
            .lock()
            .await
            .hashes
            .get(hash)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), BrokerError> {
        self.hset_bytes(hash, field, value.as_bytes().to_vec()).await;
        Ok(())
    }

    async fn hdel(&self, hash: &str, field: &str) -> Result<bool, BrokerError> {
        let mut data = self.data.lock().await;
        let Some(fields) = data.hashes.get_mut(hash) else {
            return Ok(false);
        };
        let existed = fields.remove(field).is_some();
        if fields.is_empty() {
            data.hashes.remove(hash);
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queues(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn lpush_then_pop_is_fifo() {
        let broker = MemoryBroker::new();
        broker.lpush("q", "first").await.unwrap();
        broker.lpush("q", "second").await.unwrap();

        let (queue, value) = broker.blocking_pop(&queues(&["q"])).await.unwrap();
        assert_eq!(queue, "q");
        assert_eq!(value, "first");
    }

    #[tokio::test]
    async fn pop_only_touches_queue_with_work() {
        let broker = MemoryBroker::new();
        broker.lpush("b", "job").await.unwrap();

        let (queue, value) = broker.blocking_pop(&queues(&["a", "b"])).await.unwrap();
        assert_eq!((queue.as_str(), value.as_str()), ("b", "job"));
        assert!(broker.list("a").await.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let broker = MemoryBroker::new();
        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.blocking_pop(&queues(&["q"])).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        broker.lpush("q", "late").await.unwrap();
        let (_, value) = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("pop should wake on push")
            .unwrap()
            .unwrap();
        assert_eq!(value, "late");
    }

    #[tokio::test]
    async fn lrem_removes_every_match() {
        let broker = MemoryBroker::new();
        for v in ["x", "y", "x", "x"] {
            broker.rpush("l", v).await.unwrap();
        }
        assert_eq!(broker.lrem_all("l", "x").await.unwrap(), 3);
        assert_eq!(broker.list("l").await, vec!["y".to_string()]);
        assert_eq!(broker.lrem_all("missing", "x").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn hash_roundtrip_and_delete() {
        let broker = MemoryBroker::new();
        broker.hset("h", "f", "v1").await.unwrap();
        broker.hset("h", "f", "v2").await.unwrap();
        assert_eq!(broker.hget("h", "f").await.unwrap().as_deref(), Some("v2"));

        assert!(broker.hdel("h", "f").await.unwrap());
        assert!(!broker.hdel("h", "f").await.unwrap());
        assert_eq!(broker.hget("h", "f").await.unwrap(), None);
        assert_eq!(broker.hash_len("h").await, 0);
    }

    #[tokio::test]
    async fn non_utf8_field_is_a_decode_error() {
        let broker = MemoryBroker::new();
        broker.hset_bytes("files", "f1", vec![0xff, 0xfe]).await;
        assert!(matches!(
            broker.hget("files", "f1").await,
            Err(BrokerError::Decode { .. })
        ));
        assert_eq!(
            broker.hget_bytes("files", "f1").await.unwrap(),
            Some(vec![0xff, 0xfe])
        );
    }
}
