//! `Broker` trait — the store primitives the worker consumes.

use async_trait::async_trait;

use crate::error::BrokerError;

/// Access to the shared store: lists and hash fields.
///
/// List semantics follow Redis: `lpush` prepends, `rpush` appends and
/// `blocking_pop` takes from the tail, so `lpush` producers are served FIFO.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Round-trip to the store. Used to refuse startup when it is unreachable.
    async fn ping(&self) -> Result<(), BrokerError>;

    // ── Lists ───────────────────────────────────────────────────────

    /// Block until any of `queues` has an element, pop it from the tail and
    /// return `(queue, value)`. Waits indefinitely.
    async fn blocking_pop(&self, queues: &[String]) -> Result<(String, String), BrokerError>;

    /// Prepend `value` to `list`.
    async fn lpush(&self, list: &str, value: &str) -> Result<(), BrokerError>;

    /// Append `value` to `list`.
    async fn rpush(&self, list: &str, value: &str) -> Result<(), BrokerError>;

    /// Remove every occurrence of `value` from `list`. Returns the count.
    async fn lrem_all(&self, list: &str, value: &str) -> Result<usize, BrokerError>;

    // ── Hashes ──────────────────────────────────────────────────────

    /// Read a hash field as UTF-8 text.
    async fn hget(&self, hash: &str, field: &str) -> Result<Option<String>, BrokerError>;

    /// Read a hash field as raw bytes.
    async fn hget_bytes(&self, hash: &str, field: &str) -> Result<Option<Vec<u8>>, BrokerError>;

    /// Set a hash field, overwriting any prior value.
    async fn hset(&self, hash: &str, field: &str, value: &str) -> Result<(), BrokerError>;

    /// Delete a hash field. Returns whether it existed.
    async fn hdel(&self, hash: &str, field: &str) -> Result<bool, BrokerError>;
}
