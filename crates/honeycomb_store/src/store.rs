use std::time::Duration;

use crate::error::StoreResult;
use crate::ops::StoreBatch;

/// Callback invoked with the payload of each message on a subscribed channel.
pub type Subscriber = Box<dyn Fn(&str) + Send + Sync>;

/// The shared key/counter store the engine runs against.
///
/// Modeled on the Redis command set the engine actually needs: plain values,
/// integer counters, membership sets, per-key TTLs, atomic batches, and a
/// broadcast channel for cross-instance cache invalidation. Implementations
/// own expiry; the engine never reaps keys itself.
pub trait SharedStore: Send + Sync {
    /// Read a string value. Counters read back as their decimal form.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Batched variant of [`SharedStore::get`], one result per key in order.
    fn get_many(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Set a string value, optionally with a TTL.
    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Remove a key of any type.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Read a counter. Missing keys read as 0.
    fn counter(&self, key: &str) -> StoreResult<i64>;

    /// Read the members of a set. Missing keys read as empty.
    fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Batched variant of [`SharedStore::set_members`], one result per key
    /// in order. Candidate search issues its whole k-ring read through this.
    fn set_members_many(&self, keys: &[String]) -> StoreResult<Vec<Vec<String>>> {
        keys.iter().map(|key| self.set_members(key)).collect()
    }

    /// List live keys starting with `prefix` (heatmap zone scans).
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Apply a mutation batch atomically: either every op applies or none do.
    fn apply(&self, batch: StoreBatch) -> StoreResult<()>;

    /// Fire-and-forget broadcast to every subscriber of `channel`.
    /// Delivery is best-effort; the caller does not wait for acknowledgement.
    fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;

    /// Register a subscriber for `channel` messages published by any
    /// instance. The subscription lives for the lifetime of the store.
    fn subscribe(&self, channel: &str, subscriber: Subscriber) -> StoreResult<()>;
}
