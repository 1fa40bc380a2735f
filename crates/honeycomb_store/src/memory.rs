//! In-process [`SharedStore`] with real TTL semantics.
//!
//! Expired keys are dropped lazily on access; there is no background
//! reaper, matching the production store where expiry is the store's job.
//! Batches apply under a single lock: they validate first, then mutate, so a
//! bad op can never leave a batch half-applied.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::ops::{StoreBatch, StoreOp};
use crate::store::{SharedStore, Subscriber};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Counter(i64),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at_ms, Some(deadline) if deadline <= now_ms)
    }
}

/// In-memory shared store. Cloneable via `Arc`; all state lives behind
/// internal locks so one instance can back many engine components.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    subscribers: Mutex<HashMap<String, Vec<Arc<Subscriber>>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Store driven by the system clock (single-node production setups).
    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    fn lock_entries(&self) -> StoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".into()))
    }

    /// Read a live entry, dropping it first if its TTL has lapsed.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now_ms: u64,
    ) -> Option<&'a mut Entry> {
        let expired = entries.get(key).is_some_and(|entry| entry.is_expired(now_ms));
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get_mut(key)
    }

    /// Reject ops that would hit a live key of the wrong type. Runs before
    /// any mutation so a failing batch leaves the store untouched.
    fn check_op(
        entries: &mut HashMap<String, Entry>,
        op: &StoreOp,
        now_ms: u64,
    ) -> StoreResult<()> {
        match op {
            StoreOp::IncrBy { key, .. } => match Self::live(entries, key, now_ms) {
                None | Some(Entry { value: Value::Counter(_), .. }) => Ok(()),
                Some(_) => Err(StoreError::TypeMismatch { key: key.clone() }),
            },
            StoreOp::SetAdd { key, .. } | StoreOp::SetRemove { key, .. } => {
                match Self::live(entries, key, now_ms) {
                    None | Some(Entry { value: Value::Set(_), .. }) => Ok(()),
                    Some(_) => Err(StoreError::TypeMismatch { key: key.clone() }),
                }
            }
            StoreOp::Put { .. } | StoreOp::Delete { .. } | StoreOp::Expire { .. } => Ok(()),
        }
    }

    fn apply_op(entries: &mut HashMap<String, Entry>, op: StoreOp, now_ms: u64) {
        match op {
            StoreOp::Put { key, value, ttl } => {
                entries.insert(
                    key,
                    Entry {
                        value: Value::Text(value),
                        expires_at_ms: ttl.map(|ttl| now_ms + ttl.as_millis() as u64),
                    },
                );
            }
            StoreOp::Delete { key } => {
                entries.remove(&key);
            }
            StoreOp::IncrBy { key, delta } => match Self::live(entries, &key, now_ms) {
                Some(Entry { value: Value::Counter(current), .. }) => *current += delta,
                _ => {
                    entries.insert(
                        key,
                        Entry {
                            value: Value::Counter(delta),
                            expires_at_ms: None,
                        },
                    );
                }
            },
            StoreOp::SetAdd { key, member } => match Self::live(entries, &key, now_ms) {
                Some(Entry { value: Value::Set(members), .. }) => {
                    members.insert(member);
                }
                _ => {
                    entries.insert(
                        key,
                        Entry {
                            value: Value::Set(BTreeSet::from([member])),
                            expires_at_ms: None,
                        },
                    );
                }
            },
            StoreOp::SetRemove { key, member } => {
                if let Some(Entry { value: Value::Set(members), .. }) =
                    Self::live(entries, &key, now_ms)
                {
                    members.remove(&member);
                    if members.is_empty() {
                        entries.remove(&key);
                    }
                }
            }
            StoreOp::Expire { key, ttl } => {
                if let Some(entry) = Self::live(entries, &key, now_ms) {
                    entry.expires_at_ms = Some(now_ms + ttl.as_millis() as u64);
                }
            }
        }
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.lock_entries()?;
        match Self::live(&mut entries, key, now_ms) {
            None => Ok(None),
            Some(Entry { value: Value::Text(text), .. }) => Ok(Some(text.clone())),
            Some(Entry { value: Value::Counter(count), .. }) => Ok(Some(count.to_string())),
            Some(Entry { value: Value::Set(_), .. }) => {
                Err(StoreError::TypeMismatch { key: key.to_owned() })
            }
        }
    }

    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.apply(StoreBatch::new().put(key, value, ttl))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.apply(StoreBatch::new().delete(key))
    }

    fn counter(&self, key: &str) -> StoreResult<i64> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.lock_entries()?;
        match Self::live(&mut entries, key, now_ms) {
            None => Ok(0),
            Some(Entry { value: Value::Counter(count), .. }) => Ok(*count),
            Some(_) => Err(StoreError::TypeMismatch { key: key.to_owned() }),
        }
    }

    fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.lock_entries()?;
        match Self::live(&mut entries, key, now_ms) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::Set(members), .. }) => {
                Ok(members.iter().cloned().collect())
            }
            Some(_) => Err(StoreError::TypeMismatch { key: key.to_owned() }),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let now_ms = self.clock.now_ms();
        let entries = self.lock_entries()?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now_ms))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn apply(&self, batch: StoreBatch) -> StoreResult<()> {
        let now_ms = self.clock.now_ms();
        let mut entries = self.lock_entries()?;
        for op in batch.ops() {
            Self::check_op(&mut entries, op, now_ms)?;
        }
        for op in batch.into_ops() {
            Self::apply_op(&mut entries, op, now_ms);
        }
        Ok(())
    }

    fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        // Clone the subscriber list out of the lock so a subscriber that
        // publishes in turn cannot deadlock.
        let subscribers: Vec<Arc<Subscriber>> = {
            let registry = self
                .subscribers
                .lock()
                .map_err(|_| StoreError::Unavailable("subscriber mutex poisoned".into()))?;
            registry.get(channel).cloned().unwrap_or_default()
        };
        for subscriber in subscribers {
            (*subscriber)(payload);
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str, subscriber: Subscriber) -> StoreResult<()> {
        let mut registry = self
            .subscribers
            .lock()
            .map_err(|_| StoreError::Unavailable("subscriber mutex poisoned".into()))?;
        registry
            .entry(channel.to_owned())
            .or_default()
            .push(Arc::new(subscriber));
        Ok(())
    }
}
