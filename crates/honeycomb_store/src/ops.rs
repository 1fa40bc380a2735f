//! Atomic mutation batches.
//!
//! Every cell-counter mutation in the engine (driver cell move, supply
//! increment/decrement, demand increment) is issued as one [`StoreBatch`] so
//! that partial application is never observable: a driver must not be
//! counted in two cells, or zero cells, between the halves of a move.

use std::time::Duration;

/// One mutation inside a batch. Ops apply in insertion order, so an
/// `IncrBy` that creates a key must precede the `Expire` that arms its TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Set a string value, optionally with a TTL. Overwrites any prior type.
    Put {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    /// Remove a key of any type. Missing key is a no-op.
    Delete { key: String },
    /// Add `delta` to a counter, creating it at zero first if missing.
    IncrBy { key: String, delta: i64 },
    /// Add a member to a set, creating the set if missing.
    SetAdd { key: String, member: String },
    /// Remove a member from a set. Missing key or member is a no-op.
    SetRemove { key: String, member: String },
    /// Re-arm the TTL of an existing key. Missing key is a no-op.
    Expire { key: String, ttl: Duration },
}

/// An ordered batch of mutations applied atomically by the store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StoreBatch {
    ops: Vec<StoreOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) -> Self {
        self.ops.push(StoreOp::Put {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Delete { key: key.into() });
        self
    }

    pub fn incr_by(mut self, key: impl Into<String>, delta: i64) -> Self {
        self.ops.push(StoreOp::IncrBy {
            key: key.into(),
            delta,
        });
        self
    }

    pub fn set_add(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(StoreOp::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn set_remove(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(StoreOp::SetRemove {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(StoreOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_preserves_insertion_order() {
        let batch = StoreBatch::new()
            .incr_by("a", 1)
            .expire("a", Duration::from_secs(60))
            .set_add("b", "x");

        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.ops()[0], StoreOp::IncrBy { .. }));
        assert!(matches!(batch.ops()[1], StoreOp::Expire { .. }));
        assert!(matches!(batch.ops()[2], StoreOp::SetAdd { .. }));
    }
}
