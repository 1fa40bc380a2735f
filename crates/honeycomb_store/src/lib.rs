//! Shared key/counter store capability for the Honeycomb dispatch engine.
//!
//! The engine is stateless compute over an externally hosted store (Redis or
//! similar). This crate defines that seam:
//!
//! - **SharedStore**: get/set, counters, membership sets, TTLs, atomic
//!   batches, and a fire-and-forget broadcast channel
//! - **MemoryStore**: in-process implementation with real TTL semantics,
//!   used by every engine test and by single-node deployments
//! - **Clock**: injectable time source so TTL behavior is testable

pub mod clock;
pub mod error;
pub mod memory;
pub mod ops;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use ops::{StoreBatch, StoreOp};
pub use store::{SharedStore, Subscriber};
