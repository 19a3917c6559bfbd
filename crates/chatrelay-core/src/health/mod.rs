//! Provider health tracking
//!
//! Latency and failure statistics per `provider:model`, used by the ranker to
//! demote slow backends and by the router to skip backends in cooldown.

mod kv;
mod store;

pub use kv::{CREATE_KV_TABLE_SQL, KvStore, MemoryKvStore, SqliteKvStore};
pub use store::{
    AttemptOutcome, HEALTH_NAMESPACE, HealthPolicy, HealthRecord, HealthStore, HealthSummary,
};
