//! Per-backend health statistics
//!
//! One [`HealthRecord`] per `provider:model` key, stored as JSON in the
//! `health` namespace of a [`KvStore`]. Records are created on the first
//! recorded attempt and expire after `record_ttl` without writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::kv::{KvStore, MemoryKvStore};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Namespace holding health records
pub const HEALTH_NAMESPACE: &str = "health";

/// Tunables for health bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    /// EWMA smoothing factor in (0, 1]
    pub alpha: f64,
    /// Consecutive failures that start a cooldown
    pub failure_threshold: u32,
    /// How long after the last failure a cooldown lasts
    pub cooldown: Duration,
    /// EWMA latency above which a backend counts as slow
    pub slow_threshold_ms: f64,
    /// Expiry of an unused record
    pub record_ttl: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            alpha: 0.2,
            failure_threshold: 3,
            cooldown: Duration::from_secs(15 * 60),
            slow_threshold_ms: 2500.0,
            record_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Observed result of one attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptOutcome {
    pub ok: bool,
    pub elapsed_ms: u64,
    pub status: Option<u16>,
}

impl AttemptOutcome {
    pub fn success(elapsed_ms: u64) -> Self {
        Self {
            ok: true,
            elapsed_ms,
            status: None,
        }
    }

    pub fn failure(elapsed_ms: u64, status: Option<u16>) -> Self {
        Self {
            ok: false,
            elapsed_ms,
            status,
        }
    }
}

/// Health statistics for one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub ewma_latency_ms: f64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error_status: Option<u16>,
    /// Recorded attempts; zero means the next sample seeds the EWMA
    #[serde(default)]
    pub samples: u64,
}

impl HealthRecord {
    /// Fold one outcome into the record
    pub fn apply(&mut self, outcome: &AttemptOutcome, alpha: f64, at: DateTime<Utc>) {
        let sample = outcome.elapsed_ms as f64;
        self.ewma_latency_ms = if self.samples == 0 {
            sample
        } else {
            alpha * sample + (1.0 - alpha) * self.ewma_latency_ms
        };
        self.samples = self.samples.saturating_add(1);

        if outcome.ok {
            self.consecutive_failures = 0;
            self.last_success_at = Some(at);
            self.last_error_status = None;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure_at = Some(at);
            self.last_error_status = outcome.status;
        }
    }

    pub fn is_cooling_down_at(&self, policy: &HealthPolicy, now: DateTime<Utc>) -> bool {
        if self.consecutive_failures < policy.failure_threshold {
            return false;
        }
        let Some(last_failure) = self.last_failure_at else {
            return false;
        };
        let Ok(cooldown) = chrono::Duration::from_std(policy.cooldown) else {
            return true;
        };
        now - last_failure < cooldown
    }

    pub fn is_slow(&self, policy: &HealthPolicy) -> bool {
        self.ewma_latency_ms > policy.slow_threshold_ms
    }
}

/// Point-in-time view of one backend's health
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub id: String,
    pub ewma_latency_ms: f64,
    pub consecutive_failures: u32,
    pub is_cooling_down: bool,
    pub is_slow: bool,
}

/// Health bookkeeping over a key/value backing store
#[derive(Clone)]
pub struct HealthStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    policy: HealthPolicy,
}

impl std::fmt::Debug for HealthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthStore")
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl HealthStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            clock: Arc::new(SystemClock),
            policy: HealthPolicy::default(),
        }
    }

    /// Fresh in-process store
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: HealthPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current record, or zero state when absent, expired or unreadable
    pub async fn get(&self, id: &str) -> HealthRecord {
        match self.try_get(id).await {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to read health record, using zero state");
                HealthRecord::default()
            }
        }
    }

    async fn try_get(&self, id: &str) -> Result<Option<HealthRecord>> {
        match self.kv.get(HEALTH_NAMESPACE, id).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fold an attempt outcome into the stored record.
    ///
    /// Read-modify-write with no isolation; concurrent writers for the same
    /// key race and the last write wins. A failed write is logged and the
    /// updated record is still returned.
    pub async fn record_outcome(&self, id: &str, outcome: AttemptOutcome) -> HealthRecord {
        let mut record = self.get(id).await;
        record.apply(&outcome, self.policy.alpha, self.clock.now());

        if let Err(e) = self.write(id, &record).await {
            warn!(id = %id, error = %e, "Failed to persist health record");
        } else {
            debug!(
                id = %id,
                ok = outcome.ok,
                elapsed_ms = outcome.elapsed_ms,
                ewma_latency_ms = record.ewma_latency_ms,
                consecutive_failures = record.consecutive_failures,
                "Recorded attempt outcome"
            );
        }

        record
    }

    async fn write(&self, id: &str, record: &HealthRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.kv
            .put(HEALTH_NAMESPACE, id, &raw, Some(self.policy.record_ttl))
            .await
    }

    pub async fn is_cooling_down(&self, id: &str) -> bool {
        self.get(id)
            .await
            .is_cooling_down_at(&self.policy, self.clock.now())
    }

    /// Summaries in the order the ids were given
    pub async fn summary(&self, ids: &[String]) -> Vec<HealthSummary> {
        let now = self.clock.now();
        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            let record = self.get(id).await;
            summaries.push(HealthSummary {
                id: id.clone(),
                ewma_latency_ms: record.ewma_latency_ms,
                consecutive_failures: record.consecutive_failures,
                is_cooling_down: record.is_cooling_down_at(&self.policy, now),
                is_slow: record.is_slow(&self.policy),
            });
        }
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::health::SqliteKvStore;
    use async_trait::async_trait;
    use tempfile::tempdir;

    fn store_with_clock() -> (HealthStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let kv = Arc::new(MemoryKvStore::with_clock(clock.clone()));
        (HealthStore::new(kv).with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_missing_record_is_zero_state() {
        let store = HealthStore::in_memory();
        assert_eq!(store.get("a:m").await, HealthRecord::default());
        assert!(!store.is_cooling_down("a:m").await);
    }

    #[tokio::test]
    async fn test_ewma_seed_then_blend() {
        let store = HealthStore::in_memory();
        let first = store.record_outcome("a:m", AttemptOutcome::success(100)).await;
        assert_eq!(first.ewma_latency_ms, 100.0);

        let second = store
            .record_outcome("a:m", AttemptOutcome::failure(200, Some(500)))
            .await;
        assert!((second.ewma_latency_ms - (100.0 * 0.8 + 200.0 * 0.2)).abs() < 1e-9);
        assert_eq!(second.samples, 2);
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let store = HealthStore::in_memory();
        for _ in 0..3 {
            store
                .record_outcome("a:m", AttemptOutcome::failure(10, Some(503)))
                .await;
        }
        let record = store.get("a:m").await;
        assert_eq!(record.consecutive_failures, 3);
        assert_eq!(record.last_error_status, Some(503));

        let record = store.record_outcome("a:m", AttemptOutcome::success(10)).await;
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.last_error_status, None);
        assert!(record.last_success_at.is_some());
        assert!(record.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let (store, clock) = store_with_clock();
        for _ in 0..2 {
            store.record_outcome("a:m", AttemptOutcome::failure(10, None)).await;
        }
        assert!(!store.is_cooling_down("a:m").await);

        store.record_outcome("a:m", AttemptOutcome::failure(10, None)).await;
        assert!(store.is_cooling_down("a:m").await);

        clock.advance(chrono::Duration::minutes(14));
        assert!(store.is_cooling_down("a:m").await);

        clock.advance(chrono::Duration::minutes(1));
        assert!(!store.is_cooling_down("a:m").await);
        // The streak survives the window
        assert_eq!(store.get("a:m").await.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_zero_state() {
        let (store, clock) = store_with_clock();
        store.record_outcome("a:m", AttemptOutcome::success(300)).await;

        clock.advance(chrono::Duration::days(7) - chrono::Duration::seconds(1));
        assert_eq!(store.get("a:m").await.samples, 1);

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(store.get("a:m").await, HealthRecord::default());
    }

    #[tokio::test]
    async fn test_summary_is_stable() {
        let store = HealthStore::in_memory().with_policy(HealthPolicy {
            slow_threshold_ms: 100.0,
            ..Default::default()
        });
        store.record_outcome("a:m", AttemptOutcome::success(250)).await;

        let ids = vec!["a:m".to_string(), "b:m".to_string()];
        let first = store.summary(&ids).await;
        let second = store.summary(&ids).await;

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert!(first[0].is_slow);
        assert!(!first[1].is_slow);
        assert_eq!(first[1].id, "b:m");
    }

    #[tokio::test]
    async fn test_sqlite_backed_records_survive_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("health.db");

        {
            let kv = SqliteKvStore::connect(&db_path).await.unwrap();
            let store = HealthStore::new(Arc::new(kv));
            store
                .record_outcome("groq:llama", AttemptOutcome::failure(40, Some(429)))
                .await;
        }

        let kv = SqliteKvStore::connect(&db_path).await.unwrap();
        let store = HealthStore::new(Arc::new(kv));
        let record = store.get("groq:llama").await;
        assert_eq!(record.consecutive_failures, 1);
        assert_eq!(record.last_error_status, Some(429));
    }

    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _: &str, _: &str) -> Result<Option<String>> {
            Err(Error::InvalidInput("backing store offline".into()))
        }

        async fn put(&self, _: &str, _: &str, _: &str, _: Option<Duration>) -> Result<()> {
            Err(Error::InvalidInput("backing store offline".into()))
        }
    }

    #[tokio::test]
    async fn test_backing_failures_degrade() {
        let store = HealthStore::new(Arc::new(BrokenKv));
        assert_eq!(store.get("a:m").await, HealthRecord::default());

        let record = store.record_outcome("a:m", AttemptOutcome::failure(5, None)).await;
        assert_eq!(record.consecutive_failures, 1);
    }
}
