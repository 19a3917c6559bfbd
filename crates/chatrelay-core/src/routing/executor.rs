//! Single timed, cancellable attempt against one adapter

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{AttemptTrace, Phase};
use crate::error::{ProviderError, ProviderErrorKind};
use crate::health::{AttemptOutcome, HealthStore};
use crate::providers::{CompletionRequest, ProviderAdapter};

/// What one attempt produced
#[derive(Debug)]
pub struct AttemptReport {
    pub result: std::result::Result<String, ProviderError>,
    pub trace: AttemptTrace,
}

impl AttemptReport {
    /// The caller aborted the request while this attempt was running
    pub fn was_cancelled(&self) -> bool {
        matches!(&self.result, Err(e) if e.kind == ProviderErrorKind::Cancelled)
    }
}

/// Runs attempts and records their outcomes into the health store
#[derive(Debug, Clone)]
pub struct AttemptExecutor {
    health: HealthStore,
}

impl AttemptExecutor {
    pub fn new(health: HealthStore) -> Self {
        Self { health }
    }

    /// Call `adapter` once.
    ///
    /// The adapter receives a child of `cancel`. The child is cancelled once
    /// the attempt ends, whichever of completion, timeout or caller
    /// cancellation comes first, and the in-flight call is dropped.
    /// Outcomes are recorded to health unless the caller cancelled.
    pub async fn execute(
        &self,
        adapter: &dyn ProviderAdapter,
        request: &CompletionRequest,
        timeout: Duration,
        cancel: &CancellationToken,
        phase: Phase,
    ) -> AttemptReport {
        let descriptor = adapter.descriptor();
        let id = descriptor.key();
        let child = cancel.child_token();

        debug!(
            provider = %id,
            phase = %phase,
            timeout_ms = timeout.as_millis() as u64,
            "Starting attempt"
        );

        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::cancelled()),
            outcome = tokio::time::timeout(timeout, adapter.call(request, child.clone())) => {
                match outcome {
                    Ok(Ok(text)) if text.trim().is_empty() => {
                        Err(ProviderError::empty(format!("Empty response from {}", id)))
                    }
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::timeout(timeout)),
                }
            }
        };
        child.cancel();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let caller_cancelled = cancel.is_cancelled();
        match &result {
            Ok(_) => {
                info!(provider = %id, elapsed_ms = elapsed_ms, "Attempt succeeded");
            }
            Err(e) => {
                warn!(
                    provider = %id,
                    elapsed_ms = elapsed_ms,
                    kind = %e.kind,
                    status = e.status,
                    error = %e.message,
                    "Attempt failed"
                );
            }
        }

        if !caller_cancelled {
            let outcome = match &result {
                Ok(_) => AttemptOutcome::success(elapsed_ms),
                Err(e) => AttemptOutcome::failure(elapsed_ms, e.status),
            };
            self.health.record_outcome(&id, outcome).await;
        }

        let trace = AttemptTrace {
            provider_id: descriptor.provider.clone(),
            model_id: descriptor.model.clone(),
            ok: result.is_ok(),
            elapsed_ms,
            error: result.as_ref().err().map(ToString::to_string),
            status: result.as_ref().err().and_then(|e| e.status),
            phase,
            skipped: false,
        };

        AttemptReport { result, trace }
    }
}
