//! Request router
//!
//! Ranks the enabled adapters for a request, then walks the ranking in two
//! phases under a shared attempt budget:
//!
//! 1. every candidate in order, skipping those in cooldown;
//! 2. if nothing succeeded, the same list again with cooldown ignored.
//!
//! The first success wins. Otherwise the whole ordered trace is returned in
//! [`Error::AllProvidersFailed`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::executor::AttemptExecutor;
use super::intent::infer_intent;
use super::ranker::{CandidateHealth, RankWeights, RankedCandidate, Ranker};
use super::types::{AskOptions, AttemptTrace, Phase, RouteRequirements, RouterResult};
use crate::error::{Error, Result};
use crate::health::{HealthStore, HealthSummary};
use crate::providers::{CompletionRequest, ProviderAdapter};

/// Configuration for the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Attempts allowed per request across both phases
    pub max_attempts: u32,
    /// Default per-attempt timeout
    pub attempt_timeout: Duration,
    /// `max_tokens` at or above which long-context backends get a bonus
    pub long_output_threshold: u32,
    /// Let phase 2 retry backends that failed hard earlier in the request
    pub retry_hard_failures: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            attempt_timeout: Duration::from_secs(20),
            long_output_threshold: 2048,
            retry_hard_failures: false,
        }
    }
}

/// Mutable state threaded through both phases of one request
#[derive(Debug)]
struct AttemptState {
    remaining_budget: u32,
    trace: Vec<AttemptTrace>,
    hard_failed: HashSet<usize>,
}

enum PhaseEnd {
    Succeeded { index: usize, text: String },
    Cancelled,
    Exhausted,
}

/// Multi-provider router
///
/// Cheap to share behind an `Arc`; concurrent requests only contend on the
/// health store's backing.
pub struct Router {
    config: RouterConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    health: HealthStore,
    ranker: Ranker,
    executor: AttemptExecutor,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("adapters", &self.adapter_ids())
            .field("health", &self.health)
            .finish()
    }
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn health(&self) -> &HealthStore {
        &self.health
    }

    /// `provider:model` of every enabled adapter, in declaration order
    pub fn adapter_ids(&self) -> Vec<String> {
        self.adapters
            .iter()
            .map(|adapter| adapter.descriptor().key())
            .collect()
    }

    /// Route a request to the best available backend
    pub async fn ask(&self, prompt: &str, options: AskOptions) -> Result<RouterResult> {
        self.ask_with_cancel(prompt, options, CancellationToken::new())
            .await
    }

    /// Like [`ask`](Self::ask), aborting remaining attempts once `cancel` fires.
    ///
    /// Health observations recorded before cancellation are kept.
    pub async fn ask_with_cancel(
        &self,
        prompt: &str,
        options: AskOptions,
        cancel: CancellationToken,
    ) -> Result<RouterResult> {
        if self.adapters.is_empty() {
            return Err(Error::Configuration(
                "no providers are enabled".to_string(),
            ));
        }
        if prompt.trim().is_empty() && options.images.is_empty() {
            return Err(Error::InvalidInput(
                "prompt is empty and no images were attached".to_string(),
            ));
        }
        if options.timeout_ms == Some(0) {
            return Err(Error::InvalidInput(
                "timeout_ms must be greater than 0".to_string(),
            ));
        }

        let span = info_span!("ask", request_id = %Uuid::new_v4());
        self.route(prompt, options, cancel).instrument(span).await
    }

    async fn route(
        &self,
        prompt: &str,
        options: AskOptions,
        cancel: CancellationToken,
    ) -> Result<RouterResult> {
        let started = Instant::now();
        let requirements = self.requirements(prompt, &options);
        let candidates = self.rank_candidates(&requirements).await;
        let request = options.to_completion(prompt);
        let timeout = options
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.attempt_timeout);

        info!(
            intent = %requirements.intent,
            needs_vision = requirements.needs_vision,
            candidates = candidates.len(),
            "Routing request"
        );

        let mut state = AttemptState {
            remaining_budget: self.config.max_attempts,
            trace: Vec::new(),
            hard_failed: HashSet::new(),
        };

        let mut end = self
            .run_phase(Phase::First, &candidates, &request, timeout, &cancel, &mut state)
            .await;

        if matches!(end, PhaseEnd::Exhausted) && state.remaining_budget > 0 {
            info!(
                remaining_budget = state.remaining_budget,
                "Phase 1 exhausted, retrying with cooldown ignored"
            );
            end = self
                .run_phase(Phase::Second, &candidates, &request, timeout, &cancel, &mut state)
                .await;
        }

        match end {
            PhaseEnd::Succeeded { index, text } => {
                let descriptor = self.adapters[index].descriptor();
                let elapsed_ms = started.elapsed().as_millis() as u64;
                info!(
                    provider = %descriptor.key(),
                    attempts = state.trace.iter().filter(|t| !t.skipped).count(),
                    elapsed_ms = elapsed_ms,
                    "Request routed"
                );
                Ok(RouterResult {
                    text,
                    provider_id: descriptor.provider.clone(),
                    model_id: descriptor.model.clone(),
                    elapsed_ms,
                    trace: state.trace,
                })
            }
            PhaseEnd::Cancelled => {
                info!(attempts = state.trace.len(), "Request cancelled by caller");
                Err(Error::Cancelled { trace: state.trace })
            }
            PhaseEnd::Exhausted => {
                warn!(attempts = state.trace.len(), "All providers failed");
                Err(Error::AllProvidersFailed { trace: state.trace })
            }
        }
    }

    /// One pass over the candidate list.
    ///
    /// Phase 1 skips backends in cooldown without spending budget. Phase 2
    /// ignores cooldown but leaves out backends that failed hard earlier in
    /// the request, unless configured otherwise.
    async fn run_phase(
        &self,
        phase: Phase,
        candidates: &[RankedCandidate],
        request: &CompletionRequest,
        timeout: Duration,
        cancel: &CancellationToken,
        state: &mut AttemptState,
    ) -> PhaseEnd {
        let respect_cooldown = phase == Phase::First;

        for candidate in candidates {
            if cancel.is_cancelled() {
                return PhaseEnd::Cancelled;
            }
            if state.remaining_budget == 0 {
                debug!(phase = %phase, "Attempt budget spent");
                break;
            }

            let adapter = &self.adapters[candidate.index];

            if !respect_cooldown
                && !self.config.retry_hard_failures
                && state.hard_failed.contains(&candidate.index)
            {
                debug!(provider = %candidate.id, "Not retrying after hard failure");
                continue;
            }

            if respect_cooldown && self.health.is_cooling_down(&candidate.id).await {
                info!(provider = %candidate.id, "Skipping provider in cooldown");
                let descriptor = adapter.descriptor();
                state.trace.push(AttemptTrace {
                    provider_id: descriptor.provider.clone(),
                    model_id: descriptor.model.clone(),
                    ok: false,
                    elapsed_ms: 0,
                    error: None,
                    status: None,
                    phase,
                    skipped: true,
                });
                continue;
            }

            let report = self
                .executor
                .execute(adapter.as_ref(), request, timeout, cancel, phase)
                .await;
            state.remaining_budget -= 1;
            let cancelled = report.was_cancelled() && cancel.is_cancelled();
            state.trace.push(report.trace);

            match report.result {
                Ok(text) => {
                    return PhaseEnd::Succeeded {
                        index: candidate.index,
                        text,
                    };
                }
                Err(_) if cancelled => return PhaseEnd::Cancelled,
                Err(e) => {
                    if !e.is_retryable() {
                        state.hard_failed.insert(candidate.index);
                    }
                }
            }
        }

        PhaseEnd::Exhausted
    }

    fn requirements(&self, prompt: &str, options: &AskOptions) -> RouteRequirements {
        let has_images = !options.images.is_empty();
        RouteRequirements {
            needs_vision: has_images,
            max_output_tokens: options.max_tokens,
            intent: infer_intent(prompt, has_images),
            prefer: options.prefer.clone(),
        }
    }

    /// Rank every enabled adapter against explicit requirements
    pub async fn rank_candidates(&self, requirements: &RouteRequirements) -> Vec<RankedCandidate> {
        let policy = self.health.policy();
        let now = self.health.now();

        let mut health = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let record = self.health.get(&adapter.descriptor().key()).await;
            health.push(CandidateHealth {
                cooling_down: record.is_cooling_down_at(policy, now),
                slow: record.is_slow(policy),
            });
        }

        let descriptors: Vec<_> = self
            .adapters
            .iter()
            .map(|adapter| adapter.descriptor())
            .collect();
        self.ranker.rank(&descriptors, &health, requirements)
    }

    /// Candidate order a request would be tried in, without calling anything
    pub async fn rank_preview(&self, prompt: &str, options: &AskOptions) -> Vec<RankedCandidate> {
        let requirements = self.requirements(prompt, options);
        self.rank_candidates(&requirements).await
    }

    /// Health snapshot for the given ids, or for every enabled adapter when
    /// `ids` is empty
    pub async fn health_summary(&self, ids: &[String]) -> Vec<HealthSummary> {
        if ids.is_empty() {
            self.health.summary(&self.adapter_ids()).await
        } else {
            self.health.summary(ids).await
        }
    }
}

/// Builder for [`Router`]
#[derive(Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    health: Option<HealthStore>,
    weights: Option<RankWeights>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Add an adapter; declaration order breaks ranking ties
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn adapters(mut self, adapters: impl IntoIterator<Item = Arc<dyn ProviderAdapter>>) -> Self {
        self.adapters.extend(adapters);
        self
    }

    /// Health store to read and record into; defaults to a private in-memory one
    pub fn health(mut self, health: HealthStore) -> Self {
        self.health = Some(health);
        self
    }

    pub fn weights(mut self, weights: RankWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn build(self) -> Router {
        let health = self.health.unwrap_or_else(HealthStore::in_memory);
        let mut ranker = Ranker::new(self.config.long_output_threshold);
        if let Some(weights) = self.weights {
            ranker = ranker.with_weights(weights);
        }

        let mut config = self.config;
        config.max_attempts = config.max_attempts.max(1);

        Router {
            config,
            adapters: self.adapters,
            executor: AttemptExecutor::new(health.clone()),
            health,
            ranker,
        }
    }
}
