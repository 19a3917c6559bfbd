//! Candidate scoring and ordering
//!
//! Scores are plain integers built from the descriptor and the request's
//! requirements. Health does not move a candidate: cooldown is enforced by the
//! router's first phase, and the flags are only reported alongside the score.
//! Sorting is stable, so equal scores keep declaration order. Caller
//! preferences are placed ahead of the scored order.

use serde::Serialize;

use super::types::RouteRequirements;
use crate::providers::{ProviderDescriptor, Tier};

/// Additive score adjustments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankWeights {
    pub strength_match: i64,
    pub vision_missing: i64,
    pub vision_match: i64,
    pub free_tier: i64,
    pub cheap_tier: i64,
    pub long_context: i64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            strength_match: 3,
            vision_missing: -1000,
            vision_match: 5,
            free_tier: 2,
            cheap_tier: 1,
            long_context: 1,
        }
    }
}

/// Health flags reported with each candidate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateHealth {
    pub cooling_down: bool,
    pub slow: bool,
}

/// One entry of a ranked candidate list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedCandidate {
    /// Index into the router's adapter list
    pub index: usize,
    pub id: String,
    pub score: i64,
    pub preferred: bool,
    pub cooling_down: bool,
    pub slow: bool,
}

#[derive(Debug, Clone)]
pub struct Ranker {
    weights: RankWeights,
    long_output_threshold: u32,
}

impl Ranker {
    pub fn new(long_output_threshold: u32) -> Self {
        Self {
            weights: RankWeights::default(),
            long_output_threshold,
        }
    }

    pub fn with_weights(mut self, weights: RankWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn score(
        &self,
        descriptor: &ProviderDescriptor,
        requirements: &RouteRequirements,
    ) -> i64 {
        let w = &self.weights;
        let mut score = i64::from(descriptor.base_reliability);

        if descriptor.strengths.contains(&requirements.intent) {
            score += w.strength_match;
        }

        if requirements.needs_vision {
            score += if descriptor.capabilities.supports_vision {
                w.vision_match
            } else {
                w.vision_missing
            };
        }

        score += match descriptor.tier {
            Tier::Free => w.free_tier,
            Tier::Cheap => w.cheap_tier,
            Tier::Paid => 0,
        };

        let wants_long_output = requirements
            .max_output_tokens
            .is_some_and(|tokens| tokens >= self.long_output_threshold);
        if wants_long_output && descriptor.capabilities.supports_long_context {
            score += w.long_context;
        }

        score
    }

    /// Order every descriptor for a request.
    ///
    /// `health[i]` belongs to `descriptors[i]`. Preferred ids that match no
    /// descriptor are ignored; a bare provider id pulls every model of that
    /// provider forward in scored order.
    pub fn rank(
        &self,
        descriptors: &[&ProviderDescriptor],
        health: &[CandidateHealth],
        requirements: &RouteRequirements,
    ) -> Vec<RankedCandidate> {
        let mut scored: Vec<RankedCandidate> = descriptors
            .iter()
            .enumerate()
            .map(|(index, descriptor)| {
                let flags = health.get(index).copied().unwrap_or_default();
                RankedCandidate {
                    index,
                    id: descriptor.key(),
                    score: self.score(descriptor, requirements),
                    preferred: false,
                    cooling_down: flags.cooling_down,
                    slow: flags.slow,
                }
            })
            .collect();

        // Stable: ties keep declaration order
        scored.sort_by(|a, b| b.score.cmp(&a.score));

        if requirements.prefer.is_empty() {
            return scored;
        }

        let mut ordered = Vec::with_capacity(scored.len());
        for id in &requirements.prefer {
            for candidate in &scored {
                let already = ordered
                    .iter()
                    .any(|c: &RankedCandidate| c.index == candidate.index);
                if !already && descriptors[candidate.index].matches(id) {
                    ordered.push(RankedCandidate {
                        preferred: true,
                        ..candidate.clone()
                    });
                }
            }
        }
        for candidate in scored {
            if !ordered.iter().any(|c| c.index == candidate.index) {
                ordered.push(candidate);
            }
        }
        ordered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Intent;

    fn ids(ranked: &[RankedCandidate]) -> Vec<&str> {
        ranked.iter().map(|c| c.id.as_str()).collect()
    }

    fn chat() -> RouteRequirements {
        RouteRequirements::new(Intent::Chat)
    }

    #[test]
    fn test_score_components() {
        let ranker = Ranker::new(2048);
        let descriptor = ProviderDescriptor::new("a", "m")
            .with_reliability(5)
            .with_tier(Tier::Free)
            .with_long_context(true)
            .with_strengths([Intent::Code]);

        let plain = ranker.score(&descriptor, &chat());
        assert_eq!(plain, 5 + 2);

        let code = RouteRequirements::new(Intent::Code).with_max_output_tokens(4096);
        assert_eq!(ranker.score(&descriptor, &code), 5 + 3 + 2 + 1);
    }

    #[test]
    fn test_long_output_threshold_is_inclusive() {
        let ranker = Ranker::new(2048);
        let descriptor = ProviderDescriptor::new("a", "m").with_long_context(true);
        let at = chat().with_max_output_tokens(2048);
        let below = chat().with_max_output_tokens(2047);

        assert_eq!(ranker.score(&descriptor, &at), 6);
        assert_eq!(ranker.score(&descriptor, &below), 5);
    }

    #[test]
    fn test_single_vision_adapter_ranks_first() {
        let ranker = Ranker::new(2048);
        let strong = ProviderDescriptor::new("strong", "m").with_reliability(10);
        let weak = ProviderDescriptor::new("weak", "m")
            .with_reliability(0)
            .with_vision(true);
        let requirements = RouteRequirements::new(Intent::Vision).with_vision(true);

        let ranked = ranker.rank(&[&strong, &weak], &[], &requirements);
        assert_eq!(ids(&ranked), vec!["weak:m", "strong:m"]);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let ranker = Ranker::new(2048);
        let a = ProviderDescriptor::new("a", "m");
        let b = ProviderDescriptor::new("b", "m");
        let c = ProviderDescriptor::new("c", "m").with_reliability(6);

        let ranked = ranker.rank(&[&a, &b, &c], &[], &chat());
        assert_eq!(ids(&ranked), vec!["c:m", "a:m", "b:m"]);
    }

    #[test]
    fn test_health_flags_do_not_reorder() {
        let ranker = Ranker::new(2048);
        let a = ProviderDescriptor::new("a", "m");
        let b = ProviderDescriptor::new("b", "m");
        let health = [
            CandidateHealth {
                cooling_down: true,
                slow: true,
            },
            CandidateHealth::default(),
        ];

        let ranked = ranker.rank(&[&a, &b], &health, &chat());
        assert_eq!(ids(&ranked), vec!["a:m", "b:m"]);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert!(ranked[0].cooling_down && ranked[0].slow);
    }

    #[test]
    fn test_preferred_ids_go_first() {
        let ranker = Ranker::new(2048);
        let a = ProviderDescriptor::new("a", "m").with_reliability(9);
        let b1 = ProviderDescriptor::new("b", "small");
        let b2 = ProviderDescriptor::new("b", "large").with_reliability(7);
        let c = ProviderDescriptor::new("c", "m");

        let requirements = chat().with_prefer(vec![
            "c:m".into(),
            "unknown".into(),
            "b".into(),
            "c".into(),
        ]);
        let ranked = ranker.rank(&[&a, &b1, &b2, &c], &[], &requirements);

        assert_eq!(ids(&ranked), vec!["c:m", "b:large", "b:small", "a:m"]);
        assert!(ranked[0].preferred && ranked[2].preferred);
        assert!(!ranked[3].preferred);
    }
}
