//! Reputation aggregation.
//!
//! Folds accepted feedback into a payment-weighted running mean per agent.
//! Aggregates only ever grow by appending records; a retraction is an
//! explicit negative adjustment, never an edit of a stored value.

use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{TrustError, TrustResult};
use crate::feedback::{FeedbackRecord, RatingVector, MAX_RATING};
use crate::ids::AgentRef;

/// Accumulated weight below this is treated as "no data".
const WEIGHT_EPSILON: f64 = 1e-9;

pub(crate) fn is_valid_scalar(rating: f64) -> bool {
    (0.0..=f64::from(MAX_RATING)).contains(&rating)
}

/// Linear combination applied to a rating vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorePolicy {
    /// Empty = equal-weighted mean of whatever categories were submitted
    #[serde(default)]
    category_weights: BTreeMap<String, f64>,
}

impl ScorePolicy {
    pub fn equal_weighted() -> Self {
        Self::default()
    }

    /// Fixed category set with per-category weights.
    ///
    /// Submissions must then carry exactly these categories.
    pub fn weighted(category_weights: BTreeMap<String, f64>) -> TrustResult<Self> {
        for (name, weight) in &category_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(TrustError::invalid(format!(
                    "category weight for '{name}' must be finite and non-negative"
                )));
            }
        }
        if !category_weights.is_empty() && category_weights.values().sum::<f64>() <= 0.0 {
            return Err(TrustError::invalid("category weights must not all be zero"));
        }
        Ok(Self { category_weights })
    }

    pub fn category_weights(&self) -> &BTreeMap<String, f64> {
        &self.category_weights
    }

    /// Collapse a validated rating vector into a single score in [0, 100].
    pub fn scalarize(&self, ratings: &RatingVector) -> TrustResult<f64> {
        ratings.validate()?;

        if self.category_weights.is_empty() {
            let sum: f64 = ratings.iter().map(|(_, score)| f64::from(score)).sum();
            return Ok(sum / ratings.len() as f64);
        }

        if let Some((name, _)) = ratings
            .iter()
            .find(|(name, _)| !self.category_weights.contains_key(*name))
        {
            return Err(TrustError::invalid(format!("unknown rating category: {name}")));
        }

        let mut weighted = 0.0;
        let mut total = 0.0;
        for (name, weight) in &self.category_weights {
            let score = ratings
                .get(name)
                .ok_or_else(|| TrustError::invalid(format!("missing rating category: {name}")))?;
            weighted += weight * f64::from(score);
            total += weight;
        }
        Ok(weighted / total)
    }
}

/// Per-agent aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReputationScore {
    pub weighted_sum: f64,
    pub total_weight: f64,
    /// Records appended
    pub accepted: u64,
    /// Records later retracted
    pub retracted: u64,
}

impl ReputationScore {
    /// `weighted_sum / total_weight`, or None when there is no weight.
    pub fn score(&self) -> Option<f64> {
        (self.total_weight > WEIGHT_EPSILON).then(|| self.weighted_sum / self.total_weight)
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.weighted_sum.is_finite()
            && self.total_weight.is_finite()
            && self.weighted_sum >= 0.0
            && self.total_weight >= 0.0
            && self.retracted <= self.accepted
    }
}

/// Running payment-weighted score per agent.
#[derive(Debug, Default)]
pub struct ReputationAggregator {
    policy: ScorePolicy,
    scores: DashMap<AgentRef, ReputationScore>,
}

impl ReputationAggregator {
    pub fn new(policy: ScorePolicy) -> Self {
        Self {
            policy,
            scores: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &ScorePolicy {
        &self.policy
    }

    /// Fold `record` into its agent's aggregate.
    ///
    /// Uses the record's stored `scalar_rating`; the policy is applied once,
    /// when the record is built. Validation runs before anything is written,
    /// so a rejected record leaves the aggregate untouched.
    pub fn append(&self, record: &FeedbackRecord) -> TrustResult<ReputationScore> {
        let weight = record.payment_weight;
        if !weight.is_finite() || weight < 0.0 {
            return Err(TrustError::invalid(format!(
                "payment weight must be finite and non-negative, got {weight}"
            )));
        }
        record.ratings.validate()?;
        let rating = record.scalar_rating;
        if !is_valid_scalar(rating) {
            return Err(TrustError::invalid(format!(
                "scalar rating must lie in [0, {MAX_RATING}], got {rating}"
            )));
        }

        let mut entry = self.scores.entry(record.agent).or_default();
        entry.weighted_sum += weight * rating;
        entry.total_weight += weight;
        entry.accepted += 1;

        debug!(
            agent = %record.agent,
            weight,
            rating,
            total_weight = entry.total_weight,
            "feedback aggregated"
        );
        Ok(*entry)
    }

    /// Apply the negative adjustment for a retracted record.
    ///
    /// Subtracts exactly what [`append`](Self::append) added, whatever policy
    /// the aggregator holds now.
    pub(crate) fn retract(&self, record: &FeedbackRecord) -> TrustResult<ReputationScore> {
        let rating = record.scalar_rating;
        let weight = record.payment_weight;

        let mut entry = self
            .scores
            .get_mut(&record.agent)
            .ok_or_else(|| TrustError::invalid(format!("no aggregate for agent {}", record.agent)))?;

        entry.weighted_sum -= weight * rating;
        entry.total_weight -= weight;
        entry.retracted += 1;
        // Subtraction leaves rounding residue; snap it back to empty.
        if entry.total_weight <= WEIGHT_EPSILON {
            entry.total_weight = 0.0;
            entry.weighted_sum = 0.0;
        }
        if entry.weighted_sum < 0.0 {
            entry.weighted_sum = 0.0;
        }

        debug!(agent = %record.agent, weight, rating, "feedback retracted from aggregate");
        Ok(*entry)
    }

    /// Current score, or None when the agent has no weighted feedback.
    pub fn score(&self, agent: &AgentRef) -> Option<f64> {
        self.scores.get(agent).and_then(|entry| entry.score())
    }

    /// Raw accumulators (zeroed when the agent has never been rated).
    pub fn get(&self, agent: &AgentRef) -> ReputationScore {
        self.scores.get(agent).map(|entry| *entry).unwrap_or_default()
    }

    /// All aggregates, ordered by agent.
    pub fn list(&self) -> Vec<(AgentRef, ReputationScore)> {
        let mut out: Vec<_> = self
            .scores
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub(crate) fn from_scores(
        policy: ScorePolicy,
        scores: impl IntoIterator<Item = (AgentRef, ReputationScore)>,
    ) -> Self {
        let aggregator = Self::new(policy);
        for (agent, score) in scores {
            aggregator.scores.insert(agent, score);
        }
        aggregator
    }
}
