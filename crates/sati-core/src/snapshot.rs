//! Snapshot and restore of all engine state.
//!
//! Engines are in-memory; a [`TrustSnapshot`] is how callers persist them.
//! Restore re-checks every invariant the engines maintain, including the
//! reputation accumulators, which are recomputed from the stored records and
//! retractions. A tampered or truncated snapshot is rejected instead of
//! loaded.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feedback::{FeedbackAuthorization, FeedbackEngine, FeedbackRecord, PaymentWeighting};
use crate::ids::{AgentRef, AuthorizationId, FeedbackId, MandateId};
use crate::mandate::{Mandate, MandateEngine, Termination};
use crate::reputation::{is_valid_scalar, ReputationAggregator, ReputationScore, ScorePolicy};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Relative slack when comparing stored accumulators with recomputed ones.
const ACCUMULATOR_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported snapshot version {found} (expected {SNAPSHOT_VERSION})")]
    UnsupportedVersion { found: u32 },

    #[error("inconsistent snapshot: {reason}")]
    Inconsistent { reason: String },
}

fn inconsistent(reason: impl Into<String>) -> SnapshotError {
    SnapshotError::Inconsistent {
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retraction {
    pub feedback_id: FeedbackId,
    pub retracted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    pub agent: AgentRef,
    #[serde(flatten)]
    pub score: ReputationScore,
}

/// Point-in-time copy of all engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustSnapshot {
    pub version: u32,
    pub taken_at: DateTime<Utc>,
    pub mandates: Vec<Mandate>,
    pub authorizations: Vec<FeedbackAuthorization>,
    pub records: Vec<FeedbackRecord>,
    pub retracted: Vec<Retraction>,
    pub scores: Vec<AgentScore>,
}

impl TrustSnapshot {
    /// Copy the current state of both engines.
    ///
    /// Each entity is copied under its own lock; concurrent writers may land
    /// between entities. Take snapshots from a quiesced registry when a
    /// cross-entity consistent cut matters.
    pub fn capture(now: DateTime<Utc>, mandates: &MandateEngine, feedback: &FeedbackEngine) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at: now,
            mandates: mandates.list(),
            authorizations: feedback.list_authorizations(),
            records: feedback.list_records(),
            retracted: feedback
                .list_retractions()
                .into_iter()
                .map(|(feedback_id, retracted_at)| Retraction {
                    feedback_id,
                    retracted_at,
                })
                .collect(),
            scores: feedback
                .reputation()
                .list()
                .into_iter()
                .map(|(agent, score)| AgentScore { agent, score })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse only; [`restore`](Self::restore) validates.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check every cross-entity invariant.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                found: self.version,
            });
        }
        self.validate_mandates()?;
        let slots = self.validate_authorizations()?;
        let agent_of = self.validate_records(&slots)?;
        let retracted_by_agent = self.validate_retractions(&agent_of)?;
        self.validate_scores(&agent_of, &retracted_by_agent)
    }

    fn validate_mandates(&self) -> Result<(), SnapshotError> {
        let ids: BTreeSet<&MandateId> = self.mandates.iter().map(|m| &m.id).collect();
        if ids.len() != self.mandates.len() {
            return Err(inconsistent("duplicate mandate id"));
        }
        for m in &self.mandates {
            if m.max_executions != 0 && m.execution_count > m.max_executions {
                return Err(inconsistent(format!(
                    "mandate {} executed {} times, max {}",
                    m.id, m.execution_count, m.max_executions
                )));
            }
            if m.revalidation_window <= chrono::Duration::zero() {
                return Err(inconsistent(format!(
                    "mandate {} has a non-positive revalidation window",
                    m.id
                )));
            }
            if let Some(Termination::Amended { successor, .. }) = &m.termination {
                if !ids.contains(successor) {
                    return Err(inconsistent(format!(
                        "mandate {} amended into unknown successor {successor}",
                        m.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_authorizations(
        &self,
    ) -> Result<HashMap<AuthorizationId, &FeedbackAuthorization>, SnapshotError> {
        let mut slots = HashMap::new();
        for a in &self.authorizations {
            if a.max_submissions == 0 || a.used_count > a.max_submissions {
                return Err(inconsistent(format!(
                    "authorization {} used {} of {}",
                    a.id, a.used_count, a.max_submissions
                )));
            }
            if slots.insert(a.id, a).is_some() {
                return Err(inconsistent(format!("duplicate authorization id {}", a.id)));
            }
        }
        Ok(slots)
    }

    fn validate_records(
        &self,
        slots: &HashMap<AuthorizationId, &FeedbackAuthorization>,
    ) -> Result<HashMap<FeedbackId, AgentRef>, SnapshotError> {
        let mut agent_of = HashMap::new();
        let mut per_slot: HashMap<AuthorizationId, u32> = HashMap::new();
        for r in &self.records {
            let slot = slots.get(&r.authorization).ok_or_else(|| {
                inconsistent(format!(
                    "feedback {} references unknown authorization {}",
                    r.id, r.authorization
                ))
            })?;
            if slot.agent != r.agent || slot.client != r.client {
                return Err(inconsistent(format!(
                    "feedback {} does not match its authorization's agent/client",
                    r.id
                )));
            }
            if !r.payment_weight.is_finite() || r.payment_weight < 0.0 {
                return Err(inconsistent(format!("feedback {} has an invalid weight", r.id)));
            }
            if !is_valid_scalar(r.scalar_rating) {
                return Err(inconsistent(format!(
                    "feedback {} has an invalid scalar rating",
                    r.id
                )));
            }
            if agent_of.insert(r.id, r.agent).is_some() {
                return Err(inconsistent(format!("duplicate feedback id {}", r.id)));
            }
            *per_slot.entry(r.authorization).or_default() += 1;
        }
        for (id, slot) in slots {
            let stored = per_slot.get(id).copied().unwrap_or(0);
            if stored != slot.used_count {
                return Err(inconsistent(format!(
                    "authorization {id} used {} times but {stored} records stored",
                    slot.used_count
                )));
            }
        }
        Ok(agent_of)
    }

    fn validate_retractions(
        &self,
        agent_of: &HashMap<FeedbackId, AgentRef>,
    ) -> Result<HashMap<AgentRef, u64>, SnapshotError> {
        let mut seen = BTreeSet::new();
        let mut per_agent: HashMap<AgentRef, u64> = HashMap::new();
        for r in &self.retracted {
            let agent = agent_of.get(&r.feedback_id).ok_or_else(|| {
                inconsistent(format!("retraction of unknown feedback {}", r.feedback_id))
            })?;
            if !seen.insert(r.feedback_id) {
                return Err(inconsistent(format!(
                    "feedback {} retracted twice",
                    r.feedback_id
                )));
            }
            *per_agent.entry(*agent).or_default() += 1;
        }
        Ok(per_agent)
    }

    fn validate_scores(
        &self,
        agent_of: &HashMap<FeedbackId, AgentRef>,
        retracted_by_agent: &HashMap<AgentRef, u64>,
    ) -> Result<(), SnapshotError> {
        let mut accepted_by_agent: BTreeMap<AgentRef, u64> = BTreeMap::new();
        for agent in agent_of.values() {
            *accepted_by_agent.entry(*agent).or_default() += 1;
        }
        let expected = self.recompute_accumulators();

        let mut scored = BTreeSet::new();
        for entry in &self.scores {
            if !scored.insert(entry.agent) {
                return Err(inconsistent(format!("duplicate score for agent {}", entry.agent)));
            }
            if !entry.score.is_consistent() {
                return Err(inconsistent(format!(
                    "score for agent {} has invalid accumulators",
                    entry.agent
                )));
            }
            let accepted = accepted_by_agent.get(&entry.agent).copied().unwrap_or(0);
            let retracted = retracted_by_agent.get(&entry.agent).copied().unwrap_or(0);
            if entry.score.accepted != accepted || entry.score.retracted != retracted {
                return Err(inconsistent(format!(
                    "score for agent {} counts {}/{} records, snapshot holds {accepted}/{retracted}",
                    entry.agent, entry.score.accepted, entry.score.retracted
                )));
            }
            let fresh = expected.get(&entry.agent).copied().unwrap_or_default();
            if !fresh.matches(&entry.score) {
                return Err(inconsistent(format!(
                    "score for agent {} holds {}/{}, records sum to {}/{}",
                    entry.agent,
                    entry.score.weighted_sum,
                    entry.score.total_weight,
                    fresh.weighted_sum,
                    fresh.total_weight
                )));
            }
        }
        if let Some(agent) = accepted_by_agent.keys().find(|a| !scored.contains(*a)) {
            return Err(inconsistent(format!("feedback for agent {agent} has no score")));
        }
        Ok(())
    }

    /// Accumulators rebuilt from the live (unretracted) records, per agent.
    fn recompute_accumulators(&self) -> HashMap<AgentRef, Accumulated> {
        let retracted: BTreeSet<FeedbackId> =
            self.retracted.iter().map(|r| r.feedback_id).collect();
        let mut out: HashMap<AgentRef, Accumulated> = HashMap::new();
        for r in &self.records {
            let acc = out.entry(r.agent).or_default();
            let contribution = r.payment_weight * r.scalar_rating;
            acc.gross_sum += contribution;
            acc.gross_weight += r.payment_weight;
            if !retracted.contains(&r.id) {
                acc.weighted_sum += contribution;
                acc.total_weight += r.payment_weight;
            }
        }
        out
    }

    /// Validate and rebuild the engines.
    pub fn restore(
        self,
        weighting: PaymentWeighting,
        policy: ScorePolicy,
    ) -> Result<(MandateEngine, FeedbackEngine), SnapshotError> {
        self.validate()?;

        let mandates =
            MandateEngine::from_mandates(self.mandates).map_err(|e| inconsistent(e.to_string()))?;
        let reputation = Arc::new(ReputationAggregator::from_scores(
            policy,
            self.scores.into_iter().map(|s| (s.agent, s.score)),
        ));
        let feedback = FeedbackEngine::from_parts(
            weighting,
            reputation,
            self.authorizations,
            self.records,
            self.retracted
                .into_iter()
                .map(|r| (r.feedback_id, r.retracted_at))
                .collect(),
        );
        Ok((mandates, feedback))
    }
}

/// Per-agent sums over stored records.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulated {
    weighted_sum: f64,
    total_weight: f64,
    /// Including retracted records; bounds the rounding a live aggregate
    /// picks up from its add/subtract history.
    gross_sum: f64,
    gross_weight: f64,
}

impl Accumulated {
    fn matches(&self, stored: &ReputationScore) -> bool {
        let close =
            |a: f64, b: f64, gross: f64| (a - b).abs() <= ACCUMULATOR_TOLERANCE * (1.0 + gross);
        close(stored.weighted_sum, self.weighted_sum, self.gross_sum)
            && close(stored.total_weight, self.total_weight, self.gross_weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextDigest;
    use crate::feedback::{NewAuthorization, RatingVector};
    use crate::ids::{ClientRef, PrincipalRef};
    use crate::mandate::{MandateKind, MandateStatus, NewMandate};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap()
    }

    fn populated() -> (MandateEngine, FeedbackEngine) {
        let mandates = MandateEngine::new();
        for (id, max) in [("m1", 2), ("m2", 0)] {
            mandates
                .create_at(
                    t0(),
                    NewMandate::new(
                        MandateId::parse(id).unwrap(),
                        AgentRef::derive("agent"),
                        PrincipalRef::parse("user").unwrap(),
                        MandateKind::Cart,
                        ContextDigest::from_bytes([3; 32]),
                    )
                    .with_max_executions(max),
                )
                .unwrap();
        }
        mandates
            .record_execution_at(t0(), &MandateId::parse("m1").unwrap())
            .unwrap();

        let feedback = FeedbackEngine::default();
        let slot = feedback
            .authorize_at(
                t0(),
                NewAuthorization::new(
                    AgentRef::derive("agent"),
                    ClientRef::parse("client").unwrap(),
                    3,
                    t0() + Duration::hours(1),
                ),
            )
            .unwrap();
        let rating = RatingVector::new().with("quality", 90);
        let first = feedback
            .consume_at(t0(), &slot.id, rating.clone(), Some(300))
            .unwrap();
        feedback.consume_at(t0(), &slot.id, rating, None).unwrap();
        feedback
            .retract_at(t0(), &first.id, &ClientRef::parse("client").unwrap())
            .unwrap();

        (mandates, feedback)
    }

    #[test]
    fn test_capture_restore_preserves_state() {
        let (mandates, feedback) = populated();
        let snapshot = TrustSnapshot::capture(t0(), &mandates, &feedback);
        snapshot.validate().unwrap();

        let json = snapshot.to_json().unwrap();
        let parsed = TrustSnapshot::from_json(&json).unwrap();
        assert_eq!(parsed, snapshot);

        let (m2, f2) = parsed
            .restore(PaymentWeighting::default(), ScorePolicy::equal_weighted())
            .unwrap();
        assert_eq!(m2.list(), mandates.list());
        assert_eq!(
            m2.status_at(t0(), &MandateId::parse("m1").unwrap()).unwrap(),
            MandateStatus::Active
        );
        assert_eq!(f2.list_records(), feedback.list_records());
        assert_eq!(f2.list_retractions(), feedback.list_retractions());
        assert_eq!(
            f2.reputation().get(&AgentRef::derive("agent")),
            feedback.reputation().get(&AgentRef::derive("agent"))
        );
    }

    #[test]
    fn test_rejects_over_executed_mandate() {
        let (mandates, feedback) = populated();
        let mut snapshot = TrustSnapshot::capture(t0(), &mandates, &feedback);
        snapshot.mandates[0].execution_count = 3;

        assert!(matches!(
            snapshot.validate(),
            Err(SnapshotError::Inconsistent { .. })
        ));
    }

    #[test]
    fn test_rejects_orphan_and_duplicate_records() {
        let (mandates, feedback) = populated();
        let base = TrustSnapshot::capture(t0(), &mandates, &feedback);

        let mut orphan = base.clone();
        orphan.authorizations.clear();
        assert!(orphan.validate().is_err());

        let mut duplicated = base.clone();
        let copy = duplicated.records[0].clone();
        duplicated.records.push(copy);
        assert!(duplicated.validate().is_err());

        let mut missing = base;
        missing.records.pop();
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_rejects_overspent_slot_and_double_retraction() {
        let (mandates, feedback) = populated();
        let base = TrustSnapshot::capture(t0(), &mandates, &feedback);

        let mut overspent = base.clone();
        overspent.authorizations[0].max_submissions = 1;
        assert!(overspent.validate().is_err());

        let mut twice = base;
        let again = twice.retracted[0].clone();
        twice.retracted.push(again);
        assert!(twice.validate().is_err());
    }

    #[test]
    fn test_rejects_edited_accumulators() {
        let (mandates, feedback) = populated();
        let base = TrustSnapshot::capture(t0(), &mandates, &feedback);

        let mut inflated = base.clone();
        inflated.scores[0].score.weighted_sum += 25.0;
        assert!(matches!(
            inflated.validate(),
            Err(SnapshotError::Inconsistent { .. })
        ));

        let mut reweighted = base.clone();
        reweighted.scores[0].score.total_weight *= 2.0;
        assert!(reweighted.validate().is_err());

        let mut rescored = base;
        let live = rescored
            .records
            .iter()
            .position(|r| rescored.retracted.iter().all(|x| x.feedback_id != r.id))
            .unwrap();
        rescored.records[live].scalar_rating = 10.0;
        assert!(rescored.validate().is_err());
    }

    #[test]
    fn test_accumulators_survive_retract_to_empty() {
        let (mandates, feedback) = populated();
        let remaining = feedback
            .list_records()
            .into_iter()
            .find(|r| !feedback.is_retracted(&r.id))
            .unwrap();
        feedback
            .retract_at(t0(), &remaining.id, &ClientRef::parse("client").unwrap())
            .unwrap();

        let snapshot = TrustSnapshot::capture(t0(), &mandates, &feedback);
        assert_eq!(snapshot.scores[0].score.total_weight, 0.0);
        snapshot.validate().unwrap();
    }

    #[test]
    fn test_rejects_other_version() {
        let (mandates, feedback) = populated();
        let mut snapshot = TrustSnapshot::capture(t0(), &mandates, &feedback);
        snapshot.version = 99;

        assert!(matches!(
            snapshot.validate(),
            Err(SnapshotError::UnsupportedVersion { found: 99 })
        ));
    }

    #[test]
    fn test_rejects_garbage_json() {
        assert!(matches!(
            TrustSnapshot::from_json("{\"version\": 1"),
            Err(SnapshotError::Serde(_))
        ));
    }
}
