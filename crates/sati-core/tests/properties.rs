//! Property tests for the engine invariants.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use sati_core::{
    AgentRef, ClientRef, FeedbackEngine, MandateEngine, MandateId, MandateKind, MandateStatus,
    NewAuthorization, NewMandate, PrincipalRef, RatingVector, UserContext,
};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
}

fn mandate(max_executions: u64, budget: u64) -> NewMandate {
    NewMandate::new(
        MandateId::parse("prop").unwrap(),
        AgentRef::derive("prop-agent"),
        PrincipalRef::parse("prop-user").unwrap(),
        MandateKind::Intent,
        UserContext::new("US", budget).digest().unwrap(),
    )
    .with_max_executions(max_executions)
}

fn slot(engine: &FeedbackEngine, client: &str, max: u32, ttl_secs: i64) -> sati_core::AuthorizationId {
    engine
        .authorize_at(
            t0(),
            NewAuthorization::new(
                AgentRef::derive("prop-agent"),
                ClientRef::parse(client).unwrap(),
                max,
                t0() + Duration::seconds(ttl_secs),
            ),
        )
        .unwrap()
        .id
}

proptest! {
    #[test]
    fn prop_execution_never_exceeds_cap(max in 1u64..20, attempts in 0usize..40) {
        let engine = MandateEngine::new();
        engine.create_at(t0(), mandate(max, 1_000)).unwrap();
        let id = MandateId::parse("prop").unwrap();

        let mut successes = 0u64;
        for _ in 0..attempts {
            if engine.record_execution_at(t0(), &id).is_ok() {
                successes += 1;
            }
        }

        prop_assert_eq!(successes, max.min(attempts as u64));
        let status = engine.status_at(t0(), &id).unwrap();
        prop_assert_eq!(status == MandateStatus::Exhausted, attempts as u64 >= max);
    }

    #[test]
    fn prop_check_drift_is_side_effect_free(budget in 0u64..10_000, probe in 0u64..10_000, calls in 1usize..10) {
        let engine = MandateEngine::new();
        engine.create_at(t0(), mandate(0, budget)).unwrap();
        let id = MandateId::parse("prop").unwrap();
        let before = engine.get(&id).unwrap();
        let probe_digest = UserContext::new("US", probe).digest().unwrap();

        for _ in 0..calls {
            prop_assert_eq!(engine.check_drift(&id, &probe_digest).unwrap(), budget != probe);
        }
        prop_assert_eq!(engine.get(&id).unwrap(), before);
    }

    #[test]
    fn prop_expiry_dominates(offset in 0i64..3_600, flagged in any::<bool>()) {
        let engine = MandateEngine::new();
        let expires_at = t0() + Duration::minutes(5);
        engine.create_at(t0(), mandate(0, 1_000).with_expires_at(expires_at)).unwrap();
        let id = MandateId::parse("prop").unwrap();
        if flagged {
            engine.flag_drift_at(t0(), &id).unwrap();
        }

        let now = expires_at + Duration::seconds(offset);
        prop_assert_eq!(engine.status_at(now, &id).unwrap(), MandateStatus::Expired);
        prop_assert!(engine.record_execution_at(now, &id).is_err());
        let digest = UserContext::new("US", 1).digest().unwrap();
        prop_assert!(engine.revalidate_at(now, &id, digest, true).is_err());
    }

    #[test]
    fn prop_consume_bounded_by_budget_and_expiry(
        max in 1u32..10,
        attempts in 0usize..20,
        ttl_secs in 1i64..120,
        step_secs in 0i64..30,
    ) {
        let engine = FeedbackEngine::default();
        let id = slot(&engine, "prop-client", max, ttl_secs);
        let expires_at = t0() + Duration::seconds(ttl_secs);

        let mut accepted = 0u32;
        for i in 0..attempts {
            let now = t0() + Duration::seconds(step_secs * i as i64);
            let result = engine.consume_at(now, &id, RatingVector::new().with("quality", 50), None);
            if result.is_ok() {
                prop_assert!(now < expires_at);
                accepted += 1;
            }
        }
        prop_assert!(accepted <= max);
        prop_assert_eq!(engine.authorization(&id).unwrap().used_count, accepted);
    }

    #[test]
    fn prop_score_is_weighted_mean(entries in prop::collection::vec((0u8..=100, prop::option::of(0u64..100_000)), 1..12)) {
        let engine = FeedbackEngine::default();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for (i, (rating, amount)) in entries.iter().enumerate() {
            let id = slot(&engine, &format!("client-{i}"), 1, 60);
            let record = engine
                .consume_at(t0(), &id, RatingVector::new().with("quality", *rating), *amount)
                .unwrap();
            weighted_sum += record.payment_weight * f64::from(*rating);
            total_weight += record.payment_weight;
        }

        let score = engine.reputation().score(&AgentRef::derive("prop-agent")).unwrap();
        prop_assert!((score - weighted_sum / total_weight).abs() < 1e-6);
    }
}

/// A zero-weight record leaves the running mean where it was.
#[test]
fn test_zero_weight_record_leaves_score_unchanged() {
    use sati_core::{AuthorizationId, FeedbackId, FeedbackRecord, ReputationAggregator, ScorePolicy};

    let aggregator = ReputationAggregator::new(ScorePolicy::equal_weighted());
    let agent = AgentRef::derive("prop-agent");
    let record = |rating: u8, weight: f64, n: u32| {
        let authorization = AuthorizationId::new();
        FeedbackRecord {
            id: FeedbackId::compute(&authorization, n),
            authorization,
            agent,
            client: ClientRef::parse("prop-client").unwrap(),
            ratings: RatingVector::new().with("quality", rating),
            scalar_rating: f64::from(rating),
            payment_amount: None,
            payment_weight: weight,
            submitted_at: t0(),
        }
    };

    aggregator.append(&record(70, 0.8, 1)).unwrap();
    aggregator.append(&record(20, 0.3, 2)).unwrap();
    let before = aggregator.score(&agent).unwrap();

    aggregator.append(&record(0, 0.0, 3)).unwrap();
    aggregator.append(&record(100, 0.0, 4)).unwrap();
    let after = aggregator.score(&agent).unwrap();

    assert_eq!(before, after);
    assert_eq!(aggregator.get(&agent).accepted, 4);
}
