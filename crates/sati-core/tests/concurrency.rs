//! Per-key atomicity under contention.
//!
//! Threads race on the same mandate / feedback slot; the engines must grant
//! exactly the configured budget and never more. Unrelated keys proceed
//! independently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sati_core::{
    AgentRef, ClientRef, FeedbackEngine, MandateEngine, MandateId, MandateKind, MandateStatus,
    NewAuthorization, NewMandate, PrincipalRef, RatingVector, TrustError, UserContext,
};

const THREADS: usize = 16;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 15, 0, 0).unwrap()
}

fn mandate(id: &str, max_executions: u64) -> NewMandate {
    NewMandate::new(
        MandateId::parse(id).unwrap(),
        AgentRef::derive("shopping-agent"),
        PrincipalRef::parse("user-123").unwrap(),
        MandateKind::Intent,
        UserContext::new("US", 1_000).digest().unwrap(),
    )
    .with_max_executions(max_executions)
}

/// Sixteen threads race for a 5-execution budget: exactly 5 win.
#[test]
fn test_concurrent_executions_respect_cap() {
    let engine = Arc::new(MandateEngine::new());
    engine.create_at(t0(), mandate("race", 5)).unwrap();
    let id = MandateId::parse("race").unwrap();

    let successes = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = engine.clone();
            let id = id.clone();
            let successes = successes.clone();
            thread::spawn(move || match engine.record_execution_at(t0(), &id) {
                Ok(_) => {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
                Err(TrustError::InvalidState { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 5);
    let stored = engine.get(&id).unwrap();
    assert_eq!(stored.execution_count, 5);
    assert_eq!(stored.status_at(t0()), MandateStatus::Exhausted);
}

/// Execution ids stay unique when they are handed out concurrently.
#[test]
fn test_concurrent_execution_ids_unique() {
    let engine = Arc::new(MandateEngine::new());
    engine.create_at(t0(), mandate("ids", 0)).unwrap();
    let id = MandateId::parse("ids").unwrap();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = engine.clone();
            let id = id.clone();
            thread::spawn(move || engine.record_execution_at(t0(), &id).unwrap().execution_id)
        })
        .collect();
    let mut ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), THREADS);
    assert_eq!(engine.get(&id).unwrap().execution_count, THREADS as u64);
}

/// Racing creates on one id: exactly one wins, the rest see DuplicateId.
#[test]
fn test_concurrent_create_same_id() {
    let engine = Arc::new(MandateEngine::new());
    let duplicates = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = engine.clone();
            let duplicates = duplicates.clone();
            thread::spawn(move || match engine.create_at(t0(), mandate("claim", 1)) {
                Ok(_) => {}
                Err(TrustError::DuplicateId { .. }) => {
                    duplicates.fetch_add(1, Ordering::SeqCst);
                }
                Err(other) => panic!("unexpected error: {other}"),
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(duplicates.load(Ordering::SeqCst), THREADS - 1);
    assert_eq!(engine.len(), 1);
}

/// Drift flagging racing against execution never lets an execution through
/// after the flag is observed, and never loses a count.
#[test]
fn test_flag_races_execution() {
    let engine = Arc::new(MandateEngine::new());
    engine.create_at(t0(), mandate("flagged", 0)).unwrap();
    let id = MandateId::parse("flagged").unwrap();
    let successes = Arc::new(AtomicUsize::new(0));

    let flagger = {
        let engine = engine.clone();
        let id = id.clone();
        thread::spawn(move || engine.flag_drift_at(t0(), &id).unwrap())
    };
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = engine.clone();
            let id = id.clone();
            let successes = successes.clone();
            thread::spawn(move || {
                if engine.record_execution_at(t0(), &id).is_ok() {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    assert_eq!(flagger.join().unwrap(), MandateStatus::Stale);
    for h in handles {
        h.join().unwrap();
    }

    let stored = engine.get(&id).unwrap();
    assert_eq!(stored.execution_count as usize, successes.load(Ordering::SeqCst));
    assert!(engine.record_execution_at(t0(), &id).is_err());
}

/// Sixteen threads submit through a 3-submission slot: exactly 3 land.
#[test]
fn test_concurrent_consume_respects_cap() {
    let engine = Arc::new(FeedbackEngine::default());
    let agent = AgentRef::derive("shopping-agent");
    let slot = engine
        .authorize_at(
            t0(),
            NewAuthorization::new(
                agent,
                ClientRef::parse("client-race").unwrap(),
                3,
                t0() + Duration::hours(1),
            ),
        )
        .unwrap();

    let successes = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let engine = engine.clone();
            let successes = successes.clone();
            let slot_id = slot.id;
            thread::spawn(move || {
                let ratings = RatingVector::new().with("quality", (i * 5) as u8);
                match engine.consume_at(t0(), &slot_id, ratings, Some(100)) {
                    Ok(_) => {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(TrustError::Exhausted { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(successes.load(Ordering::SeqCst), 3);
    assert_eq!(engine.authorization(&slot.id).unwrap().used_count, 3);
    assert_eq!(engine.records_for(&agent).len(), 3);
    assert_eq!(engine.reputation().get(&agent).accepted, 3);
}

/// Slots for different clients of one agent all aggregate into one score.
#[test]
fn test_parallel_slots_aggregate_consistently() {
    let engine = Arc::new(FeedbackEngine::default());
    let agent = AgentRef::derive("popular-agent");

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let client = ClientRef::parse(&format!("client-{i}")).unwrap();
                let slot = engine
                    .authorize_at(
                        t0(),
                        NewAuthorization::new(agent, client, 1, t0() + Duration::hours(1)),
                    )
                    .unwrap();
                engine
                    .consume_at(t0(), &slot.id, RatingVector::new().with("quality", 60), None)
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let score = engine.reputation().get(&agent);
    assert_eq!(score.accepted, THREADS as u64);
    assert!((score.score().unwrap() - 60.0).abs() < 1e-9);
    assert!((score.total_weight - 0.1 * THREADS as f64).abs() < 1e-9);
}
