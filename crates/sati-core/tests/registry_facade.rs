//! Full registry flow through the public API with in-test collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Once};

use chrono::{DateTime, Duration, TimeZone, Utc};
use sati_core::events::{
    EVENT_TYPE_FEEDBACK_AUTHORIZED, EVENT_TYPE_FEEDBACK_RETRACTED, EVENT_TYPE_FEEDBACK_SUBMITTED,
    EVENT_TYPE_MANDATE_CREATED, EVENT_TYPE_MANDATE_EXECUTED,
};
use sati_core::{
    AgentRef, AuthorizeFeedbackRequest, CreateMandateRequest, Delegation, DelegationVerifier,
    ExecutionRequest, IdentityRegistry, MandateKind, MandateStatus, MemoryEventSink,
    PaymentVerifier, PrincipalRef, RatingVector, SubmitFeedbackRequest, TrustConfig, TrustError,
    TrustRegistry, TrustSnapshot, UserContext, EVENT_SPEC_VERSION,
};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 18, 0, 0).unwrap()
}

struct Directory {
    owners: HashMap<AgentRef, String>,
}

impl IdentityRegistry for Directory {
    fn resolve_agent(&self, agent: &AgentRef) -> bool {
        self.owners.contains_key(agent)
    }

    fn is_owner(&self, agent: &AgentRef, principal: &PrincipalRef) -> bool {
        self.owners
            .get(agent)
            .is_some_and(|owner| owner == principal.as_str())
    }
}

struct Grants {
    principals: HashSet<String>,
}

impl DelegationVerifier for Grants {
    fn verify_delegation(&self, _agent: &AgentRef, principal: &PrincipalRef) -> Delegation {
        if self.principals.contains(principal.as_str()) {
            Delegation::unrestricted()
                .with_max_spend(10_000)
                .with_expires_at(t0() + Duration::days(7))
        } else {
            Delegation::invalid()
        }
    }
}

struct Receipts;

impl PaymentVerifier for Receipts {
    fn verify_payment(&self, proof_ref: &str) -> Option<u64> {
        match proof_ref {
            "tx-large" => Some(5_000),
            "tx-small" => Some(100),
            _ => None,
        }
    }
}

fn build_registry(config: TrustConfig) -> (TrustRegistry, Arc<MemoryEventSink>) {
    init_tracing();
    let agent = AgentRef::derive("shopping-agent");
    let events = Arc::new(MemoryEventSink::new());
    let registry = TrustRegistry::new(
        config,
        Arc::new(Directory {
            owners: HashMap::from([(agent, "acme-labs".to_string())]),
        }),
        Arc::new(Grants {
            principals: HashSet::from(["alice".to_string()]),
        }),
        Arc::new(Receipts),
    )
    .unwrap()
    .with_event_sink(events.clone());
    (registry, events)
}

fn agent_ref() -> String {
    AgentRef::derive("shopping-agent").to_string()
}

#[test]
fn test_registry_full_flow() {
    let config = TrustConfig::from_yaml_str(
        "default_revalidation_window_secs: 600\nevent_source: sati://test\n",
    )
    .unwrap();
    let (registry, events) = build_registry(config);
    let context = UserContext::new("US", 10_000);

    let mandate = registry
        .create_mandate_at(
            t0(),
            CreateMandateRequest::new(
                "intent-42",
                agent_ref(),
                "alice",
                MandateKind::Intent,
                context.digest().unwrap(),
            )
            .with_max_executions(2),
        )
        .unwrap();
    assert_eq!(mandate.revalidation_window, Duration::minutes(10));

    registry
        .record_execution_at(t0(), ExecutionRequest::new("intent-42", 2_500))
        .unwrap();
    let over_cap = registry.record_execution_at(t0(), ExecutionRequest::new("intent-42", 20_000));
    assert!(matches!(over_cap, Err(TrustError::Unauthorized { .. })));

    // Window of 600s elapses.
    let later = t0() + Duration::minutes(11);
    assert_eq!(
        registry.mandate_status_at(later, "intent-42").unwrap(),
        MandateStatus::Stale
    );

    let slot = registry
        .authorize_feedback_at(
            t0(),
            AuthorizeFeedbackRequest {
                agent: agent_ref(),
                client: "bob".into(),
                owner: "acme-labs".into(),
                max_submissions: 2,
                expires_at: t0() + Duration::days(1),
            },
        )
        .unwrap();
    let submit = |rating: u8, proof: &str| {
        registry.submit_feedback_at(
            t0(),
            SubmitFeedbackRequest::new(
                slot.id.to_string(),
                "bob",
                RatingVector::new().with("quality", rating),
            )
            .with_payment_proof(proof),
        )
    };
    let large = submit(90, "tx-large").unwrap();
    let small = submit(30, "tx-small").unwrap();
    assert!(large.payment_weight > small.payment_weight);
    assert!(matches!(
        submit(50, "tx-small"),
        Err(TrustError::Exhausted { used: 2, max: 2 })
    ));

    let score = registry.reputation(&agent_ref()).unwrap().unwrap();
    assert!(score > 60.0 && score < 90.0);

    registry
        .retract_feedback_at(t0(), &small.id.to_string(), "bob")
        .unwrap();
    let after = registry.reputation(&agent_ref()).unwrap().unwrap();
    assert!((after - 90.0).abs() < 1e-9);

    assert_eq!(
        events.types(),
        vec![
            EVENT_TYPE_MANDATE_CREATED,
            EVENT_TYPE_MANDATE_EXECUTED,
            EVENT_TYPE_FEEDBACK_AUTHORIZED,
            EVENT_TYPE_FEEDBACK_SUBMITTED,
            EVENT_TYPE_FEEDBACK_SUBMITTED,
            EVENT_TYPE_FEEDBACK_RETRACTED,
        ]
    );
    for event in events.events() {
        assert_eq!(event.specversion, EVENT_SPEC_VERSION);
        assert_eq!(event.source, "sati://test");
        assert_eq!(event.time, t0());
    }
}

#[test]
fn test_registry_rejects_unknown_parties() {
    let (registry, events) = build_registry(TrustConfig::default());
    let digest = UserContext::new("US", 10_000).digest().unwrap();

    let no_delegation = registry.create_mandate_at(
        t0(),
        CreateMandateRequest::new("intent-1", agent_ref(), "mallory", MandateKind::Intent, digest),
    );
    assert_eq!(no_delegation.unwrap_err().code(), "unauthorized");

    let unknown_agent = registry.create_mandate_at(
        t0(),
        CreateMandateRequest::new(
            "intent-1",
            AgentRef::derive("ghost").to_string(),
            "alice",
            MandateKind::Intent,
            digest,
        ),
    );
    assert_eq!(unknown_agent.unwrap_err().code(), "not_found");

    let missing = registry.mandate_status_at(t0(), "intent-1").unwrap_err();
    assert_eq!(missing.code(), "not_found");
    assert!(!missing.is_retryable());

    assert!(events.is_empty());
}

#[test]
fn test_registry_snapshot_survives_json() {
    let (registry, _) = build_registry(TrustConfig::default());
    let digest = UserContext::new("US", 10_000).digest().unwrap();
    registry
        .create_mandate_at(
            t0(),
            CreateMandateRequest::new("intent-s", agent_ref(), "alice", MandateKind::Cart, digest)
                .with_max_executions(1),
        )
        .unwrap();
    registry
        .record_execution_at(t0(), ExecutionRequest::new("intent-s", 10))
        .unwrap();

    let json = registry.snapshot_at(t0()).to_json().unwrap();
    let (mut restored, _) = build_registry(TrustConfig::default());
    restored.restore(TrustSnapshot::from_json(&json).unwrap()).unwrap();

    assert_eq!(
        restored.mandate_status_at(t0(), "intent-s").unwrap(),
        MandateStatus::Exhausted
    );
    assert!(restored.ensure_executable_at(t0(), "intent-s").is_err());
}
