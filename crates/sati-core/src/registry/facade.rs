//! `TrustRegistry`: the operations external callers invoke.
//!
//! Every operation returns [`TrustResult`]; use [`TrustError::code`] for a
//! stable machine-readable failure code.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::collaborators::{DelegationVerifier, IdentityRegistry, PaymentVerifier};
use super::requests::{
    AuthorizeFeedbackRequest, CreateMandateRequest, ExecutionRequest, SubmitFeedbackRequest,
};
use crate::config::{ConfigError, TrustConfig};
use crate::context::ContextDigest;
use crate::errors::{TrustError, TrustResult};
use crate::events::{EventSink, LifecycleEvent, NoopEventSink};
use crate::feedback::{FeedbackAuthorization, FeedbackEngine, FeedbackRecord};
use crate::ids::{AgentRef, AuthorizationId, ClientRef, FeedbackId, MandateId, PrincipalRef};
use crate::mandate::{ExecutionReceipt, Mandate, MandateEngine, MandateStatus};
use crate::reputation::{ReputationAggregator, ReputationScore};
use crate::snapshot::{SnapshotError, TrustSnapshot};

#[path = "facade_internal/mod.rs"]
mod facade_internal;

/// Facade over the mandate and feedback engines.
pub struct TrustRegistry {
    config: TrustConfig,
    identity: Arc<dyn IdentityRegistry>,
    delegations: Arc<dyn DelegationVerifier>,
    payments: Arc<dyn PaymentVerifier>,
    events: Arc<dyn EventSink>,
    mandates: MandateEngine,
    feedback: FeedbackEngine,
}

impl std::fmt::Debug for TrustRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustRegistry")
            .field("config", &self.config)
            .field("mandates", &self.mandates.len())
            .finish_non_exhaustive()
    }
}

impl TrustRegistry {
    /// Build a registry with empty engines. The config is validated first.
    pub fn new(
        config: TrustConfig,
        identity: Arc<dyn IdentityRegistry>,
        delegations: Arc<dyn DelegationVerifier>,
        payments: Arc<dyn PaymentVerifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let reputation = Arc::new(ReputationAggregator::new(config.score_policy()?));
        let feedback = FeedbackEngine::new(config.payment_weighting()?, reputation);
        Ok(Self {
            config,
            identity,
            delegations,
            payments,
            events: Arc::new(NoopEventSink),
            mandates: MandateEngine::new(),
            feedback,
        })
    }

    /// Route lifecycle events to `sink` instead of discarding them.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    pub fn mandate_engine(&self) -> &MandateEngine {
        &self.mandates
    }

    pub fn feedback_engine(&self) -> &FeedbackEngine {
        &self.feedback
    }

    pub fn reputation_aggregator(&self) -> &ReputationAggregator {
        self.feedback.reputation()
    }

    // --- mandates ---

    pub fn create_mandate(&self, request: CreateMandateRequest) -> TrustResult<Mandate> {
        self.create_mandate_at(Utc::now(), request)
    }

    /// Requires a registered agent and a live delegation from the principal.
    pub fn create_mandate_at(
        &self,
        now: DateTime<Utc>,
        request: CreateMandateRequest,
    ) -> TrustResult<Mandate> {
        facade_internal::mandates::create_mandate_impl(self, now, request)
    }

    pub fn mandate(&self, mandate_id: &str) -> TrustResult<Mandate> {
        self.mandates.get(&self.parse_mandate_id(mandate_id)?)
    }

    pub fn mandate_status(&self, mandate_id: &str) -> TrustResult<MandateStatus> {
        self.mandate_status_at(Utc::now(), mandate_id)
    }

    pub fn mandate_status_at(
        &self,
        now: DateTime<Utc>,
        mandate_id: &str,
    ) -> TrustResult<MandateStatus> {
        self.mandates
            .status_at(now, &self.parse_mandate_id(mandate_id)?)
    }

    /// Read-only drift check against a precomputed digest.
    pub fn check_drift(&self, mandate_id: &str, current: &ContextDigest) -> TrustResult<bool> {
        self.mandates
            .check_drift(&self.parse_mandate_id(mandate_id)?, current)
    }

    /// Read-only drift check; hashes `context` first.
    pub fn check_context_drift<T: Serialize + ?Sized>(
        &self,
        mandate_id: &str,
        context: &T,
    ) -> TrustResult<bool> {
        let digest = crate::context::compute_context_digest(context)?;
        self.check_drift(mandate_id, &digest)
    }

    pub fn flag_drift(&self, mandate_id: &str) -> TrustResult<MandateStatus> {
        self.flag_drift_at(Utc::now(), mandate_id)
    }

    pub fn flag_drift_at(&self, now: DateTime<Utc>, mandate_id: &str) -> TrustResult<MandateStatus> {
        facade_internal::mandates::flag_drift_impl(self, now, mandate_id)
    }

    pub fn revalidate(
        &self,
        mandate_id: &str,
        caller: &str,
        new_digest: ContextDigest,
    ) -> TrustResult<Mandate> {
        self.revalidate_at(Utc::now(), mandate_id, caller, new_digest)
    }

    /// `caller` must be the mandate's principal.
    pub fn revalidate_at(
        &self,
        now: DateTime<Utc>,
        mandate_id: &str,
        caller: &str,
        new_digest: ContextDigest,
    ) -> TrustResult<Mandate> {
        facade_internal::mandates::revalidate_impl(self, now, mandate_id, caller, new_digest)
    }

    pub fn ensure_executable(&self, mandate_id: &str) -> TrustResult<()> {
        self.ensure_executable_at(Utc::now(), mandate_id)
    }

    pub fn ensure_executable_at(&self, now: DateTime<Utc>, mandate_id: &str) -> TrustResult<()> {
        self.mandates
            .ensure_executable_at(now, &self.parse_mandate_id(mandate_id)?)
    }

    pub fn record_execution(&self, request: ExecutionRequest) -> TrustResult<ExecutionReceipt> {
        self.record_execution_at(Utc::now(), request)
    }

    /// Delegation limits are enforced before the engine counts the execution.
    pub fn record_execution_at(
        &self,
        now: DateTime<Utc>,
        request: ExecutionRequest,
    ) -> TrustResult<ExecutionReceipt> {
        facade_internal::mandates::record_execution_impl(self, now, request)
    }

    pub fn revoke_mandate(
        &self,
        mandate_id: &str,
        caller: &str,
        reason: Option<String>,
    ) -> TrustResult<Mandate> {
        self.revoke_mandate_at(Utc::now(), mandate_id, caller, reason)
    }

    pub fn revoke_mandate_at(
        &self,
        now: DateTime<Utc>,
        mandate_id: &str,
        caller: &str,
        reason: Option<String>,
    ) -> TrustResult<Mandate> {
        facade_internal::mandates::revoke_impl(self, now, mandate_id, caller, reason)
    }

    pub fn amend_mandate(
        &self,
        mandate_id: &str,
        caller: &str,
        successor: CreateMandateRequest,
    ) -> TrustResult<Mandate> {
        self.amend_mandate_at(Utc::now(), mandate_id, caller, successor)
    }

    /// Returns the successor mandate.
    pub fn amend_mandate_at(
        &self,
        now: DateTime<Utc>,
        mandate_id: &str,
        caller: &str,
        successor: CreateMandateRequest,
    ) -> TrustResult<Mandate> {
        facade_internal::mandates::amend_impl(self, now, mandate_id, caller, successor)
    }

    // --- feedback ---

    pub fn authorize_feedback(
        &self,
        request: AuthorizeFeedbackRequest,
    ) -> TrustResult<FeedbackAuthorization> {
        self.authorize_feedback_at(Utc::now(), request)
    }

    pub fn authorize_feedback_at(
        &self,
        now: DateTime<Utc>,
        request: AuthorizeFeedbackRequest,
    ) -> TrustResult<FeedbackAuthorization> {
        facade_internal::feedback::authorize_impl(self, now, request)
    }

    pub fn submit_feedback(&self, request: SubmitFeedbackRequest) -> TrustResult<FeedbackRecord> {
        self.submit_feedback_at(Utc::now(), request)
    }

    pub fn submit_feedback_at(
        &self,
        now: DateTime<Utc>,
        request: SubmitFeedbackRequest,
    ) -> TrustResult<FeedbackRecord> {
        facade_internal::feedback::submit_impl(self, now, request)
    }

    pub fn revoke_feedback_authorization(
        &self,
        authorization_id: &str,
        owner: &str,
    ) -> TrustResult<FeedbackAuthorization> {
        self.revoke_feedback_authorization_at(Utc::now(), authorization_id, owner)
    }

    pub fn revoke_feedback_authorization_at(
        &self,
        now: DateTime<Utc>,
        authorization_id: &str,
        owner: &str,
    ) -> TrustResult<FeedbackAuthorization> {
        facade_internal::feedback::revoke_authorization_impl(self, now, authorization_id, owner)
    }

    pub fn retract_feedback(&self, feedback_id: &str, client: &str) -> TrustResult<FeedbackRecord> {
        self.retract_feedback_at(Utc::now(), feedback_id, client)
    }

    pub fn retract_feedback_at(
        &self,
        now: DateTime<Utc>,
        feedback_id: &str,
        client: &str,
    ) -> TrustResult<FeedbackRecord> {
        facade_internal::feedback::retract_impl(self, now, feedback_id, client)
    }

    /// Current score, or None when the agent has no weighted feedback.
    pub fn reputation(&self, agent: &str) -> TrustResult<Option<f64>> {
        Ok(self.reputation_aggregator().score(&AgentRef::parse(agent)?))
    }

    pub fn reputation_score(&self, agent: &str) -> TrustResult<ReputationScore> {
        Ok(self.reputation_aggregator().get(&AgentRef::parse(agent)?))
    }

    pub fn feedback_records(&self, agent: &str) -> TrustResult<Vec<FeedbackRecord>> {
        Ok(self.feedback.records_for(&AgentRef::parse(agent)?))
    }

    // --- persistence ---

    pub fn snapshot(&self) -> TrustSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> TrustSnapshot {
        TrustSnapshot::capture(now, &self.mandates, &self.feedback)
    }

    /// Replace all engine state with `snapshot` after validating it.
    ///
    /// On error the current state is left untouched.
    pub fn restore(&mut self, snapshot: TrustSnapshot) -> Result<(), SnapshotError> {
        let weighting = *self.feedback.weighting();
        let policy = self.feedback.reputation().policy().clone();
        let (mandates, feedback) = snapshot.restore(weighting, policy)?;
        self.mandates = mandates;
        self.feedback = feedback;
        tracing::info!(
            mandates = self.mandates.len(),
            "trust registry restored from snapshot"
        );
        Ok(())
    }

    // --- helpers shared with facade_internal ---

    fn parse_mandate_id(&self, value: &str) -> TrustResult<MandateId> {
        MandateId::parse_with_limit(value, self.config.max_id_len)
    }

    fn parse_principal(&self, value: &str) -> TrustResult<PrincipalRef> {
        PrincipalRef::parse_with_limit(value, self.config.max_id_len)
    }

    fn parse_client(&self, value: &str) -> TrustResult<ClientRef> {
        ClientRef::parse_with_limit(value, self.config.max_id_len)
    }

    fn parse_authorization_id(value: &str) -> TrustResult<AuthorizationId> {
        AuthorizationId::parse(value)
    }

    fn parse_feedback_id(value: &str) -> TrustResult<FeedbackId> {
        FeedbackId::parse(value)
    }

    fn emit(&self, now: DateTime<Utc>, event: LifecycleEvent) {
        tracing::debug!(event_type = event.event_type(), "emitting lifecycle event");
        self.events
            .emit(event.into_envelope(self.config.event_source.clone(), now));
    }

    fn principal_matches(&self, mandate: &Mandate, caller: &str) -> TrustResult<bool> {
        Ok(self.parse_principal(caller)? == mandate.principal)
    }

    fn unknown_agent(agent: &AgentRef) -> TrustError {
        TrustError::not_found(crate::errors::Entity::Agent, agent)
    }
}
