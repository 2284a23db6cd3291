//! Feedback authorization engine.
//!
//! Lock order: pair index shard, then slot mutex, then aggregator shard.
//! Retraction takes the retraction shard, then the aggregator shard. No path
//! reverses either order.
//!
//! The crate-internal `*_with_hook` variants run `on_commit` inside those
//! locks, once the change can no longer fail, so the registry publishes
//! events for one slot or record in commit order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::types::{
    AuthorizationStatus, FeedbackAuthorization, FeedbackRecord, NewAuthorization, RatingVector,
};
use super::weight::PaymentWeighting;
use crate::errors::{BlockedState, Entity, TrustError, TrustResult};
use crate::ids::{AgentRef, AuthorizationId, ClientRef, FeedbackId};
use crate::reputation::ReputationAggregator;

type Slot = Arc<Mutex<FeedbackAuthorization>>;
type Pair = (AgentRef, ClientRef);

/// In-memory feedback authorization engine.
#[derive(Debug)]
pub struct FeedbackEngine {
    weighting: PaymentWeighting,
    reputation: Arc<ReputationAggregator>,
    slots: DashMap<AuthorizationId, Slot>,
    /// Most recent slot issued per (agent, client)
    by_pair: DashMap<Pair, AuthorizationId>,
    records: DashMap<FeedbackId, FeedbackRecord>,
    by_agent: DashMap<AgentRef, Vec<FeedbackId>>,
    retractions: DashMap<FeedbackId, DateTime<Utc>>,
}

impl Default for FeedbackEngine {
    fn default() -> Self {
        Self::new(
            PaymentWeighting::default(),
            Arc::new(ReputationAggregator::default()),
        )
    }
}

impl FeedbackEngine {
    pub fn new(weighting: PaymentWeighting, reputation: Arc<ReputationAggregator>) -> Self {
        Self {
            weighting,
            reputation,
            slots: DashMap::new(),
            by_pair: DashMap::new(),
            records: DashMap::new(),
            by_agent: DashMap::new(),
            retractions: DashMap::new(),
        }
    }

    pub fn weighting(&self) -> &PaymentWeighting {
        &self.weighting
    }

    pub fn reputation(&self) -> &Arc<ReputationAggregator> {
        &self.reputation
    }

    /// Issue a slot for `(agent, client)`.
    ///
    /// Fails with `DuplicateAuthorization` while an earlier slot for the pair
    /// is still active; it must lapse, exhaust or be revoked first.
    pub fn authorize(&self, new: NewAuthorization) -> TrustResult<FeedbackAuthorization> {
        self.authorize_at(Utc::now(), new)
    }

    pub fn authorize_at(
        &self,
        now: DateTime<Utc>,
        new: NewAuthorization,
    ) -> TrustResult<FeedbackAuthorization> {
        self.authorize_with_hook(now, new, |_| {})
    }

    pub(crate) fn authorize_with_hook(
        &self,
        now: DateTime<Utc>,
        new: NewAuthorization,
        on_commit: impl FnOnce(&FeedbackAuthorization),
    ) -> TrustResult<FeedbackAuthorization> {
        new.validate(now)?;

        let pair = (new.agent, new.client.clone());
        let authorization = match self.by_pair.entry(pair) {
            Entry::Occupied(mut existing) => {
                let prior = *existing.get();
                if self.is_active(&prior, now) {
                    warn!(
                        agent = %new.agent,
                        client = %new.client,
                        prior = %prior,
                        "feedback authorization rejected: active slot exists"
                    );
                    return Err(TrustError::DuplicateAuthorization {
                        agent: new.agent.to_string(),
                        client: new.client.to_string(),
                    });
                }
                let authorization = self.insert_slot(now, new);
                on_commit(&authorization);
                existing.insert(authorization.id);
                authorization
            }
            Entry::Vacant(vacant) => {
                let authorization = self.insert_slot(now, new);
                on_commit(&authorization);
                vacant.insert(authorization.id);
                authorization
            }
        };

        info!(
            authorization_id = %authorization.id,
            agent = %authorization.agent,
            client = %authorization.client,
            max_submissions = authorization.max_submissions,
            expires_at = %authorization.expires_at,
            "feedback authorized"
        );
        Ok(authorization)
    }

    /// Spend one submission from the slot and aggregate the feedback.
    ///
    /// Checks run in order: unknown slot, revoked, expired, exhausted,
    /// rating validation. Nothing is written unless all pass.
    pub fn consume(
        &self,
        id: &AuthorizationId,
        ratings: RatingVector,
        payment_amount: Option<u64>,
    ) -> TrustResult<FeedbackRecord> {
        self.consume_at(Utc::now(), id, ratings, payment_amount)
    }

    pub fn consume_at(
        &self,
        now: DateTime<Utc>,
        id: &AuthorizationId,
        ratings: RatingVector,
        payment_amount: Option<u64>,
    ) -> TrustResult<FeedbackRecord> {
        self.consume_with_hook(now, id, ratings, payment_amount, |_| {})
    }

    pub(crate) fn consume_with_hook(
        &self,
        now: DateTime<Utc>,
        id: &AuthorizationId,
        ratings: RatingVector,
        payment_amount: Option<u64>,
        on_commit: impl FnOnce(&FeedbackRecord),
    ) -> TrustResult<FeedbackRecord> {
        let slot = self.slot(id)?;
        let mut authorization = slot.lock();

        if authorization.revoked_at.is_some() {
            warn!(authorization_id = %id, "submission on revoked slot");
            return Err(TrustError::InvalidState {
                id: id.to_string(),
                state: BlockedState::Authorization(AuthorizationStatus::Revoked),
            });
        }
        if now >= authorization.expires_at {
            warn!(authorization_id = %id, "submission on expired slot");
            return Err(TrustError::Expired {
                expires_at: authorization.expires_at,
                now,
            });
        }
        if authorization.used_count >= authorization.max_submissions {
            warn!(
                authorization_id = %id,
                used = authorization.used_count,
                "submission on exhausted slot"
            );
            return Err(TrustError::Exhausted {
                used: authorization.used_count,
                max: authorization.max_submissions,
            });
        }
        let scalar_rating = self.reputation.policy().scalarize(&ratings)?;

        let ordinal = authorization.used_count + 1;
        let record = FeedbackRecord {
            id: FeedbackId::compute(id, ordinal),
            authorization: *id,
            agent: authorization.agent,
            client: authorization.client.clone(),
            ratings,
            scalar_rating,
            payment_amount,
            payment_weight: self.weighting.weight_for(payment_amount),
            submitted_at: now,
        };

        self.reputation.append(&record)?;
        authorization.used_count = ordinal;
        // Before the record is stored, so nothing can retract it first.
        on_commit(&record);

        self.records.insert(record.id, record.clone());
        self.by_agent.entry(record.agent).or_default().push(record.id);

        info!(
            authorization_id = %id,
            feedback_id = %record.id,
            agent = %record.agent,
            weight = record.payment_weight,
            used = authorization.used_count,
            max = authorization.max_submissions,
            "feedback submitted"
        );
        Ok(record)
    }

    /// Owner-side revocation of a slot that is still active.
    pub fn revoke_authorization(
        &self,
        id: &AuthorizationId,
        authorized_by_owner: bool,
    ) -> TrustResult<FeedbackAuthorization> {
        self.revoke_authorization_at(Utc::now(), id, authorized_by_owner)
    }

    pub fn revoke_authorization_at(
        &self,
        now: DateTime<Utc>,
        id: &AuthorizationId,
        authorized_by_owner: bool,
    ) -> TrustResult<FeedbackAuthorization> {
        self.revoke_authorization_with_hook(now, id, authorized_by_owner, |_| {})
    }

    pub(crate) fn revoke_authorization_with_hook(
        &self,
        now: DateTime<Utc>,
        id: &AuthorizationId,
        authorized_by_owner: bool,
        on_commit: impl FnOnce(&FeedbackAuthorization),
    ) -> TrustResult<FeedbackAuthorization> {
        let slot = self.slot(id)?;
        let mut authorization = slot.lock();

        if !authorized_by_owner {
            warn!(authorization_id = %id, "slot revocation rejected: caller is not the owner");
            return Err(TrustError::unauthorized(format!(
                "only the agent owner may revoke authorization {id}"
            )));
        }

        let status = authorization.status_at(now);
        if status != AuthorizationStatus::Active {
            return Err(TrustError::InvalidState {
                id: id.to_string(),
                state: BlockedState::Authorization(status),
            });
        }

        authorization.revoked_at = Some(now);
        on_commit(&*authorization);
        info!(authorization_id = %id, used = authorization.used_count, "feedback authorization revoked");
        Ok(authorization.clone())
    }

    /// Withdraw a record on behalf of the client that submitted it.
    ///
    /// The record itself stays stored; the aggregate receives the negative
    /// adjustment. The slot budget is not refunded.
    pub fn retract(&self, id: &FeedbackId, by_client: &ClientRef) -> TrustResult<FeedbackRecord> {
        self.retract_at(Utc::now(), id, by_client)
    }

    pub fn retract_at(
        &self,
        now: DateTime<Utc>,
        id: &FeedbackId,
        by_client: &ClientRef,
    ) -> TrustResult<FeedbackRecord> {
        self.retract_with_hook(now, id, by_client, |_| {})
    }

    pub(crate) fn retract_with_hook(
        &self,
        now: DateTime<Utc>,
        id: &FeedbackId,
        by_client: &ClientRef,
        on_commit: impl FnOnce(&FeedbackRecord),
    ) -> TrustResult<FeedbackRecord> {
        let record = self.record(id)?;
        if record.client != *by_client {
            warn!(feedback_id = %id, client = %by_client, "retraction rejected: not the submitter");
            return Err(TrustError::unauthorized(format!(
                "only the submitting client may retract feedback {id}"
            )));
        }

        match self.retractions.entry(*id) {
            Entry::Occupied(_) => Err(TrustError::InvalidState {
                id: id.to_string(),
                state: BlockedState::Retracted,
            }),
            Entry::Vacant(vacant) => {
                self.reputation.retract(&record)?;
                on_commit(&record);
                vacant.insert(now);
                info!(feedback_id = %id, agent = %record.agent, "feedback retracted");
                Ok(record)
            }
        }
    }

    pub fn authorization(&self, id: &AuthorizationId) -> TrustResult<FeedbackAuthorization> {
        Ok(self.slot(id)?.lock().clone())
    }

    pub fn authorization_status(&self, id: &AuthorizationId) -> TrustResult<AuthorizationStatus> {
        self.authorization_status_at(Utc::now(), id)
    }

    pub fn authorization_status_at(
        &self,
        now: DateTime<Utc>,
        id: &AuthorizationId,
    ) -> TrustResult<AuthorizationStatus> {
        Ok(self.slot(id)?.lock().status_at(now))
    }

    pub fn record(&self, id: &FeedbackId) -> TrustResult<FeedbackRecord> {
        self.records
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TrustError::not_found(Entity::Feedback, id))
    }

    /// Accepted records for `agent`, in submission order.
    pub fn records_for(&self, agent: &AgentRef) -> Vec<FeedbackRecord> {
        let ids: Vec<FeedbackId> = self
            .by_agent
            .get(agent)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.records.get(id).map(|entry| entry.value().clone()))
            .collect()
    }

    pub fn is_retracted(&self, id: &FeedbackId) -> bool {
        self.retractions.contains_key(id)
    }

    /// All slots, ordered by creation time then id.
    pub fn list_authorizations(&self) -> Vec<FeedbackAuthorization> {
        let slots: Vec<Slot> = self
            .slots
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut out: Vec<_> = slots.iter().map(|slot| slot.lock().clone()).collect();
        out.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        out
    }

    /// All records, ordered by submission time then id.
    pub fn list_records(&self) -> Vec<FeedbackRecord> {
        let mut out: Vec<_> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| (a.submitted_at, a.id).cmp(&(b.submitted_at, b.id)));
        out
    }

    pub fn list_retractions(&self) -> Vec<(FeedbackId, DateTime<Utc>)> {
        let mut out: Vec<_> = self
            .retractions
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        out.sort();
        out
    }

    /// Rebuild from listed state. Callers validate cross-references first.
    pub(crate) fn from_parts(
        weighting: PaymentWeighting,
        reputation: Arc<ReputationAggregator>,
        authorizations: Vec<FeedbackAuthorization>,
        records: Vec<FeedbackRecord>,
        retractions: Vec<(FeedbackId, DateTime<Utc>)>,
    ) -> Self {
        let engine = Self::new(weighting, reputation);

        for authorization in authorizations {
            let pair = (authorization.agent, authorization.client.clone());
            // Prefer the unrevoked, newest slot: only that one can still be active.
            let rank = (authorization.revoked_at.is_none(), authorization.created_at);
            let replace = match engine.by_pair.get(&pair) {
                Some(current) => engine
                    .slots
                    .get(current.value())
                    .map(|slot| {
                        let slot = slot.lock();
                        rank > (slot.revoked_at.is_none(), slot.created_at)
                    })
                    .unwrap_or(true),
                None => true,
            };
            if replace {
                engine.by_pair.insert(pair, authorization.id);
            }
            engine
                .slots
                .insert(authorization.id, Arc::new(Mutex::new(authorization)));
        }

        for record in records {
            engine.by_agent.entry(record.agent).or_default().push(record.id);
            engine.records.insert(record.id, record);
        }
        for (id, at) in retractions {
            engine.retractions.insert(id, at);
        }
        engine
    }

    fn is_active(&self, id: &AuthorizationId, now: DateTime<Utc>) -> bool {
        self.slots
            .get(id)
            .map(|entry| entry.value().clone())
            .is_some_and(|slot| slot.lock().status_at(now) == AuthorizationStatus::Active)
    }

    fn insert_slot(&self, now: DateTime<Utc>, new: NewAuthorization) -> FeedbackAuthorization {
        let authorization = FeedbackAuthorization {
            id: AuthorizationId::new(),
            agent: new.agent,
            client: new.client,
            max_submissions: new.max_submissions,
            used_count: 0,
            created_at: now,
            expires_at: new.expires_at,
            revoked_at: None,
        };
        self.slots.insert(
            authorization.id,
            Arc::new(Mutex::new(authorization.clone())),
        );
        authorization
    }

    fn slot(&self, id: &AuthorizationId) -> TrustResult<Slot> {
        self.slots
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TrustError::not_found(Entity::Authorization, id))
    }
}
