//! Mandate engine.
//!
//! Each mandate sits behind its own mutex inside a sharded map, so every
//! read-check-write runs atomically per mandate id while unrelated mandates
//! proceed in parallel.
//!
//! Time-dependent operations come in pairs: `op_at(now, ..)` takes an explicit
//! instant, `op(..)` uses `Utc::now()`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::types::{ExecutionReceipt, Mandate, MandateStatus, NewMandate};
use crate::context::ContextDigest;
use crate::errors::{Entity, TrustError, TrustResult};
use crate::ids::MandateId;

#[path = "engine_internal/mod.rs"]
mod engine_internal;

type Slot = Arc<Mutex<Mandate>>;

/// In-memory mandate lifecycle engine.
#[derive(Debug, Default)]
pub struct MandateEngine {
    mandates: DashMap<MandateId, Slot>,
}

impl MandateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new mandate. Its status starts as `Active`.
    pub fn create(&self, new: NewMandate) -> TrustResult<Mandate> {
        self.create_at(Utc::now(), new)
    }

    pub fn create_at(&self, now: DateTime<Utc>, new: NewMandate) -> TrustResult<Mandate> {
        engine_internal::lifecycle::create_impl(self, now, new, |_| {})
    }

    /// Snapshot of a single mandate.
    pub fn get(&self, id: &MandateId) -> TrustResult<Mandate> {
        Ok(self.slot(id)?.lock().clone())
    }

    pub fn status(&self, id: &MandateId) -> TrustResult<MandateStatus> {
        self.status_at(Utc::now(), id)
    }

    pub fn status_at(&self, now: DateTime<Utc>, id: &MandateId) -> TrustResult<MandateStatus> {
        Ok(self.slot(id)?.lock().status_at(now))
    }

    /// Compare `current` against the stored context digest.
    ///
    /// Read-only: never sets the revalidation flag. Call
    /// [`flag_drift`](Self::flag_drift) to act on a positive result.
    pub fn check_drift(&self, id: &MandateId, current: &ContextDigest) -> TrustResult<bool> {
        engine_internal::drift::check_drift_impl(self, id, current)
    }

    /// Mark the mandate as requiring revalidation. Idempotent.
    pub fn flag_drift(&self, id: &MandateId) -> TrustResult<MandateStatus> {
        self.flag_drift_at(Utc::now(), id)
    }

    pub fn flag_drift_at(&self, now: DateTime<Utc>, id: &MandateId) -> TrustResult<MandateStatus> {
        engine_internal::drift::flag_drift_impl(self, now, id, |_| {})
    }

    /// Refresh the recorded context and clear staleness.
    ///
    /// `authorized_by_principal` must come from the caller's identity check
    /// against [`Mandate::principal`].
    pub fn revalidate(
        &self,
        id: &MandateId,
        new_digest: ContextDigest,
        authorized_by_principal: bool,
    ) -> TrustResult<Mandate> {
        self.revalidate_at(Utc::now(), id, new_digest, authorized_by_principal)
    }

    pub fn revalidate_at(
        &self,
        now: DateTime<Utc>,
        id: &MandateId,
        new_digest: ContextDigest,
        authorized_by_principal: bool,
    ) -> TrustResult<Mandate> {
        engine_internal::drift::revalidate_impl(
            self,
            now,
            id,
            new_digest,
            authorized_by_principal,
            |_| {},
        )
    }

    /// Permission check: Ok iff the mandate is `Active`. Does not count.
    pub fn ensure_executable(&self, id: &MandateId) -> TrustResult<()> {
        self.ensure_executable_at(Utc::now(), id)
    }

    pub fn ensure_executable_at(&self, now: DateTime<Utc>, id: &MandateId) -> TrustResult<()> {
        let status = self.status_at(now, id)?;
        if !status.is_executable() {
            return Err(TrustError::mandate_state(id, status));
        }
        Ok(())
    }

    /// Usage accounting: increment the execution count of an `Active` mandate.
    pub fn record_execution(&self, id: &MandateId) -> TrustResult<ExecutionReceipt> {
        self.record_execution_at(Utc::now(), id)
    }

    pub fn record_execution_at(
        &self,
        now: DateTime<Utc>,
        id: &MandateId,
    ) -> TrustResult<ExecutionReceipt> {
        engine_internal::lifecycle::record_execution_impl(self, now, id, |_| {})
    }

    /// Terminate the mandate on the principal's request.
    pub fn revoke(
        &self,
        id: &MandateId,
        authorized_by_principal: bool,
        reason: Option<String>,
    ) -> TrustResult<Mandate> {
        self.revoke_at(Utc::now(), id, authorized_by_principal, reason)
    }

    pub fn revoke_at(
        &self,
        now: DateTime<Utc>,
        id: &MandateId,
        authorized_by_principal: bool,
        reason: Option<String>,
    ) -> TrustResult<Mandate> {
        engine_internal::lifecycle::revoke_impl(
            self,
            now,
            id,
            authorized_by_principal,
            reason,
            |_| {},
        )
    }

    /// Replace a live mandate with a successor. Returns the successor.
    pub fn amend(
        &self,
        old_id: &MandateId,
        authorized_by_principal: bool,
        successor: NewMandate,
    ) -> TrustResult<Mandate> {
        self.amend_at(Utc::now(), old_id, authorized_by_principal, successor)
    }

    pub fn amend_at(
        &self,
        now: DateTime<Utc>,
        old_id: &MandateId,
        authorized_by_principal: bool,
        successor: NewMandate,
    ) -> TrustResult<Mandate> {
        engine_internal::lifecycle::amend_impl(
            self,
            now,
            old_id,
            authorized_by_principal,
            successor,
            |_, _| {},
        )
    }

    pub fn len(&self) -> usize {
        self.mandates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mandates.is_empty()
    }

    /// All mandates, ordered by id.
    pub fn list(&self) -> Vec<Mandate> {
        // Collect handles first so no shard guard is held while locking.
        let slots: Vec<Slot> = self
            .mandates
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let mut out: Vec<Mandate> = slots.iter().map(|slot| slot.lock().clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Rebuild from previously listed mandates.
    pub(crate) fn from_mandates(mandates: Vec<Mandate>) -> TrustResult<Self> {
        let engine = Self::new();
        for mandate in mandates {
            let id = mandate.id.clone();
            if engine
                .mandates
                .insert(id.clone(), Arc::new(Mutex::new(mandate)))
                .is_some()
            {
                return Err(TrustError::DuplicateId { id: id.to_string() });
            }
        }
        Ok(engine)
    }

    fn slot(&self, id: &MandateId) -> TrustResult<Slot> {
        self.mandates
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TrustError::not_found(Entity::Mandate, id))
    }
}

/// Commit hooks.
///
/// Each `on_commit` runs once the mutation has been applied and while the
/// mandate's lock (or, for creation, the id claim) is still held, so hooks
/// observe mutations of one mandate in commit order. Hooks must not call
/// back into the engine.
impl MandateEngine {
    pub(crate) fn create_with_hook(
        &self,
        now: DateTime<Utc>,
        new: NewMandate,
        on_commit: impl FnOnce(&Mandate),
    ) -> TrustResult<Mandate> {
        engine_internal::lifecycle::create_impl(self, now, new, on_commit)
    }

    pub(crate) fn flag_drift_with_hook(
        &self,
        now: DateTime<Utc>,
        id: &MandateId,
        on_commit: impl FnOnce(MandateStatus),
    ) -> TrustResult<MandateStatus> {
        engine_internal::drift::flag_drift_impl(self, now, id, on_commit)
    }

    pub(crate) fn revalidate_with_hook(
        &self,
        now: DateTime<Utc>,
        id: &MandateId,
        new_digest: ContextDigest,
        authorized_by_principal: bool,
        on_commit: impl FnOnce(&Mandate),
    ) -> TrustResult<Mandate> {
        engine_internal::drift::revalidate_impl(
            self,
            now,
            id,
            new_digest,
            authorized_by_principal,
            on_commit,
        )
    }

    pub(crate) fn record_execution_with_hook(
        &self,
        now: DateTime<Utc>,
        id: &MandateId,
        on_commit: impl FnOnce(&ExecutionReceipt),
    ) -> TrustResult<ExecutionReceipt> {
        engine_internal::lifecycle::record_execution_impl(self, now, id, on_commit)
    }

    pub(crate) fn revoke_with_hook(
        &self,
        now: DateTime<Utc>,
        id: &MandateId,
        authorized_by_principal: bool,
        reason: Option<String>,
        on_commit: impl FnOnce(&Mandate),
    ) -> TrustResult<Mandate> {
        engine_internal::lifecycle::revoke_impl(
            self,
            now,
            id,
            authorized_by_principal,
            reason,
            on_commit,
        )
    }

    /// `on_commit` receives the amended mandate, then its successor.
    pub(crate) fn amend_with_hook(
        &self,
        now: DateTime<Utc>,
        old_id: &MandateId,
        authorized_by_principal: bool,
        successor: NewMandate,
        on_commit: impl FnOnce(&Mandate, &Mandate),
    ) -> TrustResult<Mandate> {
        engine_internal::lifecycle::amend_impl(
            self,
            now,
            old_id,
            authorized_by_principal,
            successor,
            on_commit,
        )
    }
}
