use super::super::{MandateEngine, TrustError, TrustResult};
use crate::ids::MandateId;
use crate::mandate::types::{
    compute_execution_id, ExecutionReceipt, Mandate, MandateStatus, NewMandate, Termination,
};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) fn create_impl(
    engine: &MandateEngine,
    now: DateTime<Utc>,
    new: NewMandate,
    on_commit: impl FnOnce(&Mandate),
) -> TrustResult<Mandate> {
    new.validate(now)?;
    insert_new(engine, now, new, on_commit)
}

/// Insert a validated mandate; the vacant-entry check makes the id claim atomic.
///
/// `on_commit` runs under the shard lock, before the mandate becomes visible.
fn insert_new(
    engine: &MandateEngine,
    now: DateTime<Utc>,
    new: NewMandate,
    on_commit: impl FnOnce(&Mandate),
) -> TrustResult<Mandate> {
    match engine.mandates.entry(new.id.clone()) {
        Entry::Occupied(_) => Err(TrustError::DuplicateId {
            id: new.id.to_string(),
        }),
        Entry::Vacant(vacant) => {
            let mandate = new.into_mandate(now);
            info!(
                mandate_id = %mandate.id,
                agent = %mandate.agent,
                kind = mandate.kind.as_str(),
                max_executions = mandate.max_executions,
                expires_at = ?mandate.expires_at,
                "mandate created"
            );
            on_commit(&mandate);
            vacant.insert(Arc::new(Mutex::new(mandate.clone())));
            Ok(mandate)
        }
    }
}

pub(crate) fn record_execution_impl(
    engine: &MandateEngine,
    now: DateTime<Utc>,
    id: &MandateId,
    on_commit: impl FnOnce(&ExecutionReceipt),
) -> TrustResult<ExecutionReceipt> {
    let slot = engine.slot(id)?;
    let mut mandate = slot.lock();

    let status = mandate.status_at(now);
    if !status.is_executable() {
        debug!(mandate_id = %id, status = %status, "execution rejected");
        return Err(TrustError::mandate_state(id, status));
    }

    mandate.execution_count += 1;
    mandate.updated_at = now;

    let status_after = mandate.status_at(now);
    if status_after == MandateStatus::Exhausted {
        info!(
            mandate_id = %id,
            execution_count = mandate.execution_count,
            "mandate exhausted"
        );
    } else {
        debug!(
            mandate_id = %id,
            execution_count = mandate.execution_count,
            "execution recorded"
        );
    }

    let receipt = ExecutionReceipt {
        mandate_id: id.clone(),
        execution_id: compute_execution_id(id, mandate.execution_count),
        execution_count: mandate.execution_count,
        remaining: mandate.remaining_executions(),
        status_after,
        executed_at: now,
    };
    on_commit(&receipt);
    Ok(receipt)
}

pub(crate) fn revoke_impl(
    engine: &MandateEngine,
    now: DateTime<Utc>,
    id: &MandateId,
    authorized_by_principal: bool,
    reason: Option<String>,
    on_commit: impl FnOnce(&Mandate),
) -> TrustResult<Mandate> {
    let slot = engine.slot(id)?;
    let mut mandate = slot.lock();

    if !authorized_by_principal {
        warn!(mandate_id = %id, "revocation rejected: caller is not the principal");
        return Err(TrustError::unauthorized(format!(
            "only the principal may revoke mandate {id}"
        )));
    }

    let status = mandate.status_at(now);
    if status.is_terminal() {
        return Err(TrustError::mandate_state(id, status));
    }

    info!(mandate_id = %id, reason = ?reason, "mandate revoked");
    mandate.termination = Some(Termination::Revoked { at: now, reason });
    mandate.updated_at = now;

    on_commit(&*mandate);
    Ok(mandate.clone())
}

pub(crate) fn amend_impl(
    engine: &MandateEngine,
    now: DateTime<Utc>,
    old_id: &MandateId,
    authorized_by_principal: bool,
    successor: NewMandate,
    on_commit: impl FnOnce(&Mandate, &Mandate),
) -> TrustResult<Mandate> {
    let slot = engine.slot(old_id)?;
    // Held across the successor insert: per-mandate mutex first, map shard
    // second. No path takes them in the opposite order.
    let mut old = slot.lock();

    if !authorized_by_principal {
        warn!(mandate_id = %old_id, "amendment rejected: caller is not the principal");
        return Err(TrustError::unauthorized(format!(
            "only the principal may amend mandate {old_id}"
        )));
    }

    let status = old.status_at(now);
    if status.is_terminal() {
        return Err(TrustError::mandate_state(old_id, status));
    }

    if successor.principal != old.principal {
        return Err(TrustError::invalid(
            "successor mandate must keep the original principal",
        ));
    }

    successor.validate(now)?;
    let created = insert_new(engine, now, successor, |created| {
        old.termination = Some(Termination::Amended {
            at: now,
            successor: created.id.clone(),
        });
        old.updated_at = now;
        on_commit(&*old, created);
    })?;

    info!(
        mandate_id = %old_id,
        successor = %created.id,
        "mandate amended"
    );

    Ok(created)
}
