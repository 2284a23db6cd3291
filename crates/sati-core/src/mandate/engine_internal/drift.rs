use super::super::{MandateEngine, TrustError, TrustResult};
use crate::context::ContextDigest;
use crate::ids::MandateId;
use crate::mandate::types::{Mandate, MandateStatus};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub(crate) fn check_drift_impl(
    engine: &MandateEngine,
    id: &MandateId,
    current: &ContextDigest,
) -> TrustResult<bool> {
    let slot = engine.slot(id)?;
    let mandate = slot.lock();
    let drifted = mandate.context_digest != *current;
    debug!(mandate_id = %id, drifted, "checked context drift");
    Ok(drifted)
}

pub(crate) fn flag_drift_impl(
    engine: &MandateEngine,
    now: DateTime<Utc>,
    id: &MandateId,
    on_commit: impl FnOnce(MandateStatus),
) -> TrustResult<MandateStatus> {
    let slot = engine.slot(id)?;
    let mut mandate = slot.lock();

    let status = mandate.status_at(now);
    if status.is_terminal() {
        return Err(TrustError::mandate_state(id, status));
    }

    if !mandate.revalidation_required {
        mandate.revalidation_required = true;
        mandate.updated_at = now;
        warn!(mandate_id = %id, "context drift flagged, revalidation required");
    }

    let status = mandate.status_at(now);
    on_commit(status);
    Ok(status)
}

pub(crate) fn revalidate_impl(
    engine: &MandateEngine,
    now: DateTime<Utc>,
    id: &MandateId,
    new_digest: ContextDigest,
    authorized_by_principal: bool,
    on_commit: impl FnOnce(&Mandate),
) -> TrustResult<Mandate> {
    let slot = engine.slot(id)?;
    let mut mandate = slot.lock();

    if !authorized_by_principal {
        warn!(mandate_id = %id, "revalidation rejected: caller is not the principal");
        return Err(TrustError::unauthorized(format!(
            "only the principal may revalidate mandate {id}"
        )));
    }

    let status = mandate.status_at(now);
    if status.is_terminal() {
        return Err(TrustError::mandate_state(id, status));
    }

    let digest_changed = mandate.context_digest != new_digest;
    mandate.context_digest = new_digest;
    mandate.revalidation_required = false;
    mandate.last_validated_at = now;
    mandate.updated_at = now;

    info!(
        mandate_id = %id,
        previous = %status,
        digest_changed,
        "mandate revalidated"
    );

    on_commit(&*mandate);
    Ok(mandate.clone())
}
