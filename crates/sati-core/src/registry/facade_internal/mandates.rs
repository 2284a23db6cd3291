use super::super::TrustRegistry;
use crate::context::ContextDigest;
use crate::errors::{TrustError, TrustResult};
use crate::events::LifecycleEvent;
use crate::ids::AgentRef;
use crate::mandate::{ExecutionReceipt, Mandate, MandateStatus, NewMandate};
use crate::registry::requests::{CreateMandateRequest, ExecutionRequest};
use chrono::{DateTime, Duration, Utc};
use tracing::warn;

/// Parse a create request and check the agent and delegation behind it.
fn prepare_new_mandate(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    request: CreateMandateRequest,
) -> TrustResult<NewMandate> {
    let id = registry.parse_mandate_id(&request.mandate_id)?;
    let agent = AgentRef::parse(&request.agent)?;
    let principal = registry.parse_principal(&request.principal)?;
    let window = match request.revalidation_window_secs {
        Some(secs) => Duration::try_seconds(secs).ok_or_else(|| {
            TrustError::invalid(format!("revalidation window out of range: {secs}s"))
        })?,
        None => registry.config.default_revalidation_window(),
    };

    if !registry.identity.resolve_agent(&agent) {
        warn!(mandate_id = %id, agent = %agent, "mandate rejected: unknown agent");
        return Err(TrustRegistry::unknown_agent(&agent));
    }
    let delegation = registry.delegations.verify_delegation(&agent, &principal);
    if !delegation.is_active_at(now, registry.config.clock_skew()) {
        warn!(
            mandate_id = %id,
            agent = %agent,
            principal = %principal,
            "mandate rejected: no active delegation"
        );
        return Err(TrustError::unauthorized(format!(
            "principal {principal} has no active delegation to agent {agent}"
        )));
    }

    let mut new = NewMandate::new(id, agent, principal, request.kind, request.context_digest)
        .with_revalidation_window(window)
        .with_max_executions(request.max_executions);
    if let Some(expires_at) = request.expires_at {
        new = new.with_expires_at(expires_at);
    }
    Ok(new)
}

fn created_event(mandate: &Mandate) -> LifecycleEvent {
    LifecycleEvent::MandateCreated {
        mandate_id: mandate.id.clone(),
        agent: mandate.agent,
        principal: mandate.principal.clone(),
        kind: mandate.kind,
        max_executions: mandate.max_executions,
        expires_at: mandate.expires_at,
    }
}

pub(crate) fn create_mandate_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    request: CreateMandateRequest,
) -> TrustResult<Mandate> {
    let new = prepare_new_mandate(registry, now, request)?;
    registry.mandates.create_with_hook(now, new, |mandate| {
        registry.emit(now, created_event(mandate));
    })
}

pub(crate) fn flag_drift_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    mandate_id: &str,
) -> TrustResult<MandateStatus> {
    let id = registry.parse_mandate_id(mandate_id)?;
    registry.mandates.flag_drift_with_hook(now, &id, |status| {
        registry.emit(
            now,
            LifecycleEvent::MandateDriftFlagged {
                mandate_id: id.clone(),
                status,
            },
        );
    })
}

pub(crate) fn revalidate_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    mandate_id: &str,
    caller: &str,
    new_digest: ContextDigest,
) -> TrustResult<Mandate> {
    let id = registry.parse_mandate_id(mandate_id)?;
    let current = registry.mandates.get(&id)?;
    let authorized = registry.principal_matches(&current, caller)?;

    registry
        .mandates
        .revalidate_with_hook(now, &id, new_digest, authorized, |mandate| {
            registry.emit(
                now,
                LifecycleEvent::MandateRevalidated {
                    mandate_id: mandate.id.clone(),
                    context_digest: mandate.context_digest,
                },
            );
        })
}

pub(crate) fn record_execution_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    request: ExecutionRequest,
) -> TrustResult<ExecutionReceipt> {
    let id = registry.parse_mandate_id(&request.mandate_id)?;
    let mandate = registry.mandates.get(&id)?;

    let delegation = registry
        .delegations
        .verify_delegation(&mandate.agent, &mandate.principal);
    if let Err(err) = delegation.permits(
        now,
        registry.config.clock_skew(),
        request.amount,
        request.capability.as_deref(),
        request.merchant.as_deref(),
    ) {
        warn!(
            mandate_id = %id,
            amount = request.amount,
            error = %err,
            "execution rejected by delegation"
        );
        return Err(err);
    }

    registry
        .mandates
        .record_execution_with_hook(now, &id, |receipt| {
            registry.emit(
                now,
                LifecycleEvent::MandateExecuted {
                    mandate_id: receipt.mandate_id.clone(),
                    execution_id: receipt.execution_id.clone(),
                    execution_count: receipt.execution_count,
                    amount: request.amount,
                    status_after: receipt.status_after,
                },
            );
        })
}

pub(crate) fn revoke_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    mandate_id: &str,
    caller: &str,
    reason: Option<String>,
) -> TrustResult<Mandate> {
    let id = registry.parse_mandate_id(mandate_id)?;
    let current = registry.mandates.get(&id)?;
    let authorized = registry.principal_matches(&current, caller)?;

    registry
        .mandates
        .revoke_with_hook(now, &id, authorized, reason.clone(), |mandate| {
            registry.emit(
                now,
                LifecycleEvent::MandateRevoked {
                    mandate_id: mandate.id.clone(),
                    reason,
                },
            );
        })
}

pub(crate) fn amend_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    mandate_id: &str,
    caller: &str,
    successor: CreateMandateRequest,
) -> TrustResult<Mandate> {
    let id = registry.parse_mandate_id(mandate_id)?;
    let current = registry.mandates.get(&id)?;
    if !registry.principal_matches(&current, caller)? {
        warn!(mandate_id = %id, "amendment rejected: caller is not the principal");
        return Err(TrustError::unauthorized(format!(
            "only the principal may amend mandate {id}"
        )));
    }

    let new = prepare_new_mandate(registry, now, successor)?;
    registry
        .mandates
        .amend_with_hook(now, &id, true, new, |old, created| {
            registry.emit(
                now,
                LifecycleEvent::MandateAmended {
                    mandate_id: old.id.clone(),
                    successor: created.id.clone(),
                },
            );
            registry.emit(now, created_event(created));
        })
}
