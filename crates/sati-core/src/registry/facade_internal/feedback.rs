use super::super::TrustRegistry;
use crate::errors::{TrustError, TrustResult};
use crate::events::LifecycleEvent;
use crate::feedback::{FeedbackAuthorization, FeedbackRecord, NewAuthorization};
use crate::ids::AgentRef;
use crate::registry::requests::{AuthorizeFeedbackRequest, SubmitFeedbackRequest};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub(crate) fn authorize_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    request: AuthorizeFeedbackRequest,
) -> TrustResult<FeedbackAuthorization> {
    let agent = AgentRef::parse(&request.agent)?;
    let client = registry.parse_client(&request.client)?;
    let owner = registry.parse_principal(&request.owner)?;

    let limits = &registry.config.feedback;
    if request.max_submissions > limits.max_submissions_cap {
        return Err(TrustError::invalid(format!(
            "max_submissions {} exceeds cap {}",
            request.max_submissions, limits.max_submissions_cap
        )));
    }
    if request.expires_at.signed_duration_since(now) > registry.config.max_authorization() {
        return Err(TrustError::invalid(format!(
            "authorization lifetime exceeds {}s",
            limits.max_authorization_secs
        )));
    }

    if !registry.identity.resolve_agent(&agent) {
        return Err(TrustRegistry::unknown_agent(&agent));
    }
    if !registry.identity.is_owner(&agent, &owner) {
        warn!(agent = %agent, caller = %owner, "feedback authorization rejected: not the owner");
        return Err(TrustError::unauthorized(format!(
            "{owner} does not own agent {agent}"
        )));
    }

    registry.feedback.authorize_with_hook(
        now,
        NewAuthorization::new(agent, client, request.max_submissions, request.expires_at),
        |authorization| {
            registry.emit(
                now,
                LifecycleEvent::FeedbackAuthorized {
                    authorization_id: authorization.id,
                    agent: authorization.agent,
                    client: authorization.client.clone(),
                    max_submissions: authorization.max_submissions,
                    expires_at: authorization.expires_at,
                },
            );
        },
    )
}

pub(crate) fn submit_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    request: SubmitFeedbackRequest,
) -> TrustResult<FeedbackRecord> {
    let id = TrustRegistry::parse_authorization_id(&request.authorization_id)?;
    let client = registry.parse_client(&request.client)?;

    let slot = registry.feedback.authorization(&id)?;
    if slot.client != client {
        warn!(authorization_id = %id, caller = %client, "submission rejected: wrong client");
        return Err(TrustError::unauthorized(format!(
            "client {client} is not authorized by {id}"
        )));
    }

    let amount = match request.payment_proof.as_deref() {
        Some(proof) => {
            let verified = registry.payments.verify_payment(proof);
            if verified.is_none() {
                debug!(authorization_id = %id, "payment proof unverified, using minimum weight");
            }
            verified
        }
        None => None,
    };

    registry
        .feedback
        .consume_with_hook(now, &id, request.ratings, amount, |record| {
            registry.emit(
                now,
                LifecycleEvent::FeedbackSubmitted {
                    feedback_id: record.id,
                    authorization_id: record.authorization,
                    agent: record.agent,
                    payment_weight: record.payment_weight,
                },
            );
        })
}

pub(crate) fn revoke_authorization_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    authorization_id: &str,
    owner: &str,
) -> TrustResult<FeedbackAuthorization> {
    let id = TrustRegistry::parse_authorization_id(authorization_id)?;
    let owner = registry.parse_principal(owner)?;

    let slot = registry.feedback.authorization(&id)?;
    let authorized = registry.identity.is_owner(&slot.agent, &owner);

    registry
        .feedback
        .revoke_authorization_with_hook(now, &id, authorized, |revoked| {
            registry.emit(
                now,
                LifecycleEvent::FeedbackAuthorizationRevoked {
                    authorization_id: revoked.id,
                    agent: revoked.agent,
                    client: revoked.client.clone(),
                },
            );
        })
}

pub(crate) fn retract_impl(
    registry: &TrustRegistry,
    now: DateTime<Utc>,
    feedback_id: &str,
    client: &str,
) -> TrustResult<FeedbackRecord> {
    let id = TrustRegistry::parse_feedback_id(feedback_id)?;
    let client = registry.parse_client(client)?;

    registry
        .feedback
        .retract_with_hook(now, &id, &client, |record| {
            registry.emit(
                now,
                LifecycleEvent::FeedbackRetracted {
                    feedback_id: record.id,
                    agent: record.agent,
                },
            );
        })
}
