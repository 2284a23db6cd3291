//! Caller-facing request types.
//!
//! Identifiers arrive as strings and are validated by the registry against
//! the configured limits before any engine is touched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextDigest;
use crate::feedback::RatingVector;
use crate::mandate::MandateKind;

/// Create (or amend into) a mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMandateRequest {
    pub mandate_id: String,

    /// `sha256:<hex>` agent digest
    pub agent: String,

    /// Principal granting the mandate; also the caller
    pub principal: String,

    pub kind: MandateKind,

    pub context_digest: ContextDigest,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// None = configured default window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revalidation_window_secs: Option<i64>,

    /// 0 = unlimited
    #[serde(default)]
    pub max_executions: u64,
}

impl CreateMandateRequest {
    pub fn new(
        mandate_id: impl Into<String>,
        agent: impl Into<String>,
        principal: impl Into<String>,
        kind: MandateKind,
        context_digest: ContextDigest,
    ) -> Self {
        Self {
            mandate_id: mandate_id.into(),
            agent: agent.into(),
            principal: principal.into(),
            kind,
            context_digest,
            expires_at: None,
            revalidation_window_secs: None,
            max_executions: 0,
        }
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_revalidation_window_secs(mut self, secs: i64) -> Self {
        self.revalidation_window_secs = Some(secs);
        self
    }

    pub fn with_max_executions(mut self, max_executions: u64) -> Self {
        self.max_executions = max_executions;
        self
    }
}

/// Report (and count) one execution of a mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub mandate_id: String,

    /// Amount about to move, checked against the delegated spend cap
    pub amount: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant: Option<String>,
}

impl ExecutionRequest {
    pub fn new(mandate_id: impl Into<String>, amount: u64) -> Self {
        Self {
            mandate_id: mandate_id.into(),
            amount,
            capability: None,
            merchant: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_merchant(mut self, merchant: impl Into<String>) -> Self {
        self.merchant = Some(merchant.into());
        self
    }
}

/// Issue a feedback slot on behalf of the agent owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizeFeedbackRequest {
    pub agent: String,
    pub client: String,
    /// Caller; must own the agent
    pub owner: String,
    pub max_submissions: u32,
    pub expires_at: DateTime<Utc>,
}

/// Submit feedback through a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitFeedbackRequest {
    pub authorization_id: String,
    /// Caller; must be the slot's client
    pub client: String,
    pub ratings: RatingVector,
    /// Reference handed to the payment verifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_proof: Option<String>,
}

impl SubmitFeedbackRequest {
    pub fn new(
        authorization_id: impl Into<String>,
        client: impl Into<String>,
        ratings: RatingVector,
    ) -> Self {
        Self {
            authorization_id: authorization_id.into(),
            client: client.into(),
            ratings,
            payment_proof: None,
        }
    }

    pub fn with_payment_proof(mut self, proof: impl Into<String>) -> Self {
        self.payment_proof = Some(proof.into());
        self
    }
}
