//! Contracts of the external collaborators the registry consults.
//!
//! All three are synchronous, side-effect-free lookups from the registry's
//! point of view. Implementations typically front a ledger or an attestation
//! service and must be safe to call from many threads at once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{TrustError, TrustResult};
use crate::ids::{AgentRef, PrincipalRef};

/// Agent registration lookups.
pub trait IdentityRegistry: Send + Sync {
    /// Whether the agent is registered.
    fn resolve_agent(&self, agent: &AgentRef) -> bool;

    /// Whether `principal` owns `agent`.
    fn is_owner(&self, agent: &AgentRef, principal: &PrincipalRef) -> bool;
}

/// Verifies the principal's delegation of authority to an agent.
///
/// Signature checking happens inside the implementation; the registry only
/// sees the resulting claims.
pub trait DelegationVerifier: Send + Sync {
    fn verify_delegation(&self, agent: &AgentRef, principal: &PrincipalRef) -> Delegation;
}

/// Resolves a payment proof to its verified amount.
pub trait PaymentVerifier: Send + Sync {
    /// `None` = the proof could not be verified.
    fn verify_payment(&self, proof_ref: &str) -> Option<u64>;
}

/// Verified delegation claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub valid: bool,

    /// Per-execution spend cap (0 = unlimited)
    #[serde(default)]
    pub max_spend: u64,

    /// Allowed capabilities (empty = any)
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Allowed merchants (empty = any)
    #[serde(default)]
    pub merchants: Vec<String>,

    /// None = never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Delegation {
    /// No delegation on record.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Valid delegation with no limits.
    pub fn unrestricted() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    pub fn with_max_spend(mut self, max_spend: u64) -> Self {
        self.max_spend = max_spend;
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_merchants<I, S>(mut self, merchants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.merchants = merchants.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Valid and not past expiry (expiry extended by `skew`).
    pub fn is_active_at(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        if !self.valid {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => match expires_at.checked_add_signed(skew) {
                Some(limit) => now < limit,
                None => true,
            },
            None => true,
        }
    }

    /// Check one execution against the delegation's limits.
    pub(crate) fn permits(
        &self,
        now: DateTime<Utc>,
        skew: Duration,
        amount: u64,
        capability: Option<&str>,
        merchant: Option<&str>,
    ) -> TrustResult<()> {
        if !self.valid {
            return Err(TrustError::unauthorized("no valid delegation"));
        }
        if !self.is_active_at(now, skew) {
            return Err(TrustError::unauthorized(format!(
                "delegation expired at {}",
                self.expires_at.map(|t| t.to_rfc3339()).unwrap_or_default()
            )));
        }
        if self.max_spend != 0 && amount > self.max_spend {
            return Err(TrustError::unauthorized(format!(
                "amount {amount} exceeds delegated spend cap {}",
                self.max_spend
            )));
        }
        check_allowed("capability", &self.capabilities, capability)?;
        check_allowed("merchant", &self.merchants, merchant)
    }
}

fn check_allowed(what: &str, allowed: &[String], requested: Option<&str>) -> TrustResult<()> {
    if allowed.is_empty() {
        return Ok(());
    }
    match requested {
        Some(value) if allowed.iter().any(|a| a == value) => Ok(()),
        Some(value) => Err(TrustError::unauthorized(format!(
            "{what} '{value}' not delegated"
        ))),
        None => Err(TrustError::unauthorized(format!(
            "delegation restricts {what}, none given"
        ))),
    }
}
