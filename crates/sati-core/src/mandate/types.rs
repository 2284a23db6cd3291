//! Mandate data model.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextDigest;
use crate::errors::{TrustError, TrustResult};
use crate::ids::{sha256, AgentRef, MandateId, PrincipalRef};

/// Default revalidation window (30 minutes).
pub const DEFAULT_REVALIDATION_WINDOW_SECS: i64 = 30 * 60;

/// What a mandate authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MandateKind {
    /// Standing intent ("buy 2 tickets under $1000")
    Intent,
    /// Concrete cart ready for checkout
    Cart,
}

impl MandateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intent => "intent",
            Self::Cart => "cart",
        }
    }

    /// Wire code: 0 = intent, 1 = cart.
    pub fn code(&self) -> u8 {
        match self {
            Self::Intent => 0,
            Self::Cart => 1,
        }
    }

    pub fn from_code(code: u8) -> TrustResult<Self> {
        match code {
            0 => Ok(Self::Intent),
            1 => Ok(Self::Cart),
            other => Err(TrustError::invalid(format!("unknown mandate kind: {other}"))),
        }
    }
}

/// Derived mandate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MandateStatus {
    Active,
    Stale,
    Expired,
    Revoked,
    Amended,
    Exhausted,
}

impl MandateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Amended => "amended",
            Self::Exhausted => "exhausted",
        }
    }

    /// Terminal states never become executable again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::Revoked | Self::Amended | Self::Exhausted
        )
    }

    pub fn is_executable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for MandateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit end of a mandate's life, recorded by the principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    Revoked {
        at: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Amended {
        at: DateTime<Utc>,
        successor: MandateId,
    },
}

impl Termination {
    pub fn status(&self) -> MandateStatus {
        match self {
            Self::Revoked { .. } => MandateStatus::Revoked,
            Self::Amended { .. } => MandateStatus::Amended,
        }
    }
}

/// Serde adapter for `chrono::Duration` as whole seconds.
pub(crate) mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Duration::try_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("duration out of range: {secs}s")))
    }
}

/// A recorded mandate.
///
/// Mutated only by the engine: drift flagging (flag only), revalidation
/// (digest + flag + timestamp), execution (counter) and termination.
/// Never deleted; terminal mandates are retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mandate {
    pub id: MandateId,

    pub agent: AgentRef,

    /// User authority that granted the mandate
    pub principal: PrincipalRef,

    pub kind: MandateKind,

    /// Digest of the context at (re)authorization time
    pub context_digest: ContextDigest,

    pub created_at: DateTime<Utc>,

    /// None = never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(with = "duration_secs")]
    pub revalidation_window: Duration,

    pub last_validated_at: DateTime<Utc>,

    /// Set by drift flagging, cleared only by revalidation
    pub revalidation_required: bool,

    /// 0 = unlimited
    pub max_executions: u64,

    pub execution_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<Termination>,

    pub updated_at: DateTime<Utc>,
}

impl Mandate {
    /// Derive the status at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> MandateStatus {
        if let Some(expires_at) = self.expires_at {
            if now >= expires_at {
                return MandateStatus::Expired;
            }
        }
        if let Some(termination) = &self.termination {
            return termination.status();
        }
        if self.max_executions != 0 && self.execution_count >= self.max_executions {
            return MandateStatus::Exhausted;
        }
        if self.revalidation_required || now - self.last_validated_at > self.revalidation_window {
            return MandateStatus::Stale;
        }
        MandateStatus::Active
    }

    /// When the revalidation window lapses (None if out of range).
    pub fn revalidation_due_at(&self) -> Option<DateTime<Utc>> {
        self.last_validated_at
            .checked_add_signed(self.revalidation_window)
    }

    /// Executions left, or None when unlimited.
    pub fn remaining_executions(&self) -> Option<u64> {
        (self.max_executions != 0)
            .then(|| self.max_executions.saturating_sub(self.execution_count))
    }
}

/// Parameters for creating a mandate.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMandate {
    pub id: MandateId,
    pub agent: AgentRef,
    pub principal: PrincipalRef,
    pub kind: MandateKind,
    pub context_digest: ContextDigest,
    pub expires_at: Option<DateTime<Utc>>,
    pub revalidation_window: Duration,
    pub max_executions: u64,
}

impl NewMandate {
    /// Create parameters with no expiry, unlimited executions and the
    /// default revalidation window.
    pub fn new(
        id: MandateId,
        agent: AgentRef,
        principal: PrincipalRef,
        kind: MandateKind,
        context_digest: ContextDigest,
    ) -> Self {
        Self {
            id,
            agent,
            principal,
            kind,
            context_digest,
            expires_at: None,
            revalidation_window: Duration::seconds(DEFAULT_REVALIDATION_WINDOW_SECS),
            max_executions: 0,
        }
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_revalidation_window(mut self, window: Duration) -> Self {
        self.revalidation_window = window;
        self
    }

    pub fn with_max_executions(mut self, max_executions: u64) -> Self {
        self.max_executions = max_executions;
        self
    }

    pub(crate) fn validate(&self, now: DateTime<Utc>) -> TrustResult<()> {
        if self.revalidation_window <= Duration::zero() {
            return Err(TrustError::invalid(format!(
                "revalidation window must be positive, got {}s",
                self.revalidation_window.num_seconds()
            )));
        }
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(TrustError::invalid(format!(
                    "expires_at {expires_at} is not after creation time {now}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn into_mandate(self, now: DateTime<Utc>) -> Mandate {
        Mandate {
            id: self.id,
            agent: self.agent,
            principal: self.principal,
            kind: self.kind,
            context_digest: self.context_digest,
            created_at: now,
            expires_at: self.expires_at,
            revalidation_window: self.revalidation_window,
            last_validated_at: now,
            revalidation_required: false,
            max_executions: self.max_executions,
            execution_count: 0,
            termination: None,
            updated_at: now,
        }
    }
}

/// Receipt returned after a successful execution is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub mandate_id: MandateId,

    /// Content-addressed id of this execution
    pub execution_id: String,

    /// Ordinal execution number (1-indexed)
    pub execution_count: u64,

    /// None = unlimited
    pub remaining: Option<u64>,

    pub status_after: MandateStatus,

    pub executed_at: DateTime<Utc>,
}

/// Compute a deterministic execution id.
///
/// ```text
/// execution_id = "sha256:" + hex(SHA256(mandate_id + ":" + execution_count))
/// ```
pub(crate) fn compute_execution_id(mandate_id: &MandateId, execution_count: u64) -> String {
    let input = format!("{mandate_id}:{execution_count}");
    format!("sha256:{}", hex::encode(sha256(input.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap()
    }

    fn mandate() -> Mandate {
        NewMandate::new(
            MandateId::parse("m1").unwrap(),
            AgentRef::derive("agent"),
            PrincipalRef::parse("user-1").unwrap(),
            MandateKind::Intent,
            ContextDigest::from_bytes([7; 32]),
        )
        .with_expires_at(t0() + Duration::hours(1))
        .with_max_executions(2)
        .into_mandate(t0())
    }

    #[test]
    fn test_status_order_expiry_dominates() {
        let mut m = mandate();
        m.revalidation_required = true;
        m.execution_count = 2;
        m.termination = Some(Termination::Revoked {
            at: t0(),
            reason: None,
        });

        assert_eq!(m.status_at(t0() + Duration::hours(1)), MandateStatus::Expired);
        assert_eq!(m.status_at(t0()), MandateStatus::Revoked);

        m.termination = None;
        assert_eq!(m.status_at(t0()), MandateStatus::Exhausted);

        m.execution_count = 1;
        assert_eq!(m.status_at(t0()), MandateStatus::Stale);

        m.revalidation_required = false;
        assert_eq!(m.status_at(t0()), MandateStatus::Active);
    }

    #[test]
    fn test_window_boundary_is_strict() {
        let m = mandate();
        let due = m.revalidation_due_at().unwrap();

        assert_eq!(m.status_at(due), MandateStatus::Active);
        assert_eq!(
            m.status_at(due + Duration::seconds(1)),
            MandateStatus::Stale
        );
    }

    #[test]
    fn test_unlimited_never_exhausts() {
        let mut m = mandate();
        m.max_executions = 0;
        m.execution_count = 1_000;

        assert_eq!(m.status_at(t0()), MandateStatus::Active);
        assert_eq!(m.remaining_executions(), None);
    }

    #[test]
    fn test_validate_rejects_bad_window_and_past_expiry() {
        let base = NewMandate::new(
            MandateId::parse("m1").unwrap(),
            AgentRef::derive("agent"),
            PrincipalRef::parse("user-1").unwrap(),
            MandateKind::Cart,
            ContextDigest::from_bytes([0; 32]),
        );

        let zero = base.clone().with_revalidation_window(Duration::zero());
        assert!(matches!(
            zero.validate(t0()),
            Err(TrustError::InvalidParameters { .. })
        ));

        let negative = base.clone().with_revalidation_window(Duration::seconds(-5));
        assert!(negative.validate(t0()).is_err());

        let past = base.clone().with_expires_at(t0());
        assert!(past.validate(t0()).is_err());

        assert!(base.validate(t0()).is_ok());
    }

    #[test]
    fn test_kind_codes() {
        assert_eq!(MandateKind::from_code(0).unwrap(), MandateKind::Intent);
        assert_eq!(MandateKind::from_code(1).unwrap(), MandateKind::Cart);
        assert!(MandateKind::from_code(2).is_err());
    }

    #[test]
    fn test_mandate_serde_uses_seconds_and_strings() {
        let m = mandate();
        let value = serde_json::to_value(&m).unwrap();

        assert_eq!(value["revalidation_window"], 1800);
        assert_eq!(value["kind"], "intent");
        assert!(value["context_digest"]
            .as_str()
            .unwrap()
            .starts_with("sha256:"));

        let back: Mandate = serde_json::from_value(value).unwrap();
        assert_eq!(back, m);
    }
}
