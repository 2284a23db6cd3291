//! Error taxonomy for the trust engines.
//!
//! Every expected business condition is a [`TrustError`] variant; nothing in
//! the engines panics on caller input. Precondition violations
//! ([`TrustError::InvalidParameters`]) are kept apart from state-dependent
//! failures so callers can tell "fix the request" from "try again later".

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feedback::AuthorizationStatus;
use crate::mandate::MandateStatus;

/// Entity an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Mandate,
    Authorization,
    Feedback,
    Agent,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mandate => "mandate",
            Self::Authorization => "feedback authorization",
            Self::Feedback => "feedback",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State that blocked an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedState {
    Mandate(MandateStatus),
    Authorization(AuthorizationStatus),
    /// Feedback record already retracted.
    Retracted,
}

impl fmt::Display for BlockedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mandate(status) => write!(f, "{status}"),
            Self::Authorization(status) => write!(f, "{status}"),
            Self::Retracted => f.write_str("retracted"),
        }
    }
}

/// Trust engine errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrustError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: String },

    #[error("mandate already exists: {id}")]
    DuplicateId { id: String },

    #[error("active feedback authorization already exists for agent {agent} and client {client}")]
    DuplicateAuthorization { agent: String, client: String },

    #[error("invalid parameters: {reason}")]
    InvalidParameters { reason: String },

    #[error("operation not allowed for {id} in state '{state}'")]
    InvalidState { id: String, state: BlockedState },

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("authorization expired: expires_at={expires_at}, now={now}")]
    Expired {
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    #[error("submission budget exhausted: {used}/{max}")]
    Exhausted { used: u32, max: u32 },
}

impl TrustError {
    pub(crate) fn not_found(entity: Entity, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            reason: reason.into(),
        }
    }

    pub(crate) fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub(crate) fn mandate_state(id: impl fmt::Display, status: MandateStatus) -> Self {
        Self::InvalidState {
            id: id.to_string(),
            state: BlockedState::Mandate(status),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::DuplicateAuthorization { .. } => "duplicate_authorization",
            Self::InvalidParameters { .. } => "invalid_parameters",
            Self::InvalidState { .. } => "invalid_state",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Expired { .. } => "expired",
            Self::Exhausted { .. } => "exhausted",
        }
    }

    /// Whether the same request may succeed later without changes.
    ///
    /// A stale mandate becomes executable again after revalidation, and a
    /// duplicate authorization clears once the prior slot lapses. Terminal
    /// states and parameter errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InvalidState {
                state: BlockedState::Mandate(MandateStatus::Stale),
                ..
            } | Self::DuplicateAuthorization { .. }
        )
    }

    /// Whether the request itself was malformed.
    pub fn is_parameter_error(&self) -> bool {
        matches!(self, Self::InvalidParameters { .. })
    }
}

/// Result type for trust operations.
pub type TrustResult<T> = Result<T, TrustError>;
