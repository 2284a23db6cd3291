//! Lifecycle events.
//!
//! CloudEvents envelopes emitted by [`TrustRegistry`](crate::TrustRegistry)
//! after each successful mutation. Engines themselves never emit.
//!
//! # Event Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | `sati.mandate.created.v1` | Mandate recorded |
//! | `sati.mandate.executed.v1` | Execution counted |
//! | `sati.mandate.drift.v1` | Drift flagged, revalidation required |
//! | `sati.mandate.revalidated.v1` | Context refreshed by the principal |
//! | `sati.mandate.revoked.v1` | Revoked by the principal |
//! | `sati.mandate.amended.v1` | Replaced by a successor |
//! | `sati.feedback.authorized.v1` | Feedback slot issued |
//! | `sati.feedback.authorization_revoked.v1` | Slot withdrawn by the owner |
//! | `sati.feedback.submitted.v1` | Feedback accepted |
//! | `sati.feedback.retracted.v1` | Feedback retracted by its client |

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::ContextDigest;
use crate::ids::{AgentRef, AuthorizationId, ClientRef, FeedbackId, MandateId, PrincipalRef};
use crate::mandate::{MandateKind, MandateStatus};

/// CloudEvents spec version.
pub const EVENT_SPEC_VERSION: &str = "1.0";

pub const EVENT_TYPE_MANDATE_CREATED: &str = "sati.mandate.created.v1";
pub const EVENT_TYPE_MANDATE_EXECUTED: &str = "sati.mandate.executed.v1";
pub const EVENT_TYPE_MANDATE_DRIFT: &str = "sati.mandate.drift.v1";
pub const EVENT_TYPE_MANDATE_REVALIDATED: &str = "sati.mandate.revalidated.v1";
pub const EVENT_TYPE_MANDATE_REVOKED: &str = "sati.mandate.revoked.v1";
pub const EVENT_TYPE_MANDATE_AMENDED: &str = "sati.mandate.amended.v1";
pub const EVENT_TYPE_FEEDBACK_AUTHORIZED: &str = "sati.feedback.authorized.v1";
pub const EVENT_TYPE_FEEDBACK_AUTHORIZATION_REVOKED: &str =
    "sati.feedback.authorization_revoked.v1";
pub const EVENT_TYPE_FEEDBACK_SUBMITTED: &str = "sati.feedback.submitted.v1";
pub const EVENT_TYPE_FEEDBACK_RETRACTED: &str = "sati.feedback.retracted.v1";

/// CloudEvents envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustEvent<T> {
    /// CloudEvents spec version (always "1.0")
    pub specversion: String,

    /// Unique event ID
    pub id: String,

    /// Event type (e.g., "sati.mandate.created.v1")
    #[serde(rename = "type")]
    pub type_: String,

    /// Event source URI
    pub source: String,

    pub time: DateTime<Utc>,

    /// Content type (always "application/json")
    pub datacontenttype: String,

    pub data: T,
}

impl<T> TrustEvent<T> {
    pub fn new(
        id: impl Into<String>,
        type_: impl Into<String>,
        source: impl Into<String>,
        data: T,
    ) -> Self {
        Self {
            specversion: EVENT_SPEC_VERSION.to_string(),
            id: id.into(),
            type_: type_.into(),
            source: source.into(),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            data,
        }
    }

    /// Set explicit timestamp.
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    MandateCreated {
        mandate_id: MandateId,
        agent: AgentRef,
        principal: PrincipalRef,
        kind: MandateKind,
        max_executions: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
    MandateExecuted {
        mandate_id: MandateId,
        execution_id: String,
        execution_count: u64,
        amount: u64,
        status_after: MandateStatus,
    },
    MandateDriftFlagged {
        mandate_id: MandateId,
        status: MandateStatus,
    },
    MandateRevalidated {
        mandate_id: MandateId,
        context_digest: ContextDigest,
    },
    MandateRevoked {
        mandate_id: MandateId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    MandateAmended {
        mandate_id: MandateId,
        successor: MandateId,
    },
    FeedbackAuthorized {
        authorization_id: AuthorizationId,
        agent: AgentRef,
        client: ClientRef,
        max_submissions: u32,
        expires_at: DateTime<Utc>,
    },
    FeedbackAuthorizationRevoked {
        authorization_id: AuthorizationId,
        agent: AgentRef,
        client: ClientRef,
    },
    FeedbackSubmitted {
        feedback_id: FeedbackId,
        authorization_id: AuthorizationId,
        agent: AgentRef,
        payment_weight: f64,
    },
    FeedbackRetracted {
        feedback_id: FeedbackId,
        agent: AgentRef,
    },
}

impl LifecycleEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MandateCreated { .. } => EVENT_TYPE_MANDATE_CREATED,
            Self::MandateExecuted { .. } => EVENT_TYPE_MANDATE_EXECUTED,
            Self::MandateDriftFlagged { .. } => EVENT_TYPE_MANDATE_DRIFT,
            Self::MandateRevalidated { .. } => EVENT_TYPE_MANDATE_REVALIDATED,
            Self::MandateRevoked { .. } => EVENT_TYPE_MANDATE_REVOKED,
            Self::MandateAmended { .. } => EVENT_TYPE_MANDATE_AMENDED,
            Self::FeedbackAuthorized { .. } => EVENT_TYPE_FEEDBACK_AUTHORIZED,
            Self::FeedbackAuthorizationRevoked { .. } => EVENT_TYPE_FEEDBACK_AUTHORIZATION_REVOKED,
            Self::FeedbackSubmitted { .. } => EVENT_TYPE_FEEDBACK_SUBMITTED,
            Self::FeedbackRetracted { .. } => EVENT_TYPE_FEEDBACK_RETRACTED,
        }
    }

    /// Wrap in an envelope with a fresh id.
    pub fn into_envelope(
        self,
        source: impl Into<String>,
        time: DateTime<Utc>,
    ) -> TrustEvent<LifecycleEvent> {
        let type_ = self.event_type();
        TrustEvent::new(uuid::Uuid::new_v4().to_string(), type_, source, self).with_time(time)
    }
}

/// Destination for lifecycle events.
///
/// Called synchronously once the state change has been applied, while the
/// affected mandate, slot or record is still locked. Events for one entity
/// therefore arrive in commit order. Sinks must not call back into the
/// registry, and should hand slow work off to another thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TrustEvent<LifecycleEvent>);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: TrustEvent<LifecycleEvent>) {}
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<TrustEvent<LifecycleEvent>>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TrustEvent<LifecycleEvent>> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.type_.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: TrustEvent<LifecycleEvent>) {
        self.events.lock().push(event);
    }
}
