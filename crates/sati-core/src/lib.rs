//! Delegated agent trust engines.
//!
//! This crate decides whether an autonomous agent may still act on a
//! principal's behalf, and which parties may rate that agent afterwards:
//!
//! - **Mandate lifecycle** - authorized intents/carts, context drift
//!   detection, revalidation, expiry and execution accounting
//! - **Feedback authorization** - capped, time-boxed feedback slots issued by
//!   the agent owner to specific clients
//! - **Reputation aggregation** - payment-weighted running score per agent
//! - **Trust registry** - facade that validates input, consults the identity,
//!   delegation and payment collaborators, and routes to the engines
//!
//! All engine operations are in-memory state transitions. Persistence is the
//! caller's concern: use [`TrustRegistry::snapshot`] / [`TrustRegistry::restore`].
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, Utc};
//! use sati_core::{
//!     compute_context_digest, AgentRef, MandateEngine, MandateKind, MandateStatus, NewMandate,
//!     PrincipalRef, UserContext,
//! };
//!
//! let engine = MandateEngine::new();
//! let context = UserContext::new("US", 1_000_000_000);
//! let digest = compute_context_digest(&context).unwrap();
//!
//! let mandate = NewMandate::new(
//!     "intent-001".parse().unwrap(),
//!     AgentRef::derive("shopping-agent"),
//!     PrincipalRef::parse("user-123").unwrap(),
//!     MandateKind::Intent,
//!     digest,
//! )
//! .with_revalidation_window(Duration::minutes(30))
//! .with_max_executions(1);
//!
//! let now = Utc::now();
//! engine.create_at(now, mandate).unwrap();
//! let receipt = engine.record_execution_at(now, &"intent-001".parse().unwrap()).unwrap();
//! assert_eq!(receipt.status_after, MandateStatus::Exhausted);
//! ```

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod feedback;
pub mod ids;
pub mod mandate;
pub mod registry;
pub mod reputation;
pub mod snapshot;

pub use config::{ConfigError, FeedbackLimits, PaymentWeightConfig, RatingConfig, TrustConfig};
pub use context::{compute_context_digest, ContextDigest, Location, UserContext};
pub use errors::{BlockedState, Entity, TrustError, TrustResult};
pub use events::{
    EventSink, LifecycleEvent, MemoryEventSink, NoopEventSink, TrustEvent, EVENT_SPEC_VERSION,
};
pub use feedback::{
    AuthorizationStatus, FeedbackAuthorization, FeedbackEngine, FeedbackRecord, NewAuthorization,
    PaymentWeighting, RatingVector,
};
pub use ids::{AgentRef, AuthorizationId, ClientRef, FeedbackId, MandateId, PrincipalRef};
pub use mandate::{
    ExecutionReceipt, Mandate, MandateEngine, MandateKind, MandateStatus, NewMandate, Termination,
};
pub use registry::{
    AuthorizeFeedbackRequest, CreateMandateRequest, Delegation, DelegationVerifier,
    ExecutionRequest, IdentityRegistry, PaymentVerifier, SubmitFeedbackRequest, TrustRegistry,
};
pub use reputation::{ReputationAggregator, ReputationScore, ScorePolicy};
pub use snapshot::{SnapshotError, TrustSnapshot, SNAPSHOT_VERSION};
