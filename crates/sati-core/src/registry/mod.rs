//! Trust registry facade.
//!
//! Validates caller-supplied identifiers, resolves identity, delegation and
//! payment facts through the collaborator traits, routes to the engines and
//! emits lifecycle events. Holds no trust state of its own.

mod collaborators;
mod facade;
mod requests;

pub use collaborators::{Delegation, DelegationVerifier, IdentityRegistry, PaymentVerifier};
pub use facade::TrustRegistry;
pub use requests::{
    AuthorizeFeedbackRequest, CreateMandateRequest, ExecutionRequest, SubmitFeedbackRequest,
};
