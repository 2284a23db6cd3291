//! Mandate Lifecycle Engine.
//!
//! A mandate is one authorized intent or cart an agent may execute on a
//! principal's behalf. Its status is never stored; it is derived from the
//! stored fields and the current time on every read:
//!
//! | Status | Condition (first match wins) | Executable | Revalidatable |
//! |--------|------------------------------|------------|---------------|
//! | `Expired` | `now >= expires_at` | no | no |
//! | `Revoked` | principal revoked it | no | no |
//! | `Amended` | superseded by a successor | no | no |
//! | `Exhausted` | `execution_count == max_executions != 0` | no | no |
//! | `Stale` | drift flagged or revalidation window elapsed | no | yes |
//! | `Active` | otherwise | yes | yes |
//!
//! Drift detection is split in two: [`MandateEngine::check_drift`] is a pure
//! comparison that may be polled freely, [`MandateEngine::flag_drift`] is the
//! explicit step that marks the mandate stale.

mod engine;
mod types;

pub use engine::MandateEngine;
pub use types::{
    ExecutionReceipt, Mandate, MandateKind, MandateStatus, NewMandate, Termination,
    DEFAULT_REVALIDATION_WINDOW_SECS,
};
