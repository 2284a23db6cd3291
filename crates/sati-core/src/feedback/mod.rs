//! Pre-authorized feedback intake.
//!
//! Feedback is accepted only through a slot the agent owner issued to a
//! specific client, bounded in count and time. Each accepted record is
//! weighted by its verified payment amount and folded into the agent's
//! reputation aggregate.
//!
//! | Slot status | Meaning |
//! |-------------|---------|
//! | `active` | Budget left, before expiry, not revoked |
//! | `expired` | `now >= expires_at` |
//! | `exhausted` | `used_count == max_submissions` |
//! | `revoked` | Withdrawn by the owner |
//!
//! None of the non-active states ever return to `active`; a new slot must be
//! issued instead.

mod engine;
mod types;
mod weight;

pub use engine::FeedbackEngine;
pub use types::{
    AuthorizationStatus, FeedbackAuthorization, FeedbackRecord, NewAuthorization, RatingVector,
    MAX_CATEGORIES, MAX_CATEGORY_LEN, MAX_RATING,
};
pub use weight::{PaymentWeighting, DEFAULT_MIN_WEIGHT, DEFAULT_SATURATION_AMOUNT};
