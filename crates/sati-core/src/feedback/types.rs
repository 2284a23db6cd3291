//! Feedback authorization data model.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{TrustError, TrustResult};
use crate::ids::{AgentRef, AuthorizationId, ClientRef, FeedbackId};

/// Highest accepted category score.
pub const MAX_RATING: u8 = 100;

/// Maximum length of a rating category name (chars).
pub const MAX_CATEGORY_LEN: usize = 32;

/// Maximum number of categories in one rating vector.
pub const MAX_CATEGORIES: usize = 16;

/// Derived slot status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Active,
    Expired,
    Exhausted,
    Revoked,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Exhausted => "exhausted",
            Self::Revoked => "revoked",
        }
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capped, time-boxed right for one client to rate one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackAuthorization {
    pub id: AuthorizationId,
    pub agent: AgentRef,
    pub client: ClientRef,
    pub max_submissions: u32,
    pub used_count: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl FeedbackAuthorization {
    /// Revocation first, then expiry, then budget.
    pub fn status_at(&self, now: DateTime<Utc>) -> AuthorizationStatus {
        if self.revoked_at.is_some() {
            AuthorizationStatus::Revoked
        } else if now >= self.expires_at {
            AuthorizationStatus::Expired
        } else if self.used_count >= self.max_submissions {
            AuthorizationStatus::Exhausted
        } else {
            AuthorizationStatus::Active
        }
    }

    pub fn remaining(&self) -> u32 {
        self.max_submissions.saturating_sub(self.used_count)
    }
}

/// Parameters for issuing a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuthorization {
    pub agent: AgentRef,
    pub client: ClientRef,
    pub max_submissions: u32,
    pub expires_at: DateTime<Utc>,
}

impl NewAuthorization {
    pub fn new(
        agent: AgentRef,
        client: ClientRef,
        max_submissions: u32,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            agent,
            client,
            max_submissions,
            expires_at,
        }
    }

    pub(crate) fn validate(&self, now: DateTime<Utc>) -> TrustResult<()> {
        if self.max_submissions == 0 {
            return Err(TrustError::invalid("max_submissions must be at least 1"));
        }
        if self.expires_at <= now {
            return Err(TrustError::invalid(format!(
                "expires_at {} is not in the future",
                self.expires_at
            )));
        }
        Ok(())
    }
}

/// Named category scores, each in `0..=100`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatingVector(BTreeMap<String, u8>);

impl RatingVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: impl Into<String>, score: u8) -> Self {
        self.0.insert(category.into(), score);
        self
    }

    pub fn get(&self, category: &str) -> Option<u8> {
        self.0.get(category).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> + '_ {
        self.0.iter().map(|(name, score)| (name.as_str(), *score))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn validate(&self) -> TrustResult<()> {
        if self.0.is_empty() {
            return Err(TrustError::invalid("rating vector must not be empty"));
        }
        if self.0.len() > MAX_CATEGORIES {
            return Err(TrustError::invalid(format!(
                "rating vector has {} categories, max {MAX_CATEGORIES}",
                self.0.len()
            )));
        }
        for (name, score) in &self.0 {
            let len = name.chars().count();
            if len == 0 || len > MAX_CATEGORY_LEN {
                return Err(TrustError::invalid(format!(
                    "rating category name must be 1..={MAX_CATEGORY_LEN} chars: '{name}'"
                )));
            }
            if *score > MAX_RATING {
                return Err(TrustError::invalid(format!(
                    "rating for '{name}' out of range: {score} > {MAX_RATING}"
                )));
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, u8)> for RatingVector {
    fn from_iter<I: IntoIterator<Item = (String, u8)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One accepted piece of feedback. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// `sha256(authorization_id:ordinal)`
    pub id: FeedbackId,
    pub authorization: AuthorizationId,
    pub agent: AgentRef,
    pub client: ClientRef,
    pub ratings: RatingVector,
    /// `ratings` collapsed under the score policy in force at submission
    pub scalar_rating: f64,
    /// Verified payment amount (None = no verified proof)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_amount: Option<u64>,
    pub payment_weight: f64,
    pub submitted_at: DateTime<Utc>,
}
