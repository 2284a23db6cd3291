//! Context Hasher.
//!
//! Canonicalizes the real-world context a mandate was authorized under
//! (location, budget, preferences, ...) into a fixed-width digest.
//!
//! ```text
//! context_digest = SHA256(JCS(context))
//! ```
//!
//! JCS (RFC 8785) fixes key order and whitespace, so two semantically equal
//! contexts always hash the same regardless of how they were built.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{TrustError, TrustResult};
use crate::ids::{decode_digest, encode_digest, prefixed_hex, sha256};

/// Fixed-width digest of an authorization context.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextDigest(#[serde(with = "prefixed_hex")] [u8; 32]);

impl ContextDigest {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse `sha256:<64 hex>` (prefix optional).
    pub fn parse(value: &str) -> TrustResult<Self> {
        decode_digest(value).map(Self)
    }
}

impl FromStr for ContextDigest {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ContextDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_digest(&self.0))
    }
}

impl fmt::Debug for ContextDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextDigest({self})")
    }
}

/// Compute the digest of any serializable context.
///
/// Fails with `InvalidParameters` if the value cannot be canonicalized
/// (e.g. non-finite floats or non-string map keys).
///
/// # Example
///
/// ```
/// use sati_core::compute_context_digest;
/// use serde_json::json;
///
/// let a = compute_context_digest(&json!({"budget": 1000, "location": "US"})).unwrap();
/// let b = compute_context_digest(&json!({"location": "US", "budget": 1000})).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn compute_context_digest<T: Serialize + ?Sized>(context: &T) -> TrustResult<ContextDigest> {
    let canonical = serde_jcs::to_vec(context)
        .map_err(|e| TrustError::invalid(format!("failed to canonicalize context: {e}")))?;
    Ok(ContextDigest(sha256(&canonical)))
}

/// Coarse location a mandate was authorized for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// ISO 3166-1 alpha-2 country code
    pub country: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Typical user context for payment mandates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub location: Location,

    /// Budget in minor units (MUST NOT use float)
    pub budget: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub preferences: BTreeMap<String, String>,
}

impl UserContext {
    pub fn new(country: impl Into<String>, budget: u64) -> Self {
        Self {
            location: Location {
                country: country.into(),
                region: None,
            },
            budget,
            preferences: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.location.region = Some(region.into());
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.preferences.insert(key.into(), value.into());
        self
    }

    pub fn digest(&self) -> TrustResult<ContextDigest> {
        compute_context_digest(self)
    }
}
