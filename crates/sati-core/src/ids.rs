//! Identifier newtypes.
//!
//! Opaque identifiers (`MandateId`, `PrincipalRef`, `ClientRef`) are
//! caller-supplied strings: non-empty, bounded, printable ASCII without
//! whitespace. Digest identifiers (`AgentRef`, `FeedbackId`) are 32-byte
//! SHA-256 values rendered as `sha256:<64 lowercase hex>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{TrustError, TrustResult};

/// Default upper bound for opaque identifier length (bytes).
pub const DEFAULT_MAX_ID_LEN: usize = 64;

/// Hard ceiling for opaque identifiers (bytes).
///
/// Deserialization checks against this rather than the configured limit, so
/// state written under a larger `max_id_len` reads back. Configured limits
/// may not exceed it.
pub const MAX_ID_LEN_CEILING: usize = 1024;

/// Prefix of textual digests.
pub const DIGEST_PREFIX: &str = "sha256:";

fn validate_opaque(kind: &str, value: &str, max_len: usize) -> TrustResult<()> {
    if value.is_empty() {
        return Err(TrustError::invalid(format!("{kind} must not be empty")));
    }
    if value.len() > max_len {
        return Err(TrustError::invalid(format!(
            "{kind} exceeds {max_len} bytes: {} bytes",
            value.len()
        )));
    }
    if !value.chars().all(|c| c.is_ascii_graphic()) {
        return Err(TrustError::invalid(format!(
            "{kind} must be printable ASCII without whitespace"
        )));
    }
    Ok(())
}

/// Serde adapter for `[u8; 32]` as `sha256:<hex>`.
pub(crate) mod prefixed_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode_digest(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        super::decode_digest(&s).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn encode_digest(bytes: &[u8; 32]) -> String {
    format!("{DIGEST_PREFIX}{}", hex::encode(bytes))
}

/// Parse `sha256:<64 hex>` (prefix optional).
pub(crate) fn decode_digest(s: &str) -> TrustResult<[u8; 32]> {
    let hex_part = s.strip_prefix(DIGEST_PREFIX).unwrap_or(s);
    if hex_part.len() != 64 {
        return Err(TrustError::invalid(format!(
            "digest must be 64 hex chars, got {}",
            hex_part.len()
        )));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(hex_part, &mut out)
        .map_err(|e| TrustError::invalid(format!("invalid digest hex: {e}")))?;
    Ok(out)
}

pub(crate) fn sha256(bytes: &[u8]) -> [u8; 32] {
    let hash = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hash);
    out
}

/// Caller-supplied mandate identifier. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MandateId(String);

impl MandateId {
    /// Parse with the default length bound.
    pub fn parse(value: &str) -> TrustResult<Self> {
        Self::parse_with_limit(value, DEFAULT_MAX_ID_LEN)
    }

    pub fn parse_with_limit(value: &str, max_len: usize) -> TrustResult<Self> {
        validate_opaque("mandate id", value, max_len)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MandateId {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MandateId {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_opaque("mandate id", &value, MAX_ID_LEN_CEILING)?;
        Ok(Self(value))
    }
}

impl From<MandateId> for String {
    fn from(id: MandateId) -> Self {
        id.0
    }
}

impl fmt::Display for MandateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Principal (user authority) that grants mandates. Opaque; MUST NOT carry PII.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalRef(String);

impl PrincipalRef {
    pub fn parse(value: &str) -> TrustResult<Self> {
        Self::parse_with_limit(value, DEFAULT_MAX_ID_LEN)
    }

    pub fn parse_with_limit(value: &str, max_len: usize) -> TrustResult<Self> {
        validate_opaque("principal", value, max_len)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PrincipalRef {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_opaque("principal", &value, MAX_ID_LEN_CEILING)?;
        Ok(Self(value))
    }
}

impl From<PrincipalRef> for String {
    fn from(id: PrincipalRef) -> Self {
        id.0
    }
}

impl fmt::Display for PrincipalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client permitted to rate an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientRef(String);

impl ClientRef {
    pub fn parse(value: &str) -> TrustResult<Self> {
        Self::parse_with_limit(value, DEFAULT_MAX_ID_LEN)
    }

    pub fn parse_with_limit(value: &str, max_len: usize) -> TrustResult<Self> {
        validate_opaque("client", value, max_len)?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClientRef {
    type Error = TrustError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_opaque("client", &value, MAX_ID_LEN_CEILING)?;
        Ok(Self(value))
    }
}

impl From<ClientRef> for String {
    fn from(id: ClientRef) -> Self {
        id.0
    }
}

impl fmt::Display for ClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest identifying a registered agent.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentRef(#[serde(with = "prefixed_hex")] [u8; 32]);

impl AgentRef {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive an agent reference from a registry-level agent id.
    ///
    /// ```text
    /// agent_ref = SHA256(agent_id)
    /// ```
    pub fn derive(agent_id: &str) -> Self {
        Self(sha256(agent_id.as_bytes()))
    }

    /// Parse `sha256:<64 hex>` or bare hex.
    pub fn parse(value: &str) -> TrustResult<Self> {
        decode_digest(value).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for AgentRef {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_digest(&self.0))
    }
}

impl fmt::Debug for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgentRef({self})")
    }
}

/// Feedback authorization slot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorizationId(Uuid);

impl AuthorizationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> TrustResult<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|e| TrustError::invalid(format!("invalid authorization id: {e}")))
    }
}

impl Default for AuthorizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for AuthorizationId {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AuthorizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content-addressed feedback record identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedbackId(#[serde(with = "prefixed_hex")] [u8; 32]);

impl FeedbackId {
    /// Deterministic id of the `ordinal`-th submission under a slot.
    ///
    /// ```text
    /// feedback_id = "sha256:" + hex(SHA256(authorization_id + ":" + ordinal))
    /// ```
    pub fn compute(authorization: &AuthorizationId, ordinal: u32) -> Self {
        let input = format!("{authorization}:{ordinal}");
        Self(sha256(input.as_bytes()))
    }

    pub fn parse(value: &str) -> TrustResult<Self> {
        decode_digest(value).map(Self)
    }
}

impl FromStr for FeedbackId {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_digest(&self.0))
    }
}

impl fmt::Debug for FeedbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedbackId({self})")
    }
}
