//! Trust engine configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a YAML file, then
//! `SATI_*` environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::feedback::{
    PaymentWeighting, DEFAULT_MIN_WEIGHT, DEFAULT_SATURATION_AMOUNT, MAX_CATEGORY_LEN,
};
use crate::ids::{DEFAULT_MAX_ID_LEN, MAX_ID_LEN_CEILING};
use crate::mandate::DEFAULT_REVALIDATION_WINDOW_SECS;
use crate::reputation::ScorePolicy;

/// Default event source URI.
pub const DEFAULT_EVENT_SOURCE: &str = "sati://trust-registry";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

/// Saturating payment-weight curve parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaymentWeightConfig {
    /// Weight of feedback without verified payment, in (0, 1]
    pub min_weight: f64,

    /// Amount at which weight reaches ~63% of the way to 1
    pub saturation_amount: u64,
}

impl Default for PaymentWeightConfig {
    fn default() -> Self {
        Self {
            min_weight: DEFAULT_MIN_WEIGHT,
            saturation_amount: DEFAULT_SATURATION_AMOUNT,
        }
    }
}

/// Rating scalarization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RatingConfig {
    /// Empty = equal-weighted mean of submitted categories
    pub category_weights: BTreeMap<String, f64>,
}

/// Facade-level bounds on feedback slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedbackLimits {
    pub max_submissions_cap: u32,
    pub max_authorization_secs: i64,
}

impl Default for FeedbackLimits {
    fn default() -> Self {
        Self {
            max_submissions_cap: 100,
            max_authorization_secs: 30 * 24 * 60 * 60,
        }
    }
}

/// Configuration for [`TrustRegistry`](crate::TrustRegistry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustConfig {
    /// Upper bound on opaque identifier length (bytes)
    pub max_id_len: usize,

    /// Window used when a create request does not specify one
    pub default_revalidation_window_secs: i64,

    /// Tolerance applied to delegation expiry checks
    pub clock_skew_secs: i64,

    /// `source` attribute of emitted events
    pub event_source: String,

    pub payment_weight: PaymentWeightConfig,

    pub rating: RatingConfig,

    pub feedback: FeedbackLimits,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            max_id_len: DEFAULT_MAX_ID_LEN,
            default_revalidation_window_secs: DEFAULT_REVALIDATION_WINDOW_SECS,
            clock_skew_secs: 0,
            event_source: DEFAULT_EVENT_SOURCE.to_string(),
            payment_weight: PaymentWeightConfig::default(),
            rating: RatingConfig::default(),
            feedback: FeedbackLimits::default(),
        }
    }
}

impl TrustConfig {
    /// Load from a YAML file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loading trust config");
        Self::from_yaml_str(&content)
    }

    /// Parse YAML and validate. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Overlay `SATI_*` environment variables. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("SATI_MAX_ID_LEN") {
            self.max_id_len = v;
        }
        if let Some(v) = env_parse("SATI_REVALIDATION_WINDOW_SECS") {
            self.default_revalidation_window_secs = v;
        }
        if let Some(v) = env_parse("SATI_CLOCK_SKEW_SECS") {
            self.clock_skew_secs = v;
        }
        if let Some(v) = env_parse("SATI_PAYMENT_MIN_WEIGHT") {
            self.payment_weight.min_weight = v;
        }
        if let Some(v) = env_parse("SATI_PAYMENT_SATURATION") {
            self.payment_weight.saturation_amount = v;
        }
        self
    }

    pub fn with_max_id_len(mut self, max_id_len: usize) -> Self {
        self.max_id_len = max_id_len;
        self
    }

    pub fn with_clock_skew_secs(mut self, secs: i64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    pub fn with_category_weights(mut self, weights: BTreeMap<String, f64>) -> Self {
        self.rating.category_weights = weights;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_id_len == 0 || self.max_id_len > MAX_ID_LEN_CEILING {
            return Err(invalid(format!(
                "max_id_len must be 1..={MAX_ID_LEN_CEILING}, got {}",
                self.max_id_len
            )));
        }
        if self.default_revalidation_window_secs <= 0 {
            return Err(invalid(format!(
                "default_revalidation_window_secs must be positive, got {}",
                self.default_revalidation_window_secs
            )));
        }
        if Duration::try_seconds(self.default_revalidation_window_secs).is_none() {
            return Err(invalid("default_revalidation_window_secs out of range"));
        }
        if self.clock_skew_secs < 0 || Duration::try_seconds(self.clock_skew_secs).is_none() {
            return Err(invalid(format!(
                "clock_skew_secs must be a non-negative duration, got {}",
                self.clock_skew_secs
            )));
        }
        if self.event_source.is_empty() {
            return Err(invalid("event_source must not be empty"));
        }
        self.payment_weighting()?;
        for name in self.rating.category_weights.keys() {
            let len = name.chars().count();
            if len == 0 || len > MAX_CATEGORY_LEN {
                return Err(invalid(format!(
                    "rating category name must be 1..={MAX_CATEGORY_LEN} chars: '{name}'"
                )));
            }
        }
        self.score_policy()?;
        if self.feedback.max_submissions_cap == 0 {
            return Err(invalid("feedback.max_submissions_cap must be positive"));
        }
        if self.feedback.max_authorization_secs <= 0
            || Duration::try_seconds(self.feedback.max_authorization_secs).is_none()
        {
            return Err(invalid(format!(
                "feedback.max_authorization_secs must be a positive duration, got {}",
                self.feedback.max_authorization_secs
            )));
        }
        Ok(())
    }

    pub fn payment_weighting(&self) -> Result<PaymentWeighting, ConfigError> {
        PaymentWeighting::new(
            self.payment_weight.min_weight,
            self.payment_weight.saturation_amount,
        )
        .map_err(|e| invalid(format!("payment_weight: {e}")))
    }

    pub fn score_policy(&self) -> Result<ScorePolicy, ConfigError> {
        if self.rating.category_weights.is_empty() {
            return Ok(ScorePolicy::equal_weighted());
        }
        ScorePolicy::weighted(self.rating.category_weights.clone())
            .map_err(|e| invalid(format!("rating: {e}")))
    }

    /// Out-of-range values fall back to the built-in default window.
    pub fn default_revalidation_window(&self) -> Duration {
        Duration::try_seconds(self.default_revalidation_window_secs)
            .filter(|d| *d > Duration::zero())
            .unwrap_or_else(|| Duration::seconds(DEFAULT_REVALIDATION_WINDOW_SECS))
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::try_seconds(self.clock_skew_secs.max(0)).unwrap_or_else(Duration::zero)
    }

    pub fn max_authorization(&self) -> Duration {
        Duration::try_seconds(self.feedback.max_authorization_secs).unwrap_or_else(Duration::zero)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_KEYS: [&str; 5] = [
        "SATI_MAX_ID_LEN",
        "SATI_REVALIDATION_WINDOW_SECS",
        "SATI_CLOCK_SKEW_SECS",
        "SATI_PAYMENT_MIN_WEIGHT",
        "SATI_PAYMENT_SATURATION",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TrustConfig::default();
        config.validate().unwrap();

        assert_eq!(config.max_id_len, 64);
        assert_eq!(config.default_revalidation_window(), Duration::minutes(30));
        assert_eq!(config.payment_weight.min_weight, 0.1);
        assert_eq!(config.feedback.max_submissions_cap, 100);
        assert_eq!(config.max_authorization(), Duration::days(30));
    }

    #[test]
    fn test_yaml_partial_override() {
        let yaml = r#"
clock_skew_secs: 30
payment_weight:
  saturation_amount: 5000
rating:
  category_weights:
    quality: 2.0
    speed: 1.0
"#;
        let config = TrustConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.clock_skew(), Duration::seconds(30));
        assert_eq!(config.payment_weight.saturation_amount, 5000);
        assert_eq!(config.payment_weight.min_weight, 0.1);
        assert_eq!(config.rating.category_weights.len(), 2);
        assert_eq!(config.max_id_len, 64);
    }

    #[test]
    fn test_yaml_unknown_field_rejected() {
        let err = TrustConfig::from_yaml_str("max_id_length: 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let cases = [
            "default_revalidation_window_secs: 0\n",
            "clock_skew_secs: -1\n",
            "max_id_len: 0\n",
            "max_id_len: 1025\n",
            "payment_weight:\n  min_weight: 0.0\n",
            "payment_weight:\n  min_weight: 1.5\n",
            "payment_weight:\n  saturation_amount: 0\n",
            "rating:\n  category_weights:\n    quality: -1.0\n",
            "feedback:\n  max_submissions_cap: 0\n",
            "event_source: ''\n",
        ];
        for yaml in cases {
            let err = TrustConfig::from_yaml_str(yaml).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { .. }),
                "expected Invalid for {yaml:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_id_len: 32").unwrap();
        writeln!(file, "event_source: sati://staging").unwrap();

        let config = TrustConfig::load(file.path()).unwrap();
        assert_eq!(config.max_id_len, 32);
        assert_eq!(config.event_source, "sati://staging");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TrustConfig::load(dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("SATI_MAX_ID_LEN", "128");
        std::env::set_var("SATI_REVALIDATION_WINDOW_SECS", "60");
        std::env::set_var("SATI_PAYMENT_MIN_WEIGHT", "0.25");
        std::env::set_var("SATI_PAYMENT_SATURATION", "not-a-number");

        let config = TrustConfig::from_env();
        clear_env();

        assert_eq!(config.max_id_len, 128);
        assert_eq!(config.default_revalidation_window(), Duration::seconds(60));
        assert_eq!(config.payment_weight.min_weight, 0.25);
        assert_eq!(config.payment_weight.saturation_amount, DEFAULT_SATURATION_AMOUNT);
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_env_overrides_yaml() {
        clear_env();
        std::env::set_var("SATI_CLOCK_SKEW_SECS", "5");

        let config = TrustConfig::from_yaml_str("clock_skew_secs: 30\n")
            .unwrap()
            .with_env_overrides();
        clear_env();

        assert_eq!(config.clock_skew_secs, 5);
    }
}
