//! Payment weighting.
//!
//! ```text
//! w(a) = min + (1 - min) * (1 - e^(-a / saturation))
//! ```
//!
//! Monotonic in the verified amount, bounded by 1, and never below `min`, so
//! unpaid feedback still counts lightly but cannot dominate.

use crate::errors::{TrustError, TrustResult};

pub const DEFAULT_MIN_WEIGHT: f64 = 0.1;
pub const DEFAULT_SATURATION_AMOUNT: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentWeighting {
    min_weight: f64,
    saturation_amount: u64,
}

impl Default for PaymentWeighting {
    fn default() -> Self {
        Self {
            min_weight: DEFAULT_MIN_WEIGHT,
            saturation_amount: DEFAULT_SATURATION_AMOUNT,
        }
    }
}

impl PaymentWeighting {
    pub fn new(min_weight: f64, saturation_amount: u64) -> TrustResult<Self> {
        if min_weight.is_nan() || min_weight <= 0.0 || min_weight > 1.0 {
            return Err(TrustError::invalid(format!(
                "min_weight must be in (0, 1], got {min_weight}"
            )));
        }
        if saturation_amount == 0 {
            return Err(TrustError::invalid("saturation_amount must be positive"));
        }
        Ok(Self {
            min_weight,
            saturation_amount,
        })
    }

    pub fn min_weight(&self) -> f64 {
        self.min_weight
    }

    pub fn saturation_amount(&self) -> u64 {
        self.saturation_amount
    }

    /// Weight for a verified amount; `None` (unverified) counts as zero.
    pub fn weight_for(&self, amount: Option<u64>) -> f64 {
        let amount = amount.unwrap_or(0) as f64;
        let ratio = amount / self.saturation_amount as f64;
        self.min_weight + (1.0 - self.min_weight) * (1.0 - (-ratio).exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unverified_gets_min_weight() {
        let w = PaymentWeighting::default();
        assert_eq!(w.weight_for(None), DEFAULT_MIN_WEIGHT);
        assert_eq!(w.weight_for(Some(0)), DEFAULT_MIN_WEIGHT);
    }

    #[test]
    fn test_weight_is_monotonic_and_bounded() {
        let w = PaymentWeighting::default();
        let mut last = 0.0;
        for amount in [0u64, 1, 10, 100, 900, 1_000, 10_000, u64::MAX] {
            let weight = w.weight_for(Some(amount));
            assert!(weight >= last, "weight dropped at {amount}");
            assert!(weight <= 1.0);
            last = weight;
        }
        assert!((w.weight_for(Some(u64::MAX)) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_saturation_point() {
        let w = PaymentWeighting::new(0.5, 100).unwrap();
        let expected = 0.5 + 0.5 * (1.0 - (-1.0f64).exp());
        assert!((w.weight_for(Some(100)) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(PaymentWeighting::new(0.0, 1000).is_err());
        assert!(PaymentWeighting::new(1.5, 1000).is_err());
        assert!(PaymentWeighting::new(f64::NAN, 1000).is_err());
        assert!(PaymentWeighting::new(0.1, 0).is_err());
        assert!(PaymentWeighting::new(1.0, 1).is_ok());
    }
}
