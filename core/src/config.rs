//! Risk policy: every threshold, point value and window the checkout
//! core consults. Loaded from `data/risk_policy.json`; the `Default`
//! impl carries the production values.

use chrono::{Duration, FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    /// A transaction is flagged once its score reaches this value.
    pub flag_threshold: u32,
    pub points:         RulePoints,
    pub limits:         RuleLimits,
    pub hold:           HoldPolicy,
    /// Offset applied to UTC when a rule asks for the local hour.
    #[serde(default)]
    pub local_utc_offset_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePoints {
    pub amount_spike:            u32,
    pub location_mismatch:       u32,
    pub new_account_large_order: u32,
    pub order_velocity:          u32,
    pub address_mismatch:        u32,
    pub unusual_hour:            u32,
    pub bulk_high_value:         u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleLimits {
    /// Order total must exceed `average * amount_spike_multiplier`.
    pub amount_spike_multiplier:   Decimal,
    pub new_account_max_age_hours: i64,
    pub new_account_min_total:     Decimal,
    pub velocity_window_hours:     i64,
    /// Prior orders inside the window needed to fire.
    pub velocity_prior_orders:     i64,
    pub address_mismatch_min_total: Decimal,
    /// Inclusive local-hour range treated as unusual.
    pub unusual_hour_start:        u32,
    pub unusual_hour_end:          u32,
    pub bulk_item_min_price:       Decimal,
    pub bulk_item_min_quantity:    i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldPolicy {
    pub confirmation_window_minutes: i64,
    /// Window granted by the administrative extension.
    pub extension_minutes:           i64,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            flag_threshold: 40,
            points: RulePoints {
                amount_spike:            25,
                location_mismatch:       20,
                new_account_large_order: 30,
                order_velocity:          20,
                address_mismatch:        15,
                unusual_hour:            10,
                bulk_high_value:         25,
            },
            limits: RuleLimits {
                amount_spike_multiplier:    Decimal::from(2),
                new_account_max_age_hours:  48,
                new_account_min_total:      Decimal::from(150),
                velocity_window_hours:      24,
                velocity_prior_orders:      3,
                address_mismatch_min_total: Decimal::from(200),
                unusual_hour_start:         1,
                unusual_hour_end:           5,
                bulk_item_min_price:        Decimal::from(50),
                bulk_item_min_quantity:     5,
            },
            hold: HoldPolicy {
                confirmation_window_minutes: 30,
                extension_minutes:           30,
            },
            local_utc_offset_minutes: 0,
        }
    }
}

impl RiskPolicy {
    /// Load from a JSON file. In tests, use `RiskPolicy::default()`.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let policy: RiskPolicy = serde_json::from_str(&content)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let l = &self.limits;
        if l.unusual_hour_start > 23 || l.unusual_hour_end > 23 {
            anyhow::bail!("unusual hour range must lie within 0..=23");
        }
        if l.unusual_hour_start > l.unusual_hour_end {
            anyhow::bail!(
                "unusual hour range is inverted: {}..={}",
                l.unusual_hour_start,
                l.unusual_hour_end
            );
        }
        if self.hold.confirmation_window_minutes <= 0 || self.hold.extension_minutes <= 0 {
            anyhow::bail!("hold windows must be positive");
        }
        if FixedOffset::east_opt(self.local_utc_offset_minutes * 60).is_none() {
            anyhow::bail!("local UTC offset out of range: {} minutes", self.local_utc_offset_minutes);
        }
        Ok(())
    }

    pub fn confirmation_window(&self) -> Duration {
        Duration::minutes(self.hold.confirmation_window_minutes)
    }

    pub fn extension_window(&self) -> Duration {
        Duration::minutes(self.hold.extension_minutes)
    }

    /// The storefront's local offset; out-of-range values fall back to UTC.
    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.local_utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_checked_in_policy_file() {
        let content = include_str!("../../data/risk_policy.json");
        let parsed: RiskPolicy = serde_json::from_str(content).unwrap();
        assert_eq!(parsed, RiskPolicy::default());
    }

    #[test]
    fn inverted_hour_range_rejected() {
        let mut policy = RiskPolicy::default();
        policy.limits.unusual_hour_start = 6;
        policy.limits.unusual_hour_end = 2;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn offset_applied_to_local_hour() {
        let mut policy = RiskPolicy::default();
        policy.local_utc_offset_minutes = -300;
        assert_eq!(policy.local_offset().local_minus_utc(), -300 * 60);
    }
}
