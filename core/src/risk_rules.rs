//! The checkout risk rules.
//!
//! Each rule is an independent boolean heuristic. A rule reads only its
//! `RuleContext` and, when it fires, yields one human-readable detail.
//! Points are not decided here: they come from `RiskPolicy` so tests
//! can vary them without touching rule logic.

use crate::{
    catalog::{Cart, Customer},
    config::{RiskPolicy, RulePoints},
    error::ShopResult,
    store::ShopStore,
    transaction_record::TransactionSnapshot,
    types::{ProductId, Timestamp, UserId},
};
use chrono::{Duration, Timelike};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    AmountSpike,
    LocationMismatch,
    NewAccountLargeOrder,
    OrderVelocity,
    AddressMismatch,
    UnusualHour,
    BulkHighValue,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmountSpike          => "amount_spike",
            Self::LocationMismatch     => "location_mismatch",
            Self::NewAccountLargeOrder => "new_account_large_order",
            Self::OrderVelocity        => "order_velocity",
            Self::AddressMismatch      => "address_mismatch",
            Self::UnusualHour          => "unusual_hour",
            Self::BulkHighValue        => "bulk_high_value",
        }
    }

    /// Dashboard heading for the rule.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AmountSpike          => "Order amount above user average",
            Self::LocationMismatch     => "Location mismatch",
            Self::NewAccountLargeOrder => "New account with large order",
            Self::OrderVelocity        => "High order frequency",
            Self::AddressMismatch      => "Address mismatch",
            Self::UnusualHour          => "Unusual order time",
            Self::BulkHighValue        => "Bulk order of high-value item",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RulePoints {
    pub fn for_rule(&self, rule: RuleId) -> u32 {
        match rule {
            RuleId::AmountSpike          => self.amount_spike,
            RuleId::LocationMismatch     => self.location_mismatch,
            RuleId::NewAccountLargeOrder => self.new_account_large_order,
            RuleId::OrderVelocity        => self.order_velocity,
            RuleId::AddressMismatch      => self.address_mismatch,
            RuleId::UnusualHour          => self.unusual_hour,
            RuleId::BulkHighValue        => self.bulk_high_value,
        }
    }
}

/// One fired rule, as stored on the assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskReason {
    pub rule:   RuleId,
    pub detail: String,
    pub points: u32,
}

/// Order-history lookups a rule may need at evaluation time.
pub trait OrderHistory {
    fn count_orders_since(&self, user_id: UserId, since: Timestamp) -> ShopResult<i64>;
}

impl OrderHistory for ShopStore {
    fn count_orders_since(&self, user_id: UserId, since: Timestamp) -> ShopResult<i64> {
        ShopStore::count_orders_since(self, user_id, since)
    }
}

/// Everything a rule is allowed to look at.
pub struct RuleContext<'a> {
    pub snapshot: &'a TransactionSnapshot,
    pub cart:     &'a Cart,
    pub user:     &'a Customer,
    pub history:  &'a dyn OrderHistory,
    pub policy:   &'a RiskPolicy,
    pub now:      Timestamp,
}

/// The contract every rule must fulfill.
pub trait RiskRule: Send + Sync {
    fn id(&self) -> RuleId;

    /// `Ok(Some(detail))` when the rule fires, `Ok(None)` when it does not.
    /// An `Err` means the rule's inputs could not be loaded.
    fn check(&self, ctx: &RuleContext<'_>) -> ShopResult<Option<String>>;
}

/// The production rule set, in evaluation order.
pub fn standard_rules() -> Vec<Box<dyn RiskRule>> {
    vec![
        Box::new(AmountSpike),
        Box::new(LocationMismatch),
        Box::new(NewAccountLargeOrder),
        Box::new(OrderVelocity),
        Box::new(AddressMismatch),
        Box::new(UnusualHour),
        Box::new(BulkHighValue),
    ]
}

// ── Rules ────────────────────────────────────────────────────────────────────

/// Order total well above the customer's historical average.
pub struct AmountSpike;

impl RiskRule for AmountSpike {
    fn id(&self) -> RuleId {
        RuleId::AmountSpike
    }

    fn check(&self, ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
        let snap = ctx.snapshot;
        let average = snap.user_order_average;
        if snap.is_first_purchase || average <= Decimal::ZERO {
            return Ok(None);
        }
        if snap.order_total > average * ctx.policy.limits.amount_spike_multiplier {
            return Ok(Some(format!(
                "Order amount (${}) is significantly higher than user's average (${})",
                snap.order_total, average
            )));
        }
        Ok(None)
    }
}

pub struct LocationMismatch;

impl RiskRule for LocationMismatch {
    fn id(&self) -> RuleId {
        RuleId::LocationMismatch
    }

    fn check(&self, ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
        let snap = ctx.snapshot;
        if snap.location_matches() {
            return Ok(None);
        }
        Ok(Some(format!(
            "Checkout location '{}' differs from registration location '{}'",
            snap.confirmed_location, snap.registration_location
        )))
    }
}

pub struct NewAccountLargeOrder;

impl RiskRule for NewAccountLargeOrder {
    fn id(&self) -> RuleId {
        RuleId::NewAccountLargeOrder
    }

    fn check(&self, ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
        let limits = &ctx.policy.limits;
        let age = ctx.user.account_age(ctx.now);
        if age < Duration::hours(limits.new_account_max_age_hours)
            && ctx.snapshot.order_total > limits.new_account_min_total
        {
            return Ok(Some(format!(
                "New account (age: {} days, {} hours) with large order (${})",
                age.num_days(),
                age.num_hours() % 24,
                ctx.snapshot.order_total
            )));
        }
        Ok(None)
    }
}

/// Several orders already placed inside the trailing window.
pub struct OrderVelocity;

impl RiskRule for OrderVelocity {
    fn id(&self) -> RuleId {
        RuleId::OrderVelocity
    }

    fn check(&self, ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
        let limits = &ctx.policy.limits;
        let since = ctx.now - Duration::hours(limits.velocity_window_hours);
        let recent = ctx.history.count_orders_since(ctx.user.user_id, since)?;
        if recent >= limits.velocity_prior_orders {
            // This checkout would be one more on top of the recent ones.
            return Ok(Some(format!(
                "High order frequency: {} orders in the last {} hours",
                recent + 1,
                limits.velocity_window_hours
            )));
        }
        Ok(None)
    }
}

pub struct AddressMismatch;

impl RiskRule for AddressMismatch {
    fn id(&self) -> RuleId {
        RuleId::AddressMismatch
    }

    fn check(&self, ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
        let snap = ctx.snapshot;
        let min_total = ctx.policy.limits.address_mismatch_min_total;
        if !snap.address_matches() && snap.order_total > min_total {
            return Ok(Some(format!(
                "Shipping and billing addresses differ on an order above ${min_total}"
            )));
        }
        Ok(None)
    }
}

/// Checkout in the small hours of the storefront's local day.
///
/// Every checkout in the window counts as unusual; the customer's own
/// ordering pattern is not consulted.
pub struct UnusualHour;

impl RiskRule for UnusualHour {
    fn id(&self) -> RuleId {
        RuleId::UnusualHour
    }

    fn check(&self, ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
        let limits = &ctx.policy.limits;
        let hour = ctx.now.with_timezone(&ctx.policy.local_offset()).hour();
        if (limits.unusual_hour_start..=limits.unusual_hour_end).contains(&hour) {
            return Ok(Some(format!("Unusual order time: {hour}:00")));
        }
        Ok(None)
    }
}

/// Many units of one expensive product.
///
/// Quantities are summed per product across cart lines. Products are
/// visited in order of first appearance in the cart and the check stops
/// at the first one that qualifies.
pub struct BulkHighValue;

impl RiskRule for BulkHighValue {
    fn id(&self) -> RuleId {
        RuleId::BulkHighValue
    }

    fn check(&self, ctx: &RuleContext<'_>) -> ShopResult<Option<String>> {
        let limits = &ctx.policy.limits;
        let mut high_value: Vec<(ProductId, &str, i64)> = Vec::new();
        for line in &ctx.cart.lines {
            if line.unit_price <= limits.bulk_item_min_price {
                continue;
            }
            match high_value.iter_mut().find(|(id, _, _)| *id == line.product_id) {
                Some((_, _, quantity)) => *quantity += line.quantity,
                None => high_value.push((line.product_id, line.product_name.as_str(), line.quantity)),
            }
        }

        let found = high_value
            .into_iter()
            .find(|(_, _, quantity)| *quantity >= limits.bulk_item_min_quantity);
        Ok(found.map(|(_, name, quantity)| {
            format!("Bulk order of high-value item: {quantity} x {name}")
        }))
    }
}
