//! Transaction record store: the immutable snapshot of a checkout attempt.
//!
//! A snapshot is written once, together with an empty risk assessment,
//! and never updated. Everything the rule engine needs about the
//! customer's history at checkout time is captured here.

use crate::{
    catalog::Customer,
    error::ShopResult,
    event::ShopEvent,
    store::ShopStore,
    types::{Timestamp, TransactionId, UserId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque device metadata, persisted verbatim.
pub type DeviceInfo = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub transaction_id:        TransactionId,
    pub user_id:               UserId,
    pub order_total:           Decimal,
    /// Location the customer confirmed at checkout.
    pub confirmed_location:    String,
    /// Location on the customer's profile.
    pub registration_location: String,
    pub shipping_address:      String,
    pub billing_address:       String,
    pub device_info:           DeviceInfo,
    pub is_first_purchase:     bool,
    pub user_order_average:    Decimal,
    pub created_at:            Timestamp,
}

impl TransactionSnapshot {
    pub fn location_matches(&self) -> bool {
        self.confirmed_location == self.registration_location
    }

    pub fn address_matches(&self) -> bool {
        self.shipping_address == self.billing_address
    }
}

/// What the customer typed into the checkout form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutDetails {
    pub confirmed_location: String,
    pub shipping_address:   String,
    pub billing_address:    String,
    #[serde(default)]
    pub device_info:        DeviceInfo,
}

/// Column values for a snapshot that has no id yet.
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub user_id:               UserId,
    pub order_total:           Decimal,
    pub confirmed_location:    &'a str,
    pub registration_location: &'a str,
    pub shipping_address:      &'a str,
    pub billing_address:       &'a str,
    pub device_info:           &'a DeviceInfo,
    pub is_first_purchase:     bool,
    pub user_order_average:    Decimal,
    pub created_at:            Timestamp,
}

/// Mean of all prior order totals, rounded to cents. Zero with no history.
pub fn order_average(totals: &[Decimal]) -> Decimal {
    if totals.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = totals.iter().copied().sum();
    (sum / Decimal::from(totals.len())).round_dp(2)
}

/// Snapshot a checkout attempt and open its (empty) risk assessment.
///
/// Both rows and the audit event are written in one atomic unit; a
/// storage failure leaves nothing behind.
pub fn record_transaction(
    store: &ShopStore,
    user: &Customer,
    cart_total: Decimal,
    details: &CheckoutDetails,
    now: Timestamp,
) -> ShopResult<TransactionSnapshot> {
    let snapshot = store.atomically(|store| {
        let prior_totals = store.order_totals_for_user(user.user_id)?;
        let draft = NewTransaction {
            user_id:               user.user_id,
            order_total:           cart_total,
            confirmed_location:    &details.confirmed_location,
            registration_location: &user.location,
            shipping_address:      &details.shipping_address,
            billing_address:       &details.billing_address,
            device_info:           &details.device_info,
            is_first_purchase:     prior_totals.is_empty(),
            user_order_average:    order_average(&prior_totals),
            created_at:            now,
        };

        let transaction_id = store.insert_transaction_record(&draft)?;
        store.insert_risk_assessment(transaction_id)?;
        store.append_event(
            &ShopEvent::TransactionRecorded {
                transaction_id,
                user_id: user.user_id,
                order_total: cart_total,
            },
            now,
        )?;

        Ok(TransactionSnapshot {
            transaction_id,
            user_id:               draft.user_id,
            order_total:           draft.order_total,
            confirmed_location:    details.confirmed_location.clone(),
            registration_location: user.location.clone(),
            shipping_address:      details.shipping_address.clone(),
            billing_address:       details.billing_address.clone(),
            device_info:           details.device_info.clone(),
            is_first_purchase:     draft.is_first_purchase,
            user_order_average:    draft.user_order_average,
            created_at:            now,
        })
    })?;

    log::debug!(
        "transaction {} recorded for user {}: total={} first_purchase={} average={}",
        snapshot.transaction_id,
        snapshot.user_id,
        snapshot.order_total,
        snapshot.is_first_purchase,
        snapshot.user_order_average
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn average_of_no_orders_is_zero() {
        assert_eq!(order_average(&[]), Decimal::ZERO);
    }

    #[test]
    fn average_rounds_to_cents() {
        assert_eq!(order_average(&[d("10.00"), d("10.00"), d("10.01")]), d("10.00"));
        assert_eq!(order_average(&[d("50.00"), d("150.00")]), d("100.00"));
    }
}
