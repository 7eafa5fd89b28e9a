//! Verification holds: the confirmation state machine for flagged checkouts.
//!
//! STATES:
//!   NONE → PENDING → CONFIRMED
//!                  ↘ EXPIRED
//!
//! RULES:
//!   - A hold exists only for a flagged assessment.
//!   - Creating a hold also writes a provisional order in `Verification`;
//!     confirming promotes that same order to `Processing`.
//!   - Stock is taken on confirmation, never at hold creation.
//!   - A user with a pending hold cannot start another checkout.
//!   - `is_confirmed` is a one-way latch.
//!   - Expiry is derived at query time; nothing sweeps expired holds.
//!     `expiry_time` only moves through the staff extension.

use crate::{
    catalog::{Cart, Customer},
    config::RiskPolicy,
    error::{ShopError, ShopResult},
    event::ShopEvent,
    materializer::{self, lines_from_cart, lines_from_order, lines_from_snapshot},
    order::{Order, OrderStatus},
    risk_engine::RiskAssessment,
    store::ShopStore,
    transaction_record::TransactionSnapshot,
    types::{OrderId, ProductId, Timestamp, TransactionId, UserId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One cart line as it stood when the hold was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLine {
    pub product_id:   ProductId,
    pub product_name: String,
    pub quantity:     i64,
    pub price:        Decimal,
    pub subtotal:     Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub items:    Vec<SnapshotLine>,
    pub total:    Decimal,
    /// The provisional order written alongside the hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
}

impl CartSnapshot {
    pub fn of(cart: &Cart) -> Self {
        Self {
            items: cart
                .lines
                .iter()
                .map(|line| SnapshotLine {
                    product_id:   line.product_id,
                    product_name: line.product_name.clone(),
                    quantity:     line.quantity,
                    price:        line.unit_price,
                    subtotal:     line.subtotal(),
                })
                .collect(),
            total: cart.total_price(),
            order_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldState {
    Pending,
    Confirmed,
    Expired,
}

impl fmt::Display for HoldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending   => "Pending",
            Self::Confirmed => "Confirmed",
            Self::Expired   => "Expired",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationHold {
    pub hold_id:          i64,
    pub transaction_id:   TransactionId,
    /// Owner, taken from the transaction snapshot.
    pub user_id:          UserId,
    pub confirmation_key: Uuid,
    pub is_confirmed:     bool,
    pub expiry_time:      Timestamp,
    pub cart_snapshot:    CartSnapshot,
    pub created_at:       Timestamp,
}

impl VerificationHold {
    /// The window is closed from `expiry_time` onwards.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expiry_time
    }

    pub fn state(&self, now: Timestamp) -> HoldState {
        if self.is_confirmed {
            HoldState::Confirmed
        } else if self.is_expired(now) {
            HoldState::Expired
        } else {
            HoldState::Pending
        }
    }
}

/// Everything the verification status page shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldView {
    pub hold:        VerificationHold,
    pub state:       HoldState,
    pub transaction: TransactionSnapshot,
    pub assessment:  RiskAssessment,
}

/// Divert a flagged checkout into a hold.
///
/// One atomic unit writes the provisional `Verification` order with its
/// items and the hold carrying the cart snapshot and the order's id.
/// Neither stock nor the live cart is touched.
pub fn create_hold(
    store: &ShopStore,
    policy: &RiskPolicy,
    snapshot: &TransactionSnapshot,
    assessment: &RiskAssessment,
    cart: &Cart,
    now: Timestamp,
) -> ShopResult<VerificationHold> {
    if !assessment.is_flagged {
        return Err(ShopError::Validation(format!(
            "transaction {} is not flagged",
            assessment.transaction_id
        )));
    }
    if cart.is_empty() {
        return Err(ShopError::Validation("Your cart is empty.".into()));
    }

    let confirmation_key = Uuid::new_v4();
    let expiry_time = now + policy.confirmation_window();
    let lines = lines_from_cart(cart);

    let hold = store.atomically(|store| {
        let order = materializer::write_order(
            store,
            snapshot.user_id,
            OrderStatus::Verification,
            &lines,
            now,
        )?;
        let mut cart_snapshot = CartSnapshot::of(cart);
        cart_snapshot.order_id = Some(order.order_id);

        let hold_id = store.insert_verification_hold(
            snapshot.transaction_id,
            confirmation_key,
            expiry_time,
            &cart_snapshot,
            now,
        )?;
        store.append_event(
            &ShopEvent::VerificationHoldCreated {
                transaction_id: snapshot.transaction_id,
                confirmation_key: confirmation_key.to_string(),
                order_id: order.order_id,
                expiry_time,
            },
            now,
        )?;

        Ok(VerificationHold {
            hold_id,
            transaction_id: snapshot.transaction_id,
            user_id: snapshot.user_id,
            confirmation_key,
            is_confirmed: false,
            expiry_time,
            cart_snapshot,
            created_at: now,
        })
    })?;

    log::info!(
        "transaction {} held for verification: key={} order={:?} expires={}",
        hold.transaction_id,
        hold.confirmation_key,
        hold.cart_snapshot.order_id,
        hold.expiry_time
    );
    Ok(hold)
}

/// Confirm a pending hold on behalf of its owner.
///
/// Promotes the provisional order to `Processing`; if that order is gone,
/// rebuilds one from the cart snapshot. Either way the sold units leave
/// stock exactly once and the owner's live cart is emptied. Rejections
/// leave the hold untouched.
pub fn confirm(
    store: &ShopStore,
    confirmation_key: &Uuid,
    requester: &Customer,
    now: Timestamp,
) -> ShopResult<Order> {
    let hold = match check_confirmable(store, confirmation_key, requester, now) {
        Ok(hold) => hold,
        Err(e) => {
            record_rejection(store, confirmation_key, requester, &e, now);
            return Err(e);
        }
    };

    let result = store.atomically(|store| {
        if !store.latch_hold_confirmed(hold.hold_id)? {
            return Err(ShopError::not_found("verification hold", confirmation_key));
        }

        let provisional = match hold.cart_snapshot.order_id {
            Some(order_id) => store.get_order(order_id)?,
            None => None,
        };
        let (order, rebuilt) = match provisional {
            Some(order) => {
                materializer::take_stock(store, &lines_from_order(&order))?;
                (promote(store, order, now)?, false)
            }
            None => {
                let lines = lines_from_snapshot(&hold.cart_snapshot);
                let order =
                    materializer::write_order(store, hold.user_id, OrderStatus::Processing, &lines, now)?;
                materializer::take_stock(store, &lines)?;
                (order, true)
            }
        };

        // Checkout is refused while a hold is pending, so the held lines
        // are still sitting in the cart. Clearing it keeps the same goods
        // from becoming a second order.
        if let Some(cart) = store.cart_for_user(hold.user_id)? {
            store.clear_cart(cart.cart_id)?;
        }
        store.append_event(
            &ShopEvent::HoldConfirmed {
                confirmation_key: confirmation_key.to_string(),
                order_id: order.order_id,
                rebuilt,
            },
            now,
        )?;
        Ok((order, rebuilt))
    });

    match result {
        Ok((order, rebuilt)) => {
            if rebuilt {
                log::warn!(
                    "hold {confirmation_key}: provisional order missing, rebuilt order {} from snapshot",
                    order.order_id
                );
            }
            log::info!("hold {confirmation_key} confirmed: order {} now {}", order.order_id, order.status);
            Ok(order)
        }
        Err(e) => {
            record_rejection(store, confirmation_key, requester, &e, now);
            Err(e)
        }
    }
}

fn check_confirmable(
    store: &ShopStore,
    confirmation_key: &Uuid,
    requester: &Customer,
    now: Timestamp,
) -> ShopResult<VerificationHold> {
    let hold = store
        .get_hold_by_key(confirmation_key)?
        .ok_or_else(|| ShopError::not_found("verification hold", confirmation_key))?;
    if hold.user_id != requester.user_id {
        return Err(ShopError::Forbidden(format!(
            "user {} does not own hold {confirmation_key}",
            requester.user_id
        )));
    }
    if hold.is_confirmed {
        return Err(ShopError::not_found("verification hold", confirmation_key));
    }
    if hold.is_expired(now) {
        return Err(ShopError::Expired { key: confirmation_key.to_string() });
    }
    Ok(hold)
}

/// `Verification → Processing`. Any other starting status is refused.
fn promote(store: &ShopStore, order: Order, now: Timestamp) -> ShopResult<Order> {
    if order.status != OrderStatus::Verification {
        return Err(ShopError::Validation(format!(
            "order {} is {} and no longer awaiting verification",
            order.order_id, order.status
        )));
    }
    let old = store.update_order_status(order.order_id, OrderStatus::Processing, now)?;
    store.append_event(
        &ShopEvent::OrderStatusChanged {
            order_id: order.order_id,
            old_status: old.as_str().to_string(),
            new_status: OrderStatus::Processing.as_str().to_string(),
        },
        now,
    )?;
    store
        .get_order(order.order_id)?
        .ok_or_else(|| ShopError::not_found("order", order.order_id))
}

fn record_rejection(
    store: &ShopStore,
    confirmation_key: &Uuid,
    requester: &Customer,
    error: &ShopError,
    now: Timestamp,
) {
    log::warn!(
        "confirmation of hold {confirmation_key} by user {} rejected: {error}",
        requester.user_id
    );
    if error.is_persistence() {
        return;
    }
    let event = ShopEvent::ConfirmationRejected {
        confirmation_key: confirmation_key.to_string(),
        user_id: requester.user_id,
        reason: error.to_string(),
    };
    if let Err(e) = store.append_event(&event, now) {
        log::warn!("could not record rejected confirmation of {confirmation_key}: {e}");
    }
}

/// The status page. Owners and staff only.
pub fn view_hold(
    store: &ShopStore,
    confirmation_key: &Uuid,
    requester: &Customer,
    now: Timestamp,
) -> ShopResult<HoldView> {
    let hold = store
        .get_hold_by_key(confirmation_key)?
        .ok_or_else(|| ShopError::not_found("verification hold", confirmation_key))?;
    if hold.user_id != requester.user_id && !requester.is_staff {
        return Err(ShopError::Forbidden(
            "You don't have permission to view this page.".into(),
        ));
    }
    let transaction = store
        .get_transaction_record(hold.transaction_id)?
        .ok_or_else(|| ShopError::not_found("transaction", hold.transaction_id))?;
    let assessment = store
        .get_risk_assessment(hold.transaction_id)?
        .ok_or_else(|| ShopError::not_found("risk assessment", hold.transaction_id))?;

    Ok(HoldView {
        state: hold.state(now),
        hold,
        transaction,
        assessment,
    })
}

/// Staff override: reopen the window of holds that are still unconfirmed
/// and already expired. Other holds in `keys` are left alone.
/// Returns how many holds were extended.
pub fn extend_expiry(
    store: &ShopStore,
    policy: &RiskPolicy,
    operator: &Customer,
    keys: &[Uuid],
    now: Timestamp,
) -> ShopResult<usize> {
    if !operator.is_staff {
        return Err(ShopError::Forbidden(format!(
            "user {} may not extend verification holds",
            operator.user_id
        )));
    }
    let new_expiry = now + policy.extension_window();

    let extended = store.atomically(|store| {
        let mut extended = 0;
        for key in keys {
            let Some(hold) = store.get_hold_by_key(key)? else {
                continue;
            };
            if hold.is_confirmed || !hold.is_expired(now) {
                continue;
            }
            store.set_hold_expiry(hold.hold_id, new_expiry)?;
            store.append_event(
                &ShopEvent::HoldExpiryExtended {
                    confirmation_key: key.to_string(),
                    new_expiry_time: new_expiry,
                },
                now,
            )?;
            extended += 1;
        }
        Ok(extended)
    })?;

    log::info!(
        "user {} extended {extended} of {} verification holds until {new_expiry}",
        operator.user_id,
        keys.len()
    );
    Ok(extended)
}
