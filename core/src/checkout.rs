//! Checkout: the storefront facade and the three-step fraud protocol.
//!
//! PROTOCOL (order enforced by the types):
//!   1. collect_transaction_data   → `CollectedTransaction`
//!   2. run_fraud_detection        → `EvaluatedTransaction`
//!   3. create_fraud_confirmation  → `Some(hold)` when flagged, `None` otherwise
//!      or place_order             → the direct-path order when not flagged
//!
//! The cart is claimed for the whole protocol; the claim is released when
//! the last stage value is dropped.

use crate::{
    cart_lock::{CartGuard, CheckoutLocks},
    catalog::{Cart, Customer},
    clock::{Clock, SystemClock},
    config::RiskPolicy,
    error::{ShopError, ShopResult},
    materializer,
    order::Order,
    risk_engine::{RiskAssessment, RiskEngine},
    store::ShopStore,
    transaction_record::{record_transaction, CheckoutDetails, TransactionSnapshot},
    types::{OrderId, Timestamp, UserId},
    verification::{self, HoldView, VerificationHold},
};
use std::sync::Arc;
use uuid::Uuid;

pub struct Storefront {
    store:  ShopStore,
    engine: RiskEngine,
    clock:  Arc<dyn Clock>,
    locks:  Arc<CheckoutLocks>,
}

/// How a completed checkout ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutOutcome {
    Placed {
        order:      Order,
        assessment: RiskAssessment,
    },
    VerificationRequired {
        hold:       VerificationHold,
        assessment: RiskAssessment,
    },
}

impl Storefront {
    pub fn new(store: ShopStore, policy: RiskPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            engine: RiskEngine::new(policy),
            clock,
            locks: CheckoutLocks::new(),
        }
    }

    /// Open (or create) a database file, migrate it, and run on the system clock.
    pub fn open(path: &str, policy: RiskPolicy) -> ShopResult<Self> {
        let store = ShopStore::open(path)?;
        store.migrate()?;
        Ok(Self::new(store, policy, Arc::new(SystemClock)))
    }

    /// A second handle on the same database sharing clock and cart locks.
    /// Each handle owns its own connection.
    pub fn fork(&self) -> ShopResult<Self> {
        Ok(Self {
            store: self.store.reopen()?,
            engine: RiskEngine::new(self.engine.policy().clone()),
            clock: Arc::clone(&self.clock),
            locks: Arc::clone(&self.locks),
        })
    }

    pub fn store(&self) -> &ShopStore {
        &self.store
    }

    pub fn policy(&self) -> &RiskPolicy {
        self.engine.policy()
    }

    pub fn locks(&self) -> &Arc<CheckoutLocks> {
        &self.locks
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn customer(&self, user_id: UserId) -> ShopResult<Customer> {
        self.store
            .get_customer(user_id)?
            .ok_or_else(|| ShopError::not_found("customer", user_id))
    }

    /// The user's cart, which must exist and hold at least one line.
    pub fn checkout_cart(&self, user_id: UserId) -> ShopResult<Cart> {
        match self.store.cart_for_user(user_id)? {
            Some(cart) if !cart.is_empty() => Ok(cart),
            _ => Err(empty_cart()),
        }
    }

    // ── Checkout protocol ─────────────────────────────────────────

    /// Step 1: claim the cart and snapshot the checkout attempt.
    ///
    /// Cart lines are read only once the claim is held, so a checkout that
    /// finished in the meantime is seen as an empty cart. A user whose
    /// previous checkout is still awaiting confirmation is turned away.
    pub fn collect_transaction_data(
        &self,
        user_id: UserId,
        details: &CheckoutDetails,
    ) -> ShopResult<CollectedTransaction<'_>> {
        let user = self.customer(user_id)?;
        let cart_id = self
            .store
            .cart_id_for_user(user_id)?
            .ok_or_else(empty_cart)?;
        let guard = self.locks.acquire(cart_id)?;
        if let Some(hold) = self.store.pending_hold_for_user(user_id, self.now())? {
            log::warn!(
                "user {user_id}: checkout refused, hold {} still awaiting confirmation",
                hold.confirmation_key
            );
            return Err(ShopError::Validation(
                "Your previous order is awaiting verification. Please confirm it before checking out again."
                    .into(),
            ));
        }
        let cart = self.checkout_cart(user_id)?;
        let snapshot = record_transaction(
            &self.store,
            &user,
            cart.total_price(),
            details,
            self.now(),
        )?;
        Ok(CollectedTransaction {
            shop: self,
            user,
            cart,
            snapshot,
            _guard: guard,
        })
    }

    /// All three steps, ending in an order or a hold.
    pub fn checkout(&self, user_id: UserId, details: &CheckoutDetails) -> ShopResult<CheckoutOutcome> {
        let evaluated = self
            .collect_transaction_data(user_id, details)?
            .run_fraud_detection()?;
        match evaluated.create_fraud_confirmation()? {
            Some(hold) => Ok(CheckoutOutcome::VerificationRequired {
                hold,
                assessment: evaluated.assessment,
            }),
            None => {
                let assessment = evaluated.assessment.clone();
                let order = evaluated.place_order()?;
                Ok(CheckoutOutcome::Placed { order, assessment })
            }
        }
    }

    // ── Verification ──────────────────────────────────────────────

    pub fn confirm_transaction(&self, confirmation_key: &Uuid, user_id: UserId) -> ShopResult<Order> {
        let requester = self.customer(user_id)?;
        verification::confirm(&self.store, confirmation_key, &requester, self.now())
    }

    pub fn verification_status(&self, confirmation_key: &Uuid, user_id: UserId) -> ShopResult<HoldView> {
        let requester = self.customer(user_id)?;
        verification::view_hold(&self.store, confirmation_key, &requester, self.now())
    }

    // ── Orders ────────────────────────────────────────────────────

    pub fn order_history(&self, user_id: UserId) -> ShopResult<Vec<Order>> {
        self.store.orders_for_user(user_id)
    }

    /// An order, visible to its owner only.
    pub fn order_detail(&self, user_id: UserId, order_id: OrderId) -> ShopResult<Order> {
        match self.store.get_order(order_id)? {
            Some(order) if order.user_id == user_id => Ok(order),
            _ => Err(ShopError::not_found("order", order_id)),
        }
    }
}

fn empty_cart() -> ShopError {
    ShopError::Validation("Your cart is empty.".into())
}

/// Step 1 done: snapshot and empty assessment are on disk.
pub struct CollectedTransaction<'s> {
    shop:     &'s Storefront,
    user:     Customer,
    cart:     Cart,
    snapshot: TransactionSnapshot,
    _guard:   CartGuard,
}

impl<'s> CollectedTransaction<'s> {
    pub fn snapshot(&self) -> &TransactionSnapshot {
        &self.snapshot
    }

    /// Step 2: run every rule and freeze the assessment.
    pub fn run_fraud_detection(self) -> ShopResult<EvaluatedTransaction<'s>> {
        let assessment = self.shop.engine.evaluate(
            &self.shop.store,
            &self.snapshot,
            &self.cart,
            &self.user,
            self.shop.now(),
        )?;
        Ok(EvaluatedTransaction {
            shop: self.shop,
            cart: self.cart,
            snapshot: self.snapshot,
            assessment,
            _guard: self._guard,
        })
    }
}

/// Step 2 done: the assessment is frozen.
pub struct EvaluatedTransaction<'s> {
    shop:       &'s Storefront,
    cart:       Cart,
    snapshot:   TransactionSnapshot,
    assessment: RiskAssessment,
    _guard:     CartGuard,
}

impl EvaluatedTransaction<'_> {
    pub fn is_flagged(&self) -> bool {
        self.assessment.is_flagged
    }

    pub fn assessment(&self) -> &RiskAssessment {
        &self.assessment
    }

    pub fn snapshot(&self) -> &TransactionSnapshot {
        &self.snapshot
    }

    /// Step 3: hold a flagged checkout for confirmation. No-op otherwise.
    pub fn create_fraud_confirmation(&self) -> ShopResult<Option<VerificationHold>> {
        if !self.assessment.is_flagged {
            return Ok(None);
        }
        let hold = verification::create_hold(
            &self.shop.store,
            self.shop.policy(),
            &self.snapshot,
            &self.assessment,
            &self.cart,
            self.shop.now(),
        )?;
        Ok(Some(hold))
    }

    /// Direct path for a checkout that passed.
    pub fn place_order(self) -> ShopResult<Order> {
        if self.assessment.is_flagged {
            return Err(ShopError::Validation(format!(
                "transaction {} is flagged and needs confirmation",
                self.snapshot.transaction_id
            )));
        }
        materializer::place_order(&self.shop.store, &self.cart, self.shop.now())
    }
}
