//! Per-cart checkout exclusion.
//!
//! A checkout holds a `CartGuard` from the moment its snapshot is taken
//! until the order or hold is written. A second checkout of the same cart
//! fails fast instead of producing a second order from one cart.

use crate::{
    error::{ShopError, ShopResult},
    types::CartId,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct CheckoutLocks {
    in_flight: Mutex<HashSet<CartId>>,
}

impl CheckoutLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim `cart_id`. The claim is released when the guard drops.
    pub fn acquire(self: &Arc<Self>, cart_id: CartId) -> ShopResult<CartGuard> {
        if !self.set().insert(cart_id) {
            log::warn!("cart {cart_id}: concurrent checkout rejected");
            return Err(ShopError::CheckoutInProgress { cart_id });
        }
        Ok(CartGuard {
            locks: Arc::clone(self),
            cart_id,
        })
    }

    pub fn is_locked(&self, cart_id: CartId) -> bool {
        self.set().contains(&cart_id)
    }

    fn set(&self) -> MutexGuard<'_, HashSet<CartId>> {
        // The set stays consistent even if a holder panicked.
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
pub struct CartGuard {
    locks:   Arc<CheckoutLocks>,
    cart_id: CartId,
}

impl CartGuard {
    pub fn cart_id(&self) -> CartId {
        self.cart_id
    }
}

impl Drop for CartGuard {
    fn drop(&mut self) {
        self.locks.set().remove(&self.cart_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_on_same_cart_fails() {
        let locks = CheckoutLocks::new();
        let _guard = locks.acquire(7).unwrap();
        assert!(matches!(
            locks.acquire(7),
            Err(ShopError::CheckoutInProgress { cart_id: 7 })
        ));
        assert!(locks.acquire(8).is_ok());
    }

    #[test]
    fn dropping_guard_releases_cart() {
        let locks = CheckoutLocks::new();
        {
            let guard = locks.acquire(3).unwrap();
            assert_eq!(guard.cart_id(), 3);
            assert!(locks.is_locked(3));
        }
        assert!(!locks.is_locked(3));
        assert!(locks.acquire(3).is_ok());
    }
}
