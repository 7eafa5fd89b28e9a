//! Customers, products and carts as the checkout core sees them.
//!
//! These are read models of collaborators owned elsewhere in the
//! storefront. The checkout core reads them, decrements stock and
//! clears carts, nothing more.

use crate::types::{CartId, ProductId, Timestamp, UserId};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub user_id:     UserId,
    pub username:    String,
    /// Location captured at registration.
    pub location:    String,
    pub date_joined: Timestamp,
    pub is_staff:    bool,
}

impl Customer {
    pub fn account_age(&self, now: Timestamp) -> Duration {
        now - self.date_joined
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: ProductId,
    pub name:       String,
    pub price:      Decimal,
    pub stock:      i64,
}

/// One cart line joined with the live catalog price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub cart_item_id: i64,
    pub product_id:   ProductId,
    pub product_name: String,
    pub unit_price:   Decimal,
    pub quantity:     i64,
}

impl CartLine {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub cart_id: CartId,
    pub user_id: UserId,
    /// Lines in insertion order.
    pub lines:   Vec<CartLine>,
}

impl Cart {
    pub fn total_price(&self) -> Decimal {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total_items(&self) -> usize {
        self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn line(product_id: ProductId, price: &str, quantity: i64) -> CartLine {
        CartLine {
            cart_item_id: product_id * 10,
            product_id,
            product_name: format!("product-{product_id}"),
            unit_price: Decimal::from_str(price).unwrap(),
            quantity,
        }
    }

    #[test]
    fn cart_total_is_sum_of_line_subtotals() {
        let cart = Cart {
            cart_id: 1,
            user_id: 1,
            lines: vec![line(1, "19.99", 3), line(2, "0.01", 1)],
        };
        assert_eq!(cart.total_price(), Decimal::from_str("59.98").unwrap());
        assert_eq!(cart.total_items(), 2);
    }

    #[test]
    fn empty_cart_totals_zero() {
        let cart = Cart { cart_id: 1, user_id: 1, lines: vec![] };
        assert!(cart.is_empty());
        assert_eq!(cart.total_price(), Decimal::ZERO);
    }
}
