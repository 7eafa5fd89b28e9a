//! Orders and line items.
//!
//! An order's `total_price` is fixed when the order is written and is
//! never recomputed from its items. The materializer is the only writer
//! and guarantees `total_price == Σ item.subtotal()`.

use crate::types::{OrderId, ProductId, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    /// Held behind a verification hold, waiting on the customer.
    Verification,
    Processing,
    Accepted,
    Shipped,
    Delivered,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        Self::Pending,
        Self::Verification,
        Self::Processing,
        Self::Accepted,
        Self::Shipped,
        Self::Delivered,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending      => "Pending",
            Self::Verification => "Verification",
            Self::Processing   => "Processing",
            Self::Accepted     => "Accepted",
            Self::Shipped      => "Shipped",
            Self::Delivered    => "Delivered",
            Self::Completed    => "Completed",
            Self::Cancelled    => "Cancelled",
        }
    }

    /// Human label shown to operators.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Verification => "Requires Verification",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown order status '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id:    OrderId,
    pub user_id:     UserId,
    pub order_date:  Timestamp,
    pub status:      OrderStatus,
    pub total_price: Decimal,
    pub updated_at:  Timestamp,
    pub items:       Vec<OrderItem>,
}

impl Order {
    pub fn items_total(&self) -> Decimal {
        self.items.iter().map(OrderItem::subtotal).sum()
    }
}

/// A line item. Name and price are copies taken when the order was
/// written; later catalog edits never reach them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_item_id: i64,
    /// `None` once the catalog product has been deleted.
    pub product_id:    Option<ProductId>,
    pub product_name:  String,
    pub product_price: Decimal,
    pub quantity:      i64,
}

impl OrderItem {
    pub fn subtotal(&self) -> Decimal {
        self.product_price * Decimal::from(self.quantity)
    }
}

/// An order line about to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id:    ProductId,
    pub product_name:  String,
    pub product_price: Decimal,
    pub quantity:      i64,
}

impl NewOrderItem {
    pub fn subtotal(&self) -> Decimal {
        self.product_price * Decimal::from(self.quantity)
    }
}
