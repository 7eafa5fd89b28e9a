//! Order materializer: turns a cart or a confirmed hold into an order.
//!
//! Every path writes the order header and its price-snapshotted items
//! together. The header total is computed from the very lines that are
//! written, so `total_price` always equals the sum of item subtotals.
//!
//! Stock is taken only for goods that are sold: at placement on the
//! direct path, at confirmation for a held order. A provisional
//! `Verification` order holds no stock, so an abandoned hold leaves the
//! catalog untouched. Stock is re-checked inside the atomic unit: a line
//! asking for more units than the product holds aborts the whole order.

use crate::{
    catalog::Cart,
    error::{ShopError, ShopResult},
    event::ShopEvent,
    order::{NewOrderItem, Order, OrderStatus},
    store::ShopStore,
    types::{Timestamp, UserId},
    verification::CartSnapshot,
};
use rust_decimal::Decimal;

pub fn lines_from_cart(cart: &Cart) -> Vec<NewOrderItem> {
    cart.lines
        .iter()
        .map(|line| NewOrderItem {
            product_id:    line.product_id,
            product_name:  line.product_name.clone(),
            product_price: line.unit_price,
            quantity:      line.quantity,
        })
        .collect()
}

pub fn lines_from_snapshot(snapshot: &CartSnapshot) -> Vec<NewOrderItem> {
    snapshot
        .items
        .iter()
        .map(|item| NewOrderItem {
            product_id:    item.product_id,
            product_name:  item.product_name.clone(),
            product_price: item.price,
            quantity:      item.quantity,
        })
        .collect()
}

/// Write an order and its items. Stock is left alone; see `take_stock`.
///
/// Does not open a transaction: callers run this inside
/// `ShopStore::atomically` together with their own writes.
pub fn write_order(
    store: &ShopStore,
    user_id: UserId,
    status: OrderStatus,
    lines: &[NewOrderItem],
    now: Timestamp,
) -> ShopResult<Order> {
    if lines.is_empty() {
        return Err(ShopError::Validation("an order needs at least one item".into()));
    }
    if let Some(bad) = lines.iter().find(|l| l.quantity <= 0) {
        return Err(ShopError::Validation(format!(
            "invalid quantity {} for {}",
            bad.quantity, bad.product_name
        )));
    }

    let total_price: Decimal = lines.iter().map(NewOrderItem::subtotal).sum();
    let order_id = store.insert_order(user_id, status, total_price, now)?;
    for line in lines {
        store.insert_order_item(order_id, line)?;
    }
    store.append_event(
        &ShopEvent::OrderPlaced {
            order_id,
            user_id,
            status: status.as_str().to_string(),
            total_price,
            item_count: lines.len(),
        },
        now,
    )?;

    store
        .get_order(order_id)?
        .ok_or_else(|| ShopError::not_found("order", order_id))
}

/// Decrement stock for every line. Callers run this inside the same
/// atomic unit that sells the goods.
pub fn take_stock(store: &ShopStore, lines: &[NewOrderItem]) -> ShopResult<()> {
    for line in lines {
        store.decrement_stock(line.product_id, line.quantity)?;
    }
    Ok(())
}

/// The stock-bearing lines of a written order. Items whose catalog
/// product has since been deleted have nothing left to decrement.
pub fn lines_from_order(order: &Order) -> Vec<NewOrderItem> {
    order
        .items
        .iter()
        .filter_map(|item| {
            item.product_id.map(|product_id| NewOrderItem {
                product_id,
                product_name:  item.product_name.clone(),
                product_price: item.product_price,
                quantity:      item.quantity,
            })
        })
        .collect()
}

/// Direct path: an unflagged checkout becomes a `Pending` order and the
/// cart is emptied, all in one atomic unit.
pub fn place_order(store: &ShopStore, cart: &Cart, now: Timestamp) -> ShopResult<Order> {
    if cart.is_empty() {
        return Err(ShopError::Validation("Your cart is empty.".into()));
    }
    let lines = lines_from_cart(cart);

    let order = store.atomically(|store| {
        let order = write_order(store, cart.user_id, OrderStatus::Pending, &lines, now)?;
        take_stock(store, &lines)?;
        store.clear_cart(cart.cart_id)?;
        Ok(order)
    })?;

    log::info!(
        "order {} placed for user {}: total={} items={}",
        order.order_id,
        order.user_id,
        order.total_price,
        order.items.len()
    );
    Ok(order)
}
