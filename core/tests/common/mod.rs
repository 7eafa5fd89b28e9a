//! Shared fixtures: an in-memory storefront on a manual clock.
#![allow(dead_code)]

use chrono::Duration;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use storefront_core::{
    checkout::Storefront,
    clock::ManualClock,
    config::RiskPolicy,
    order::OrderStatus,
    store::ShopStore,
    transaction_record::CheckoutDetails,
    types::{CartId, ProductId, Timestamp, UserId},
};

/// Tuesday afternoon, well outside the unusual-hour window.
pub fn t0() -> Timestamp {
    "2026-03-10T14:00:00Z".parse().unwrap()
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn build_shop(policy: RiskPolicy, start: Timestamp) -> (Storefront, Arc<ManualClock>) {
    init_logging();
    let store = ShopStore::in_memory().unwrap();
    store.migrate().unwrap();
    let clock = Arc::new(ManualClock::new(start));
    (Storefront::new(store, policy, clock.clone()), clock)
}

pub fn test_shop() -> (Storefront, Arc<ManualClock>) {
    build_shop(RiskPolicy::default(), t0())
}

/// A customer who registered `age` before t0.
pub fn customer(shop: &Storefront, username: &str, location: &str, age: Duration) -> UserId {
    shop.store()
        .insert_customer(username, location, t0() - age, false)
        .unwrap()
}

pub fn staff(shop: &Storefront) -> UserId {
    shop.store()
        .insert_customer("staff", "HQ", t0() - Duration::days(1000), true)
        .unwrap()
}

pub fn product(shop: &Storefront, name: &str, price: &str, stock: i64) -> ProductId {
    shop.store().insert_product(name, dec(price), stock).unwrap()
}

/// Put `lines` in the user's cart, creating the cart if needed.
pub fn fill_cart(shop: &Storefront, user_id: UserId, lines: &[(ProductId, i64)]) -> CartId {
    let store = shop.store();
    let cart_id = match store.cart_for_user(user_id).unwrap() {
        Some(cart) => cart.cart_id,
        None => store.create_cart(user_id, t0()).unwrap(),
    };
    for &(product_id, quantity) in lines {
        store.add_cart_item(cart_id, product_id, quantity).unwrap();
    }
    cart_id
}

/// Completed orders placed `ago` before t0, one per total.
pub fn past_orders(shop: &Storefront, user_id: UserId, totals: &[&str], ago: Duration) {
    for total in totals {
        shop.store()
            .insert_order(user_id, OrderStatus::Completed, dec(total), t0() - ago)
            .unwrap();
    }
}

/// Checkout details with matching addresses.
pub fn details(location: &str) -> CheckoutDetails {
    CheckoutDetails {
        confirmed_location: location.to_string(),
        shipping_address: "12 Elm Street".to_string(),
        billing_address: "12 Elm Street".to_string(),
        ..Default::default()
    }
}

/// A storefront on a fresh database file, so `fork()` handles share data.
pub fn file_shop(name: &str) -> (Storefront, Arc<ManualClock>, std::path::PathBuf) {
    init_logging();
    let path = std::env::temp_dir().join(format!("storefront-{name}-{}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let store = ShopStore::open(path.to_str().unwrap()).unwrap();
    store.migrate().unwrap();
    let clock = Arc::new(ManualClock::new(t0()));
    (Storefront::new(store, RiskPolicy::default(), clock.clone()), clock, path)
}

pub fn remove_db(path: &std::path::Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut p = path.as_os_str().to_owned();
        p.push(suffix);
        let _ = std::fs::remove_file(p);
    }
}
