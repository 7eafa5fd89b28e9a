//! Staff tooling: fraud dashboard, CSV export, order status updates.

mod common;

use chrono::{Duration, FixedOffset};
use common::*;
use storefront_core::{
    admin::{self, EXPORT_COLUMNS},
    checkout::{CheckoutOutcome, Storefront},
    error::ShopError,
    order::OrderStatus,
    risk_rules::RuleId,
    types::{OrderId, TransactionId, UserId},
    verification::VerificationHold,
};

struct Fixture {
    shop:      Storefront,
    clock:     std::sync::Arc<storefront_core::clock::ManualClock>,
    staff:     UserId,
    amy:       UserId,
    amy_txn:   TransactionId,
    amy_order: OrderId,
    ben:       UserId,
    ben_hold:  VerificationHold,
    cat_hold:  VerificationHold,
}

/// Three checkouts at t0: one clean, two flagged. Ben confirms five
/// minutes later; Cat never does.
fn fixture() -> Fixture {
    let (shop, clock) = test_shop();
    let staff = staff(&shop);
    let amy = customer(&shop, "amy", "LA", Duration::days(10));
    let ben = customer(&shop, "ben", "LA", Duration::hours(2));
    let cat = customer(&shop, "cat", "LA", Duration::hours(2));
    let mug = product(&shop, "Mug", "10.00", 50);
    let bike = product(&shop, "Bike", "400.00", 50);

    fill_cart(&shop, amy, &[(mug, 1)]);
    let CheckoutOutcome::Placed { order, assessment } = shop.checkout(amy, &details("LA")).unwrap() else {
        panic!("amy should not be flagged");
    };

    fill_cart(&shop, ben, &[(bike, 1)]);
    let CheckoutOutcome::VerificationRequired { hold: ben_hold, .. } =
        shop.checkout(ben, &details("Denver")).unwrap()
    else {
        panic!("ben should be flagged");
    };

    fill_cart(&shop, cat, &[(bike, 1)]);
    let CheckoutOutcome::VerificationRequired { hold: cat_hold, .. } =
        shop.checkout(cat, &details("Austin")).unwrap()
    else {
        panic!("cat should be flagged");
    };

    clock.advance(Duration::minutes(5));
    shop.confirm_transaction(&ben_hold.confirmation_key, ben).unwrap();

    Fixture {
        shop,
        clock,
        staff,
        amy,
        amy_txn: assessment.transaction_id,
        amy_order: order.order_id,
        ben,
        ben_hold,
        cat_hold,
    }
}

#[test]
fn dashboard_counts_and_lists() {
    let f = fixture();
    let staff = f.shop.customer(f.staff).unwrap();

    let now = f.clock.advance(Duration::minutes(5));
    let dash = admin::fraud_dashboard(f.shop.store(), &staff, now).unwrap();
    assert_eq!(dash.total_transactions, 3);
    assert_eq!(dash.flagged_count, 2);
    assert_eq!(dash.flagged_percent, 66.7);
    assert_eq!(dash.confirmed_count, 1);
    assert_eq!(dash.expired_count, 0);
    assert_eq!(dash.recent_flagged.len(), 2);
    assert_eq!(dash.pending_confirmations.len(), 1);
    assert_eq!(dash.pending_confirmations[0].confirmation_key, f.cat_hold.confirmation_key);
    assert_eq!(dash.reason_counts[&RuleId::LocationMismatch], 2);
    assert_eq!(dash.reason_counts[&RuleId::NewAccountLargeOrder], 2);
    assert!(!dash.reason_counts.contains_key(&RuleId::BulkHighValue));

    let later = f.clock.advance(Duration::hours(1));
    let dash = admin::fraud_dashboard(f.shop.store(), &staff, later).unwrap();
    assert_eq!(dash.expired_count, 1);
    assert!(dash.pending_confirmations.is_empty());
    assert_eq!(dash.confirmed_count, 1);
}

#[test]
fn dashboard_on_empty_store() {
    let (shop, _clock) = test_shop();
    let staff = shop.customer(staff(&shop)).unwrap();
    let dash = admin::fraud_dashboard(shop.store(), &staff, t0()).unwrap();
    assert_eq!(dash.total_transactions, 0);
    assert_eq!(dash.flagged_percent, 0.0);
    assert!(dash.reason_counts.is_empty());
}

#[test]
fn staff_tools_refuse_customers() {
    let f = fixture();
    let amy = f.shop.customer(f.amy).unwrap();
    let now = f.shop.now();

    assert!(matches!(
        admin::fraud_dashboard(f.shop.store(), &amy, now),
        Err(ShopError::Forbidden(_))
    ));
    let mut out = Vec::new();
    assert!(matches!(
        admin::export_transaction_data(f.shop.store(), &amy, FixedOffset::east_opt(0).unwrap(), &mut out),
        Err(ShopError::Forbidden(_))
    ));
    assert!(out.is_empty());
    assert!(matches!(
        admin::update_order_status(f.shop.store(), &amy, f.amy_order, "Shipped", now),
        Err(ShopError::Forbidden(_))
    ));
}

#[test]
fn csv_export_has_exact_columns_and_rows() {
    let f = fixture();
    let staff = f.shop.customer(f.staff).unwrap();
    let mut out = Vec::new();
    let rows = admin::export_transaction_data(
        f.shop.store(),
        &staff,
        FixedOffset::east_opt(0).unwrap(),
        &mut out,
    )
    .unwrap();
    assert_eq!(rows, 3);

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.split("\r\n").collect();
    assert_eq!(lines.len(), 5, "header, three rows, trailing empty: {text:?}");
    assert_eq!(
        lines[0],
        "Transaction ID,User ID,Order Total,Location Match,Is First Purchase,\
         Account Age (days),Transaction Hour,Address Match,Risk Score,Is Flagged,\
         Was Confirmed,Timestamp"
    );
    assert_eq!(lines[0].split(',').count(), EXPORT_COLUMNS.len());

    assert_eq!(
        lines[1],
        format!("{},{},10.00,True,True,10,14,True,0,False,,2026-03-10 14:00:00", f.amy_txn, f.amy)
    );

    let ben: Vec<&str> = lines[2].split(',').collect();
    assert_eq!(ben[0], f.ben_hold.transaction_id.to_string());
    assert_eq!(ben[1], f.ben.to_string());
    assert_eq!(ben[2], "400.00");
    assert_eq!(ben[3], "False");
    assert_eq!(ben[5], "0");
    assert_eq!(ben[8], "50");
    assert_eq!(ben[9], "True");
    assert_eq!(ben[10], "True");

    let cat: Vec<&str> = lines[3].split(',').collect();
    assert_eq!(cat[10], "False");
    assert_eq!(lines[4], "");
}

#[test]
fn csv_export_renders_local_time() {
    let f = fixture();
    let staff = f.shop.customer(f.staff).unwrap();
    let mut out = Vec::new();
    let local = FixedOffset::west_opt(5 * 3600).unwrap();
    admin::export_transaction_data(f.shop.store(), &staff, local, &mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    let first_row: Vec<&str> = text.split("\r\n").nth(1).unwrap().split(',').collect();
    assert_eq!(first_row[6], "9");
    assert_eq!(first_row[11], "2026-03-10 09:00:00");
}

#[test]
fn staff_can_update_order_status() {
    let f = fixture();
    let staff = f.shop.customer(f.staff).unwrap();
    let now = f.clock.advance(Duration::minutes(1));

    let order = admin::update_order_status(f.shop.store(), &staff, f.amy_order, "Shipped", now).unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.updated_at, now);

    let events = f.shop.store().events_of_type("order_status_changed").unwrap();
    let last: serde_json::Value = serde_json::from_str(&events.last().unwrap().payload).unwrap();
    assert_eq!(last["old_status"], "Pending");
    assert_eq!(last["new_status"], "Shipped");
}

#[test]
fn invalid_status_is_rejected() {
    let f = fixture();
    let staff = f.shop.customer(f.staff).unwrap();
    let err = admin::update_order_status(f.shop.store(), &staff, f.amy_order, "Lost", f.shop.now())
        .unwrap_err();
    assert!(matches!(err, ShopError::Validation(ref m) if m == "Invalid status selected"));

    let err = admin::update_order_status(f.shop.store(), &staff, 9999, "Shipped", f.shop.now())
        .unwrap_err();
    assert!(matches!(err, ShopError::NotFound { .. }));
    assert_eq!(
        f.shop.order_detail(f.amy, f.amy_order).unwrap().status,
        OrderStatus::Pending
    );
}
