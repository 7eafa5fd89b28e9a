//! Request dispatch: status codes, redirects and flash messages.

mod common;

use chrono::Duration;
use common::*;
use std::collections::BTreeMap;
use storefront_core::{
    checkout::Storefront,
    routes::{handle, Flash, FlashLevel, Page, Redirect, Request, Response},
    types::UserId,
};
use uuid::Uuid;

fn checkout_form(location: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("confirmed_location".to_string(), location.to_string()),
        ("shipping_address".to_string(), "12 Elm Street".to_string()),
        ("billing_address".to_string(), "12 Elm Street".to_string()),
        ("device_user_agent".to_string(), "curl/8.0".to_string()),
    ])
}

fn post_checkout(shop: &Storefront, user: UserId, location: &str) -> Response {
    handle(shop, &Request::post("/orders/checkout/", Some(user), checkout_form(location)))
}

fn flash_of(response: &Response) -> &Flash {
    match response {
        Response::Redirect { flash: Some(flash), .. } => flash,
        other => panic!("expected a redirect with a message, got {other:?}"),
    }
}

/// A flagged checkout; returns the owner and the confirmation key.
fn flagged(shop: &Storefront) -> (UserId, Uuid) {
    let u = customer(shop, "yan", "LA", Duration::hours(2));
    let bike = product(shop, "Bike", "400.00", 5);
    fill_cart(shop, u, &[(bike, 1)]);
    match post_checkout(shop, u, "Denver") {
        Response::Redirect { to: Redirect::VerificationRequired(key), flash } => {
            let flash = flash.unwrap();
            assert_eq!(flash.level, FlashLevel::Warning);
            assert_eq!(flash.message, "Your transaction requires additional verification.");
            (u, key)
        }
        other => panic!("expected verification redirect, got {other:?}"),
    }
}

#[test]
fn anonymous_requests_go_to_login() {
    let (shop, _clock) = test_shop();
    for path in ["/orders/checkout/", "/orders/history/", "/fraud/dashboard/"] {
        assert_eq!(
            handle(&shop, &Request::get(path, None)),
            Response::Redirect { to: Redirect::Login, flash: None },
            "{path}"
        );
    }
}

#[test]
fn resubmitting_a_held_cart_points_back_to_verification() {
    let (shop, _clock) = test_shop();
    let (u, _key) = flagged(&shop);

    let response = post_checkout(&shop, u, "Denver");
    assert!(matches!(response, Response::Redirect { to: Redirect::Cart, .. }));
    let flash = flash_of(&response);
    assert_eq!(flash.level, FlashLevel::Error);
    assert!(flash.message.contains("awaiting verification"), "{}", flash.message);
}

#[test]
fn checkout_page_shows_cart() {
    let (shop, _clock) = test_shop();
    let u = customer(&shop, "zed", "LA", Duration::days(30));
    let mug = product(&shop, "Mug", "10.00", 5);
    fill_cart(&shop, u, &[(mug, 2)]);

    match handle(&shop, &Request::get("/orders/checkout/", Some(u))) {
        Response::Page(Page::Checkout { cart }) => assert_eq!(cart.total_price(), dec("20.00")),
        other => panic!("expected checkout page, got {other:?}"),
    }
}

#[test]
fn clean_checkout_redirects_to_order_detail() {
    let (shop, _clock) = test_shop();
    let u = customer(&shop, "abe", "LA", Duration::days(30));
    let mug = product(&shop, "Mug", "10.00", 5);
    fill_cart(&shop, u, &[(mug, 1)]);

    let response = post_checkout(&shop, u, "LA");
    let Response::Redirect { to: Redirect::OrderDetail(order_id), .. } = &response else {
        panic!("expected order detail redirect, got {response:?}");
    };
    let flash = flash_of(&response);
    assert_eq!(flash.level, FlashLevel::Success);
    assert_eq!(flash.message, format!("Your order #{order_id} has been placed successfully!"));
    assert_eq!(Redirect::OrderDetail(*order_id).path(), format!("/orders/{order_id}/"));

    let tx = shop.store().get_transaction_record(1).unwrap().unwrap();
    assert_eq!(tx.device_info["user_agent"], "curl/8.0");

    match handle(&shop, &Request::get(&format!("/orders/{order_id}/"), Some(u))) {
        Response::Page(Page::OrderDetail { order }) => assert_eq!(order.order_id, *order_id),
        other => panic!("expected order detail page, got {other:?}"),
    }
}

#[test]
fn empty_cart_redirects_back_to_cart() {
    let (shop, _clock) = test_shop();
    let u = customer(&shop, "bea", "LA", Duration::days(30));

    let response = post_checkout(&shop, u, "LA");
    assert!(matches!(response, Response::Redirect { to: Redirect::Cart, .. }));
    let flash = flash_of(&response);
    assert_eq!(flash.level, FlashLevel::Error);
    assert_eq!(flash.message, "Your cart is empty.");
}

#[test]
fn flagged_checkout_then_confirm() {
    let (shop, clock) = test_shop();
    let (u, key) = flagged(&shop);

    match handle(&shop, &Request::get(&format!("/fraud/verification/{key}/"), Some(u))) {
        Response::Page(Page::Verification { view }) => assert_eq!(view.hold.confirmation_key, key),
        other => panic!("expected verification page, got {other:?}"),
    }

    clock.advance(Duration::minutes(2));
    let response = handle(
        &shop,
        &Request::post(&format!("/fraud/confirm/{key}/"), Some(u), BTreeMap::new()),
    );
    assert!(matches!(response, Response::Redirect { to: Redirect::OrderDetail(_), .. }));
    assert_eq!(flash_of(&response).level, FlashLevel::Success);
}

#[test]
fn confirm_is_post_only() {
    let (shop, _clock) = test_shop();
    let (u, key) = flagged(&shop);
    assert_eq!(
        handle(&shop, &Request::get(&format!("/fraud/confirm/{key}/"), Some(u))),
        Response::MethodNotAllowed
    );
    assert_eq!(
        handle(&shop, &Request::post(&format!("/fraud/verification/{key}/"), Some(u), BTreeMap::new())),
        Response::MethodNotAllowed
    );
}

#[test]
fn expired_confirmation_redirects_home() {
    let (shop, clock) = test_shop();
    let (u, key) = flagged(&shop);
    clock.advance(Duration::minutes(31));

    let response = handle(
        &shop,
        &Request::post(&format!("/fraud/confirm/{key}/"), Some(u), BTreeMap::new()),
    );
    assert!(matches!(response, Response::Redirect { to: Redirect::Home, .. }));
    assert_eq!(
        flash_of(&response).message,
        "This confirmation link has expired. Please try your purchase again."
    );
}

#[test]
fn verification_page_hidden_from_other_customers() {
    let (shop, _clock) = test_shop();
    let (_u, key) = flagged(&shop);
    let other = customer(&shop, "cal", "LA", Duration::days(30));

    let response = handle(&shop, &Request::get(&format!("/fraud/verification/{key}/"), Some(other)));
    assert!(matches!(response, Response::Redirect { to: Redirect::Home, .. }));
    assert_eq!(flash_of(&response).message, "You don't have permission to view this page.");
}

#[test]
fn staff_routes() {
    let (shop, _clock) = test_shop();
    let (u, _key) = flagged(&shop);
    let staff = staff(&shop);

    assert_eq!(
        handle(&shop, &Request::get("/fraud/dashboard/", Some(u))),
        Response::Redirect { to: Redirect::Login, flash: None }
    );
    match handle(&shop, &Request::get("/fraud/dashboard/", Some(staff))) {
        Response::Page(Page::Dashboard { dashboard }) => assert_eq!(dashboard.flagged_count, 1),
        other => panic!("expected dashboard, got {other:?}"),
    }
    match handle(&shop, &Request::get("/fraud/export-data/", Some(staff))) {
        Response::Csv { filename, body } => {
            assert_eq!(filename, "transaction_data.csv");
            assert!(body.starts_with("Transaction ID,User ID,"));
            assert_eq!(body.lines().count(), 2);
        }
        other => panic!("expected csv, got {other:?}"),
    }

    let form = BTreeMap::from([("status".to_string(), "Cancelled".to_string())]);
    let response = handle(&shop, &Request::post("/orders/1/status/", Some(staff), form));
    assert!(matches!(response, Response::Redirect { to: Redirect::OrderManagement, .. }));
    assert_eq!(flash_of(&response).message, "Order #1 status updated to Cancelled");
}

#[test]
fn unknown_paths_and_bad_ids_are_not_found() {
    let (shop, _clock) = test_shop();
    let u = customer(&shop, "dee", "LA", Duration::days(30));
    for path in ["/nope/", "/orders/abc/", "/fraud/verification/not-a-uuid/"] {
        assert_eq!(handle(&shop, &Request::get(path, Some(u))), Response::NotFound, "{path}");
    }
}

#[test]
fn requests_and_responses_travel_as_json() {
    let (shop, _clock) = test_shop();
    let request: Request =
        serde_json::from_str(r#"{"method":"GET","path":"/orders/history/","user_id":null}"#).unwrap();
    let response = handle(&shop, &request);
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["kind"], "redirect");
}
