//! Request dispatch for the checkout, verification and staff endpoints.
//!
//! ROUTES:
//!   GET|POST /orders/checkout/
//!   GET      /orders/history/
//!   GET      /orders/<order_id>/
//!   POST     /orders/<order_id>/status/        (staff)
//!   GET      /fraud/verification/<key>/
//!   POST     /fraud/confirm/<key>/
//!   GET      /fraud/dashboard/                 (staff)
//!   GET      /fraud/export-data/               (staff)
//!
//! Handlers never fail: every error becomes a redirect carrying a flash
//! message, and state-changing routes only answer POST.

use crate::{
    admin::{self, FraudDashboard},
    catalog::{Cart, Customer},
    checkout::{CheckoutOutcome, Storefront},
    error::ShopError,
    order::Order,
    transaction_record::CheckoutDetails,
    types::{OrderId, UserId},
    verification::HoldView,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub method:  Method,
    pub path:    String,
    /// Authenticated user, if any.
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub form:    BTreeMap<String, String>,
}

impl Request {
    pub fn get(path: &str, user_id: Option<UserId>) -> Self {
        Self { method: Method::Get, path: path.to_string(), user_id, form: BTreeMap::new() }
    }

    pub fn post(path: &str, user_id: Option<UserId>, form: BTreeMap<String, String>) -> Self {
        Self { method: Method::Post, path: path.to_string(), user_id, form }
    }

    fn field(&self, name: &str) -> String {
        self.form.get(name).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Redirect {
    Home,
    Login,
    Cart,
    OrderHistory,
    OrderManagement,
    OrderDetail(OrderId),
    VerificationRequired(Uuid),
}

impl Redirect {
    pub fn path(&self) -> String {
        match self {
            Self::Home                      => "/".to_string(),
            Self::Login                     => "/users/login/".to_string(),
            Self::Cart                      => "/cart/".to_string(),
            Self::OrderHistory              => "/orders/history/".to_string(),
            Self::OrderManagement           => "/orders/manage/".to_string(),
            Self::OrderDetail(id)           => format!("/orders/{id}/"),
            Self::VerificationRequired(key) => format!("/fraud/verification/{key}/"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    pub level:   FlashLevel,
    pub message: String,
}

impl Flash {
    fn success(message: impl Into<String>) -> Option<Self> {
        Some(Self { level: FlashLevel::Success, message: message.into() })
    }

    fn warning(message: impl Into<String>) -> Option<Self> {
        Some(Self { level: FlashLevel::Warning, message: message.into() })
    }

    fn error(message: impl Into<String>) -> Option<Self> {
        Some(Self { level: FlashLevel::Error, message: message.into() })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "page", rename_all = "snake_case")]
pub enum Page {
    Checkout { cart: Cart },
    Verification { view: Box<HoldView> },
    OrderHistory { orders: Vec<Order> },
    OrderDetail { order: Order },
    Dashboard { dashboard: Box<FraudDashboard> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Redirect { to: Redirect, flash: Option<Flash> },
    Page(Page),
    Csv { filename: String, body: String },
    NotFound,
    MethodNotAllowed,
}

impl Response {
    fn redirect(to: Redirect, flash: Option<Flash>) -> Self {
        Self::Redirect { to, flash }
    }
}

/// Dispatch one request.
pub fn handle(shop: &Storefront, req: &Request) -> Response {
    let segments: Vec<&str> = req.path.split('/').filter(|s| !s.is_empty()).collect();
    match (req.method, segments.as_slice()) {
        (_, ["orders", "checkout"]) => with_user(shop, req, |user| checkout(shop, req, user)),
        (Method::Get, ["orders", "history"]) => with_user(shop, req, |user| {
            match shop.order_history(user.user_id) {
                Ok(orders) => Response::Page(Page::OrderHistory { orders }),
                Err(e) => failure(Redirect::Home, &e),
            }
        }),
        (Method::Get, ["orders", id]) => match id.parse::<OrderId>() {
            Ok(order_id) => with_user(shop, req, |user| order_detail(shop, user, order_id)),
            Err(_) => Response::NotFound,
        },
        (Method::Post, ["orders", id, "status"]) => match id.parse::<OrderId>() {
            Ok(order_id) => with_staff(shop, req, |staff| update_status(shop, req, staff, order_id)),
            Err(_) => Response::NotFound,
        },
        (Method::Get, ["fraud", "verification", key]) => match Uuid::parse_str(key) {
            Ok(key) => with_user(shop, req, |user| verification_page(shop, user, &key)),
            Err(_) => Response::NotFound,
        },
        (Method::Post, ["fraud", "confirm", key]) => match Uuid::parse_str(key) {
            Ok(key) => with_user(shop, req, |user| confirm(shop, user, &key)),
            Err(_) => Response::NotFound,
        },
        (Method::Get, ["fraud", "dashboard"]) => with_staff(shop, req, |staff| {
            match admin::fraud_dashboard(shop.store(), staff, shop.now()) {
                Ok(dashboard) => Response::Page(Page::Dashboard { dashboard: Box::new(dashboard) }),
                Err(e) => failure(Redirect::Home, &e),
            }
        }),
        (Method::Get, ["fraud", "export-data"]) => with_staff(shop, req, |staff| export(shop, staff)),
        (
            _,
            ["orders", _]
            | ["orders", _, "status"]
            | ["fraud", "verification" | "confirm", _]
            | ["fraud", "dashboard" | "export-data"],
        ) => Response::MethodNotAllowed,
        _ => Response::NotFound,
    }
}

fn with_user(shop: &Storefront, req: &Request, f: impl FnOnce(&Customer) -> Response) -> Response {
    let Some(user_id) = req.user_id else {
        return Response::redirect(Redirect::Login, None);
    };
    match shop.customer(user_id) {
        Ok(user) => f(&user),
        Err(_) => Response::redirect(Redirect::Login, None),
    }
}

fn with_staff(shop: &Storefront, req: &Request, f: impl FnOnce(&Customer) -> Response) -> Response {
    with_user(shop, req, |user| {
        if user.is_staff {
            f(user)
        } else {
            Response::redirect(Redirect::Login, None)
        }
    })
}

/// Map a failed operation to a redirect with the error shown to the user.
fn failure(to: Redirect, error: &ShopError) -> Response {
    let message = match error {
        ShopError::Validation(msg) | ShopError::Forbidden(msg) => msg.clone(),
        ShopError::Expired { .. } => {
            "This confirmation link has expired. Please try your purchase again.".to_string()
        }
        ShopError::NotFound { entity, .. } => format!("{} not found.", capitalize(entity)),
        ShopError::CheckoutInProgress { .. } => {
            "Your checkout is already being processed.".to_string()
        }
        ShopError::InsufficientStock { .. } => {
            "Some items in your cart are no longer available in the requested quantity.".to_string()
        }
        other => {
            log::error!("request failed: {other}");
            "We could not process your request. Nothing has been charged or changed.".to_string()
        }
    };
    Response::redirect(to, Flash::error(message))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

fn checkout(shop: &Storefront, req: &Request, user: &Customer) -> Response {
    let cart = match shop.checkout_cart(user.user_id) {
        Ok(cart) => cart,
        Err(e) => return failure(Redirect::Cart, &e),
    };
    if req.method == Method::Get {
        return Response::Page(Page::Checkout { cart });
    }

    let details = CheckoutDetails {
        confirmed_location: req.field("confirmed_location"),
        shipping_address: req.field("shipping_address"),
        billing_address: req.field("billing_address"),
        device_info: req
            .form
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("device_").map(|k| (k.to_string(), v.clone())))
            .collect(),
    };
    match shop.checkout(user.user_id, &details) {
        Ok(CheckoutOutcome::Placed { order, .. }) => Response::redirect(
            Redirect::OrderDetail(order.order_id),
            Flash::success(format!("Your order #{} has been placed successfully!", order.order_id)),
        ),
        Ok(CheckoutOutcome::VerificationRequired { hold, .. }) => Response::redirect(
            Redirect::VerificationRequired(hold.confirmation_key),
            Flash::warning("Your transaction requires additional verification."),
        ),
        Err(e) => failure(Redirect::Cart, &e),
    }
}

fn order_detail(shop: &Storefront, user: &Customer, order_id: OrderId) -> Response {
    match shop.order_detail(user.user_id, order_id) {
        Ok(order) => Response::Page(Page::OrderDetail { order }),
        Err(e) => failure(Redirect::OrderHistory, &e),
    }
}

fn update_status(shop: &Storefront, req: &Request, staff: &Customer, order_id: OrderId) -> Response {
    let status = req.field("status");
    match admin::update_order_status(shop.store(), staff, order_id, &status, shop.now()) {
        Ok(order) => Response::redirect(
            Redirect::OrderManagement,
            Flash::success(format!("Order #{} status updated to {}", order.order_id, order.status)),
        ),
        Err(e) => failure(Redirect::OrderManagement, &e),
    }
}

fn verification_page(shop: &Storefront, user: &Customer, key: &Uuid) -> Response {
    match shop.verification_status(key, user.user_id) {
        Ok(view) => Response::Page(Page::Verification { view: Box::new(view) }),
        Err(e) => failure(Redirect::Home, &e),
    }
}

fn confirm(shop: &Storefront, user: &Customer, key: &Uuid) -> Response {
    match shop.confirm_transaction(key, user.user_id) {
        Ok(order) => Response::redirect(
            Redirect::OrderDetail(order.order_id),
            Flash::success("Thank you for confirming your transaction! Your order has been processed."),
        ),
        Err(e) => failure(Redirect::Home, &e),
    }
}

fn export(shop: &Storefront, staff: &Customer) -> Response {
    let mut body = Vec::new();
    let local = shop.policy().local_offset();
    match admin::export_transaction_data(shop.store(), staff, local, &mut body) {
        Ok(_) => Response::Csv {
            filename: "transaction_data.csv".to_string(),
            body: String::from_utf8_lossy(&body).into_owned(),
        },
        Err(e) => failure(Redirect::Home, &e),
    }
}
