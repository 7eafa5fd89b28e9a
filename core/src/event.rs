//! Checkout audit events.
//!
//! RULE: Every state change in the checkout core emits exactly one event,
//! appended to `event_log` inside the same atomic unit as the change.
//! Variants are only ever added, never removed or reordered.

use crate::types::{OrderId, Timestamp, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShopEvent {
    // ── Transaction record ─────────────────────────
    TransactionRecorded {
        transaction_id: TransactionId,
        user_id:        UserId,
        order_total:    Decimal,
    },

    // ── Risk engine ────────────────────────────────
    RiskEvaluated {
        transaction_id: TransactionId,
        risk_score:     u32,
        is_flagged:     bool,
        rules_fired:    Vec<String>,
    },

    // ── Verification hold ──────────────────────────
    VerificationHoldCreated {
        transaction_id:   TransactionId,
        confirmation_key: String,
        order_id:         OrderId,
        expiry_time:      Timestamp,
    },
    HoldConfirmed {
        confirmation_key: String,
        order_id:         OrderId,
        rebuilt:          bool,
    },
    ConfirmationRejected {
        confirmation_key: String,
        user_id:          UserId,
        reason:           String,
    },
    HoldExpiryExtended {
        confirmation_key: String,
        new_expiry_time:  Timestamp,
    },

    // ── Orders ─────────────────────────────────────
    OrderPlaced {
        order_id:    OrderId,
        user_id:     UserId,
        status:      String,
        total_price: Decimal,
        item_count:  usize,
    },
    OrderStatusChanged {
        order_id:   OrderId,
        old_status: String,
        new_status: String,
    },
}

impl ShopEvent {
    /// Stable name for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TransactionRecorded { .. }     => "transaction_recorded",
            Self::RiskEvaluated { .. }           => "risk_evaluated",
            Self::VerificationHoldCreated { .. } => "verification_hold_created",
            Self::HoldConfirmed { .. }           => "hold_confirmed",
            Self::ConfirmationRejected { .. }    => "confirmation_rejected",
            Self::HoldExpiryExtended { .. }      => "hold_expiry_extended",
            Self::OrderPlaced { .. }             => "order_placed",
            Self::OrderStatusChanged { .. }      => "order_status_changed",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub event_type: String,
    pub payload:    String, // JSON-serialized ShopEvent
    pub created_at: Timestamp,
}

impl EventLogEntry {
    pub fn decode(&self) -> serde_json::Result<ShopEvent> {
        serde_json::from_str(&self.payload)
    }
}
