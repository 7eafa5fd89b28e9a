//! Staff tooling: fraud dashboard, CSV export, order status changes.
//!
//! Every entry point takes the acting customer and refuses non-staff.

use crate::{
    catalog::Customer,
    error::{ShopError, ShopResult},
    event::ShopEvent,
    order::{Order, OrderStatus},
    risk_engine::RiskAssessment,
    risk_rules::RuleId,
    store::{ExportRow, ShopStore},
    types::{OrderId, Timestamp},
    verification::VerificationHold,
};
use chrono::{FixedOffset, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;

const DASHBOARD_LIST_LEN: usize = 10;

pub const EXPORT_COLUMNS: [&str; 12] = [
    "Transaction ID",
    "User ID",
    "Order Total",
    "Location Match",
    "Is First Purchase",
    "Account Age (days)",
    "Transaction Hour",
    "Address Match",
    "Risk Score",
    "Is Flagged",
    "Was Confirmed",
    "Timestamp",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudDashboard {
    pub recent_flagged:        Vec<RiskAssessment>,
    /// Unconfirmed holds still inside their window, soonest expiry first.
    pub pending_confirmations: Vec<VerificationHold>,
    pub total_transactions:    i64,
    pub flagged_count:         i64,
    /// Share of transactions flagged, in percent, one decimal place.
    pub flagged_percent:       f64,
    pub confirmed_count:       i64,
    pub expired_count:         i64,
    /// Fired-rule counts across every flagged assessment.
    pub reason_counts:         BTreeMap<RuleId, usize>,
}

fn require_staff(operator: &Customer) -> ShopResult<()> {
    if operator.is_staff {
        Ok(())
    } else {
        Err(ShopError::Forbidden(format!("user {} is not staff", operator.user_id)))
    }
}

pub fn fraud_dashboard(
    store: &ShopStore,
    operator: &Customer,
    now: Timestamp,
) -> ShopResult<FraudDashboard> {
    require_staff(operator)?;

    let counts = store.dashboard_counts(now)?;
    let flagged_percent = if counts.total_transactions > 0 {
        let pct = counts.flagged as f64 / counts.total_transactions as f64 * 100.0;
        (pct * 10.0).round() / 10.0
    } else {
        0.0
    };

    let mut reason_counts = BTreeMap::new();
    for assessment in store.flagged_assessments()? {
        for reason in &assessment.reasons {
            *reason_counts.entry(reason.rule).or_insert(0) += 1;
        }
    }

    Ok(FraudDashboard {
        recent_flagged: store.recent_flagged_assessments(DASHBOARD_LIST_LEN)?,
        pending_confirmations: store.pending_holds(now, DASHBOARD_LIST_LEN)?,
        total_transactions: counts.total_transactions,
        flagged_count: counts.flagged,
        flagged_percent,
        confirmed_count: counts.confirmed,
        expired_count: counts.expired,
        reason_counts,
    })
}

/// Write every transaction as CSV, one row each, header first.
/// Hour and timestamp are rendered in `local`. Returns the row count.
pub fn export_transaction_data<W: Write>(
    store: &ShopStore,
    operator: &Customer,
    local: FixedOffset,
    mut out: W,
) -> ShopResult<usize> {
    require_staff(operator)?;

    write_record(&mut out, EXPORT_COLUMNS.iter().map(|c| c.to_string()))?;
    let rows = store.export_rows()?;
    for row in &rows {
        write_record(&mut out, export_fields(row, local))?;
    }
    out.flush()?;

    log::info!("user {} exported {} transactions", operator.user_id, rows.len());
    Ok(rows.len())
}

fn export_fields(row: &ExportRow, local: FixedOffset) -> [String; 12] {
    let snap = &row.snapshot;
    let created_local = snap.created_at.with_timezone(&local);
    [
        snap.transaction_id.to_string(),
        snap.user_id.to_string(),
        snap.order_total.to_string(),
        py_bool(snap.location_matches()),
        py_bool(snap.is_first_purchase),
        (snap.created_at - row.date_joined).num_days().to_string(),
        created_local.hour().to_string(),
        py_bool(snap.address_matches()),
        row.risk_score.map(|s| s.to_string()).unwrap_or_default(),
        row.is_flagged.map(py_bool).unwrap_or_default(),
        row.was_confirmed.map(py_bool).unwrap_or_default(),
        created_local.format("%Y-%m-%d %H:%M:%S").to_string(),
    ]
}

fn py_bool(b: bool) -> String {
    if b { "True" } else { "False" }.to_string()
}

fn write_record<W: Write>(out: &mut W, fields: impl IntoIterator<Item = String>) -> ShopResult<()> {
    let line = fields
        .into_iter()
        .map(|f| csv_escape(&f))
        .collect::<Vec<_>>()
        .join(",");
    out.write_all(line.as_bytes())?;
    out.write_all(b"\r\n")?;
    Ok(())
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Staff-only status change. `status` must name one of the order statuses.
pub fn update_order_status(
    store: &ShopStore,
    operator: &Customer,
    order_id: OrderId,
    status: &str,
    now: Timestamp,
) -> ShopResult<Order> {
    require_staff(operator)?;
    let new_status: OrderStatus = status
        .parse()
        .map_err(|_| ShopError::Validation("Invalid status selected".into()))?;

    let order = store.atomically(|store| {
        let old = store.update_order_status(order_id, new_status, now)?;
        store.append_event(
            &ShopEvent::OrderStatusChanged {
                order_id,
                old_status: old.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            },
            now,
        )?;
        store
            .get_order(order_id)?
            .ok_or_else(|| ShopError::not_found("order", order_id))
    })?;

    log::info!("order {order_id} status updated to {new_status} by user {}", operator.user_id);
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields_are_not_quoted() {
        assert_eq!(csv_escape("250.00"), "250.00");
    }

    #[test]
    fn fields_with_separators_are_quoted() {
        assert_eq!(csv_escape("1 Main St, Springfield"), "\"1 Main St, Springfield\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn header_has_twelve_columns_in_order() {
        let mut out = Vec::new();
        write_record(&mut out, EXPORT_COLUMNS.iter().map(|c| c.to_string())).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Transaction ID,User ID,Order Total,Location Match,Is First Purchase,\
             Account Age (days),Transaction Hour,Address Match,Risk Score,Is Flagged,\
             Was Confirmed,Timestamp\r\n"
        );
    }
}
