use super::{dec_col, json_col, opt_ts_col, ts_col, ShopStore};
use crate::{
    error::{ShopError, ShopResult},
    risk_engine::RiskAssessment,
    transaction_record::{NewTransaction, TransactionSnapshot},
    types::{Timestamp, TransactionId, UserId},
    verification::{CartSnapshot, VerificationHold},
};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

/// Headline numbers for the fraud dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardCounts {
    pub total_transactions: i64,
    pub flagged:            i64,
    pub confirmed:          i64,
    pub expired:            i64,
}

/// One transaction joined with everything the CSV export reports.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    pub snapshot:      TransactionSnapshot,
    pub date_joined:   Timestamp,
    pub risk_score:    Option<u32>,
    pub is_flagged:    Option<bool>,
    /// `None` when no hold was ever created.
    pub was_confirmed: Option<bool>,
}

const TRANSACTION_COLUMNS: &str =
    "t.transaction_id, t.user_id, t.order_total, t.confirmed_location, t.registration_location,
     t.shipping_address, t.billing_address, t.device_info, t.is_first_purchase,
     t.user_order_average, t.created_at";

const HOLD_COLUMNS: &str =
    "h.hold_id, h.transaction_id, t.user_id, h.confirmation_key, h.is_confirmed,
     h.expiry_time, h.cart_snapshot, h.created_at";

const ASSESSMENT_COLUMNS: &str = "transaction_id, is_flagged, risk_score, reasons, evaluated_at";

impl ShopStore {
    // ── Transaction records ───────────────────────────────────────

    pub fn insert_transaction_record(&self, t: &NewTransaction<'_>) -> ShopResult<TransactionId> {
        self.conn.execute(
            "INSERT INTO transaction_record (
                user_id, order_total, confirmed_location, registration_location,
                shipping_address, billing_address, device_info, is_first_purchase,
                user_order_average, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                t.user_id,
                t.order_total.to_string(),
                t.confirmed_location,
                t.registration_location,
                t.shipping_address,
                t.billing_address,
                serde_json::to_string(t.device_info)?,
                t.is_first_purchase as i32,
                t.user_order_average.to_string(),
                t.created_at.timestamp_millis(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_transaction_record(
        &self,
        transaction_id: TransactionId,
    ) -> ShopResult<Option<TransactionSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transaction_record t
                     WHERE t.transaction_id = ?1"
                ),
                params![transaction_id],
                |row| transaction_from_row(row, 0),
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn transaction_count(&self) -> ShopResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM transaction_record", [], |row| row.get(0))?;
        Ok(n)
    }

    // ── Risk assessments ──────────────────────────────────────────

    pub fn insert_risk_assessment(&self, transaction_id: TransactionId) -> ShopResult<()> {
        self.conn.execute(
            "INSERT INTO risk_assessment (transaction_id, is_flagged, risk_score, reasons)
             VALUES (?1, 0, 0, '[]')",
            params![transaction_id],
        )?;
        Ok(())
    }

    pub fn get_risk_assessment(
        &self,
        transaction_id: TransactionId,
    ) -> ShopResult<Option<RiskAssessment>> {
        let assessment = self
            .conn
            .query_row(
                &format!("SELECT {ASSESSMENT_COLUMNS} FROM risk_assessment WHERE transaction_id = ?1"),
                params![transaction_id],
                assessment_from_row,
            )
            .optional()?;
        Ok(assessment)
    }

    /// Write the engine's result. Returns false when the assessment was
    /// already frozen by an earlier evaluation.
    pub fn finalize_risk_assessment(&self, a: &RiskAssessment) -> ShopResult<bool> {
        let evaluated_at = a
            .evaluated_at
            .ok_or_else(|| ShopError::Validation("assessment has no evaluation time".into()))?;
        let changed = self.conn.execute(
            "UPDATE risk_assessment
             SET is_flagged = ?1, risk_score = ?2, reasons = ?3, evaluated_at = ?4
             WHERE transaction_id = ?5 AND evaluated_at IS NULL",
            params![
                a.is_flagged as i32,
                a.risk_score,
                serde_json::to_string(&a.reasons)?,
                evaluated_at.timestamp_millis(),
                a.transaction_id,
            ],
        )?;
        Ok(changed == 1)
    }

    /// Most recently evaluated flagged assessments first.
    pub fn recent_flagged_assessments(&self, limit: usize) -> ShopResult<Vec<RiskAssessment>> {
        self.flagged_assessments_limited(limit as i64)
    }

    pub fn flagged_assessments(&self) -> ShopResult<Vec<RiskAssessment>> {
        // SQLite treats a negative LIMIT as no limit.
        self.flagged_assessments_limited(-1)
    }

    fn flagged_assessments_limited(&self, limit: i64) -> ShopResult<Vec<RiskAssessment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM risk_assessment
             WHERE is_flagged = 1
             ORDER BY evaluated_at DESC, transaction_id DESC
             LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit], assessment_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Verification holds ────────────────────────────────────────

    pub fn insert_verification_hold(
        &self,
        transaction_id: TransactionId,
        confirmation_key: Uuid,
        expiry_time: Timestamp,
        cart_snapshot: &CartSnapshot,
        created_at: Timestamp,
    ) -> ShopResult<i64> {
        self.conn.execute(
            "INSERT INTO verification_hold (
                transaction_id, confirmation_key, is_confirmed, expiry_time, cart_snapshot, created_at
            ) VALUES (?1, ?2, 0, ?3, ?4, ?5)",
            params![
                transaction_id,
                confirmation_key.to_string(),
                expiry_time.timestamp_millis(),
                serde_json::to_string(cart_snapshot)?,
                created_at.timestamp_millis(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_hold_by_key(&self, confirmation_key: &Uuid) -> ShopResult<Option<VerificationHold>> {
        let hold = self
            .conn
            .query_row(
                &format!(
                    "SELECT {HOLD_COLUMNS} FROM verification_hold h
                     JOIN transaction_record t ON t.transaction_id = h.transaction_id
                     WHERE h.confirmation_key = ?1"
                ),
                params![confirmation_key.to_string()],
                hold_from_row,
            )
            .optional()?;
        Ok(hold)
    }

    /// The user's newest hold that is still unconfirmed and inside its window.
    pub fn pending_hold_for_user(
        &self,
        user_id: UserId,
        now: Timestamp,
    ) -> ShopResult<Option<VerificationHold>> {
        let hold = self
            .conn
            .query_row(
                &format!(
                    "SELECT {HOLD_COLUMNS} FROM verification_hold h
                     JOIN transaction_record t ON t.transaction_id = h.transaction_id
                     WHERE t.user_id = ?1 AND h.is_confirmed = 0 AND h.expiry_time > ?2
                     ORDER BY h.hold_id DESC
                     LIMIT 1"
                ),
                params![user_id, now.timestamp_millis()],
                hold_from_row,
            )
            .optional()?;
        Ok(hold)
    }

    /// Flip the one-way confirmation latch. Returns false when the hold
    /// was already confirmed.
    pub fn latch_hold_confirmed(&self, hold_id: i64) -> ShopResult<bool> {
        let changed = self.conn.execute(
            "UPDATE verification_hold SET is_confirmed = 1 WHERE hold_id = ?1 AND is_confirmed = 0",
            params![hold_id],
        )?;
        Ok(changed == 1)
    }

    pub fn set_hold_expiry(&self, hold_id: i64, expiry_time: Timestamp) -> ShopResult<()> {
        self.conn.execute(
            "UPDATE verification_hold SET expiry_time = ?1 WHERE hold_id = ?2",
            params![expiry_time.timestamp_millis(), hold_id],
        )?;
        Ok(())
    }

    /// Unconfirmed holds still inside their window, soonest expiry first.
    pub fn pending_holds(&self, now: Timestamp, limit: usize) -> ShopResult<Vec<VerificationHold>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HOLD_COLUMNS} FROM verification_hold h
             JOIN transaction_record t ON t.transaction_id = h.transaction_id
             WHERE h.is_confirmed = 0 AND h.expiry_time > ?1
             ORDER BY h.expiry_time ASC, h.hold_id ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![now.timestamp_millis(), limit as i64], hold_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Unconfirmed holds whose window has closed.
    pub fn expired_pending_holds(&self, now: Timestamp) -> ShopResult<Vec<VerificationHold>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {HOLD_COLUMNS} FROM verification_hold h
             JOIN transaction_record t ON t.transaction_id = h.transaction_id
             WHERE h.is_confirmed = 0 AND h.expiry_time <= ?1
             ORDER BY h.expiry_time ASC, h.hold_id ASC"
        ))?;
        let rows = stmt
            .query_map(params![now.timestamp_millis()], hold_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Reporting ─────────────────────────────────────────────────

    pub fn dashboard_counts(&self, now: Timestamp) -> ShopResult<DashboardCounts> {
        let counts = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM transaction_record),
                (SELECT COUNT(*) FROM risk_assessment WHERE is_flagged = 1),
                (SELECT COUNT(*) FROM verification_hold WHERE is_confirmed = 1),
                (SELECT COUNT(*) FROM verification_hold WHERE is_confirmed = 0 AND expiry_time <= ?1)",
            params![now.timestamp_millis()],
            |row| {
                Ok(DashboardCounts {
                    total_transactions: row.get(0)?,
                    flagged: row.get(1)?,
                    confirmed: row.get(2)?,
                    expired: row.get(3)?,
                })
            },
        )?;
        Ok(counts)
    }

    /// Every transaction, oldest first, joined for export.
    pub fn export_rows(&self) -> ShopResult<Vec<ExportRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS}, c.date_joined, r.risk_score, r.is_flagged, h.is_confirmed
             FROM transaction_record t
             JOIN customer c ON c.user_id = t.user_id
             LEFT JOIN risk_assessment r ON r.transaction_id = t.transaction_id
             LEFT JOIN verification_hold h ON h.transaction_id = t.transaction_id
             ORDER BY t.transaction_id ASC"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ExportRow {
                    snapshot: transaction_from_row(row, 0)?,
                    date_joined: ts_col(row, 11)?,
                    risk_score: row.get(12)?,
                    is_flagged: row.get::<_, Option<i32>>(13)?.map(|f| f != 0),
                    was_confirmed: row.get::<_, Option<i32>>(14)?.map(|c| c != 0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn transaction_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<TransactionSnapshot> {
    Ok(TransactionSnapshot {
        transaction_id: row.get(base)?,
        user_id: row.get(base + 1)?,
        order_total: dec_col(row, base + 2)?,
        confirmed_location: row.get(base + 3)?,
        registration_location: row.get(base + 4)?,
        shipping_address: row.get(base + 5)?,
        billing_address: row.get(base + 6)?,
        device_info: json_col(row, base + 7)?,
        is_first_purchase: row.get::<_, i32>(base + 8)? != 0,
        user_order_average: dec_col(row, base + 9)?,
        created_at: ts_col(row, base + 10)?,
    })
}

fn assessment_from_row(row: &Row<'_>) -> rusqlite::Result<RiskAssessment> {
    Ok(RiskAssessment {
        transaction_id: row.get(0)?,
        is_flagged: row.get::<_, i32>(1)? != 0,
        risk_score: row.get(2)?,
        reasons: json_col(row, 3)?,
        evaluated_at: opt_ts_col(row, 4)?,
    })
}

fn hold_from_row(row: &Row<'_>) -> rusqlite::Result<VerificationHold> {
    let key: String = row.get(3)?;
    let confirmation_key = Uuid::parse_str(&key).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(VerificationHold {
        hold_id: row.get(0)?,
        transaction_id: row.get(1)?,
        user_id: row.get(2)?,
        confirmation_key,
        is_confirmed: row.get::<_, i32>(4)? != 0,
        expiry_time: ts_col(row, 5)?,
        cart_snapshot: json_col(row, 6)?,
        created_at: ts_col(row, 7)?,
    })
}
