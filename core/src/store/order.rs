use super::{dec_col, ts_col, ShopStore};
use crate::{
    error::{ShopError, ShopResult},
    order::{NewOrderItem, Order, OrderItem, OrderStatus},
    types::{OrderId, Timestamp, UserId},
};
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension};

impl ShopStore {
    // ── Orders ────────────────────────────────────────────────────

    pub fn insert_order(
        &self,
        user_id: UserId,
        status: OrderStatus,
        total_price: Decimal,
        at: Timestamp,
    ) -> ShopResult<OrderId> {
        self.conn.execute(
            "INSERT INTO orders (user_id, order_date, status, total_price, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?2)",
            params![user_id, at.timestamp_millis(), status.as_str(), total_price.to_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_order_item(&self, order_id: OrderId, item: &NewOrderItem) -> ShopResult<i64> {
        self.conn.execute(
            "INSERT INTO order_item (order_id, product_id, product_name, product_price, quantity)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                order_id,
                item.product_id,
                item.product_name,
                item.product_price.to_string(),
                item.quantity,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_order(&self, order_id: OrderId) -> ShopResult<Option<Order>> {
        let header = self
            .conn
            .query_row(
                "SELECT order_id, user_id, order_date, status, total_price, updated_at
                 FROM orders WHERE order_id = ?1",
                params![order_id],
                |row| {
                    Ok((
                        row.get::<_, OrderId>(0)?,
                        row.get::<_, UserId>(1)?,
                        ts_col(row, 2)?,
                        row.get::<_, String>(3)?,
                        dec_col(row, 4)?,
                        ts_col(row, 5)?,
                    ))
                },
            )
            .optional()?;
        let Some((order_id, user_id, order_date, status, total_price, updated_at)) = header else {
            return Ok(None);
        };

        Ok(Some(Order {
            order_id,
            user_id,
            order_date,
            status: parse_status(&status)?,
            total_price,
            updated_at,
            items: self.order_items(order_id)?,
        }))
    }

    fn order_items(&self, order_id: OrderId) -> ShopResult<Vec<OrderItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT order_item_id, product_id, product_name, product_price, quantity
             FROM order_item WHERE order_id = ?1
             ORDER BY order_item_id ASC",
        )?;
        let items = stmt
            .query_map(params![order_id], |row| {
                Ok(OrderItem {
                    order_item_id: row.get(0)?,
                    product_id: row.get(1)?,
                    product_name: row.get(2)?,
                    product_price: dec_col(row, 3)?,
                    quantity: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Newest first.
    pub fn orders_for_user(&self, user_id: UserId) -> ShopResult<Vec<Order>> {
        let ids = {
            let mut stmt = self.conn.prepare(
                "SELECT order_id FROM orders WHERE user_id = ?1
                 ORDER BY order_date DESC, order_id DESC",
            )?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get::<_, OrderId>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = self.get_order(id)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    /// Set a new status. Returns the previous one.
    pub fn update_order_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        at: Timestamp,
    ) -> ShopResult<OrderStatus> {
        let old: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM orders WHERE order_id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()?;
        let old = old.ok_or_else(|| ShopError::not_found("order", order_id))?;
        self.conn.execute(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE order_id = ?3",
            params![status.as_str(), at.timestamp_millis(), order_id],
        )?;
        parse_status(&old)
    }

    // ── Order history aggregates ──────────────────────────────────

    /// Totals of every order the user has, any status.
    pub fn order_totals_for_user(&self, user_id: UserId) -> ShopResult<Vec<Decimal>> {
        let mut stmt = self
            .conn
            .prepare("SELECT total_price FROM orders WHERE user_id = ?1")?;
        let totals = stmt
            .query_map(params![user_id], |row| dec_col(row, 0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(totals)
    }

    pub fn count_orders_since(&self, user_id: UserId, since: Timestamp) -> ShopResult<i64> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE user_id = ?1 AND order_date >= ?2",
            params![user_id, since.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn order_count(&self) -> ShopResult<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?;
        Ok(n)
    }
}

fn parse_status(text: &str) -> ShopResult<OrderStatus> {
    text.parse::<OrderStatus>()
        .map_err(|e| ShopError::Other(anyhow::anyhow!(e)))
}
