use super::{dec_col, ts_col, ShopStore};
use crate::{
    catalog::{Cart, CartLine, Customer, Product},
    error::{ShopError, ShopResult},
    types::{CartId, ProductId, Timestamp, UserId},
};
use rust_decimal::Decimal;
use rusqlite::{params, OptionalExtension};

impl ShopStore {
    // ── Customer ──────────────────────────────────────────────────

    pub fn insert_customer(
        &self,
        username: &str,
        location: &str,
        date_joined: Timestamp,
        is_staff: bool,
    ) -> ShopResult<UserId> {
        self.conn.execute(
            "INSERT INTO customer (username, location, date_joined, is_staff)
             VALUES (?1, ?2, ?3, ?4)",
            params![username, location, date_joined.timestamp_millis(), is_staff as i32],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_customer(&self, user_id: UserId) -> ShopResult<Option<Customer>> {
        let customer = self
            .conn
            .query_row(
                "SELECT user_id, username, location, date_joined, is_staff
                 FROM customer WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Customer {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        location: row.get(2)?,
                        date_joined: ts_col(row, 3)?,
                        is_staff: row.get::<_, i32>(4)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(customer)
    }

    // ── Product ───────────────────────────────────────────────────

    pub fn insert_product(&self, name: &str, price: Decimal, stock: i64) -> ShopResult<ProductId> {
        self.conn.execute(
            "INSERT INTO product (name, price, stock) VALUES (?1, ?2, ?3)",
            params![name, price.to_string(), stock],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_product(&self, product_id: ProductId) -> ShopResult<Option<Product>> {
        let product = self
            .conn
            .query_row(
                "SELECT product_id, name, price, stock FROM product WHERE product_id = ?1",
                params![product_id],
                |row| {
                    Ok(Product {
                        product_id: row.get(0)?,
                        name: row.get(1)?,
                        price: dec_col(row, 2)?,
                        stock: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(product)
    }

    /// Take `quantity` units out of stock. Fails without writing when the
    /// product is unknown or holds fewer units than requested.
    pub fn decrement_stock(&self, product_id: ProductId, quantity: i64) -> ShopResult<()> {
        let changed = self.conn.execute(
            "UPDATE product SET stock = stock - ?1 WHERE product_id = ?2 AND stock >= ?1",
            params![quantity, product_id],
        )?;
        if changed == 1 {
            return Ok(());
        }
        match self.get_product(product_id)? {
            Some(p) => Err(ShopError::InsufficientStock {
                product_id,
                requested: quantity,
                available: p.stock,
            }),
            None => Err(ShopError::not_found("product", product_id)),
        }
    }

    // ── Cart ──────────────────────────────────────────────────────

    pub fn create_cart(&self, user_id: UserId, at: Timestamp) -> ShopResult<CartId> {
        self.conn.execute(
            "INSERT INTO cart (user_id, created_at) VALUES (?1, ?2)",
            params![user_id, at.timestamp_millis()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn add_cart_item(
        &self,
        cart_id: CartId,
        product_id: ProductId,
        quantity: i64,
    ) -> ShopResult<i64> {
        self.conn.execute(
            "INSERT INTO cart_item (cart_id, product_id, quantity) VALUES (?1, ?2, ?3)",
            params![cart_id, product_id, quantity],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn cart_id_for_user(&self, user_id: UserId) -> ShopResult<Option<CartId>> {
        let cart_id = self
            .conn
            .query_row(
                "SELECT cart_id FROM cart WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cart_id)
    }

    /// The user's cart with lines priced from the live catalog.
    pub fn cart_for_user(&self, user_id: UserId) -> ShopResult<Option<Cart>> {
        let Some(cart_id) = self.cart_id_for_user(user_id)? else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT ci.cart_item_id, ci.product_id, p.name, p.price, ci.quantity
             FROM cart_item ci
             JOIN product p ON p.product_id = ci.product_id
             WHERE ci.cart_id = ?1
             ORDER BY ci.cart_item_id ASC",
        )?;
        let lines = stmt
            .query_map(params![cart_id], |row| {
                Ok(CartLine {
                    cart_item_id: row.get(0)?,
                    product_id: row.get(1)?,
                    product_name: row.get(2)?,
                    unit_price: dec_col(row, 3)?,
                    quantity: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Cart { cart_id, user_id, lines }))
    }

    pub fn clear_cart(&self, cart_id: CartId) -> ShopResult<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM cart_item WHERE cart_id = ?1", params![cart_id])?;
        Ok(removed)
    }
}
