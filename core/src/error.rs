use crate::types::ProductId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    #[error("Not permitted: {0}")]
    Forbidden(String),

    #[error("Confirmation window for '{key}' has expired")]
    Expired { key: String },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested:  i64,
        available:  i64,
    },

    #[error("A checkout is already in progress for cart {cart_id}")]
    CheckoutInProgress { cart_id: i64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ShopError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound { entity, key: key.to_string() }
    }

    /// Storage-level failures that abort the enclosing atomic unit.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Serialization(_) | Self::Io(_))
    }
}

pub type ShopResult<T> = Result<T, ShopError>;
