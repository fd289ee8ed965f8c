use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::Serialize;

/// Every failure a ledger operation can surface. Any error aborts the
/// enclosing transaction; nothing is downgraded to partial success.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The deficit is carried so callers can show requested vs available.
    /// Quantities are in base units.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: Decimal,
        available: Decimal,
    },

    /// Concurrent writers collided and retries ran out, or an
    /// idempotency key is still being processed by another worker.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The ledger's representations diverged for a product. Callers
    /// should suspend writes to it until it has been reconciled.
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Event error: {0}")]
    Event(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<validator::ValidationErrors> for LedgerError {
    fn from(err: validator::ValidationErrors) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl LedgerError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        LedgerError::Database(error.into_db_err())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        LedgerError::NotFound(what.into())
    }

    pub fn insufficient_stock(product_id: i64, requested: Decimal, available: Decimal) -> Self {
        LedgerError::InsufficientStock {
            product_id,
            requested,
            available,
        }
    }

    /// Stable label for failure-counter metrics.
    pub fn metric_label(&self) -> &'static str {
        match self {
            LedgerError::Database(_) => "database_error",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Validation(_) => "validation_error",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::Integrity(_) => "integrity_error",
            LedgerError::Event(_) => "event_error",
            LedgerError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether a retry of the whole movement could succeed. Covers the
    /// driver-level collision shapes seen under row locking: Postgres
    /// deadlock/serialization failures and SQLite's busy handler.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Database(db_err) => {
                let msg = db_err.to_string().to_lowercase();
                msg.contains("deadlock")
                    || msg.contains("serialization")
                    || msg.contains("could not serialize")
                    || msg.contains("database is locked")
                    || msg.contains("lock timeout")
            }
            _ => false,
        }
    }
}
