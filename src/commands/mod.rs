use crate::{db::DbPool, errors::LedgerError, events::EventSender};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use validator::ValidationError;

/// Command trait for implementing the Command Pattern
///
/// Every stock movement is one command object: validated up front,
/// executed as a single database transaction, and followed by domain
/// events once the transaction committed.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result;

    /// Execute the command with the given dependencies
    ///
    /// # Arguments
    /// * `db_pool` - Database connection pool for persistence operations
    /// * `event_sender` - Channel to publish domain events
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError>;
}

/// Branch stock that ended up under its effective minimum after a
/// deduction. Carried in command results so the emitter can raise
/// `StockBelowMinimum` after commit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LowStockAlert {
    pub product_id: i64,
    pub branch_id: i32,
    pub quantity: Decimal,
    pub minimum: Decimal,
}

/// Validator for movement quantities: strictly positive, at most two
/// decimal places so base-unit conversions stay inside the column scale.
pub fn validate_movement_quantity(quantity: &Decimal) -> Result<(), ValidationError> {
    if *quantity <= Decimal::ZERO {
        return Err(ValidationError::new("quantity_not_positive"));
    }
    if quantity.scale() > 2 {
        return Err(ValidationError::new("quantity_scale_too_fine"));
    }
    Ok(())
}

/// Validator for monetary inputs: non-negative, money scale.
pub fn validate_money(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        return Err(ValidationError::new("amount_negative"));
    }
    if amount.scale() > 2 {
        return Err(ValidationError::new("amount_scale_too_fine"));
    }
    Ok(())
}

pub mod returns;
pub mod stock;
pub mod transfers;
