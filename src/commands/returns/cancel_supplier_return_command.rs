use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        stock_movement::MovementKind,
        supplier_return::{self, Entity as SupplierReturn, SupplierReturnStatus},
    },
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::{batches, stock},
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QuerySelect, Set, TransactionError,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use validator::Validate;

lazy_static! {
    static ref SUPPLIER_RETURNS_CANCELLED: IntCounter = IntCounter::new(
        "supplier_returns_cancelled_total",
        "Total number of supplier returns cancelled"
    )
    .expect("metric can be created");
    static ref SUPPLIER_RETURN_CANCEL_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "supplier_return_cancel_failures_total",
            "Total number of failed supplier return cancellations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Cancels a supplier return.
///
/// A draft never deducted anything and just flips status. Cancelling a
/// completed return puts the quantity back where it came from: the same
/// batch, branch row and global total.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CancelSupplierReturnCommand {
    pub return_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelSupplierReturnResult {
    pub return_id: i64,
    pub previous_status: SupplierReturnStatus,
    pub restored_base: Decimal,
    pub cancelled_at: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for CancelSupplierReturnCommand {
    type Result = CancelSupplierReturnResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            SUPPLIER_RETURN_CANCEL_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.cancel_in_db(db).await.map_err(|e| {
            SUPPLIER_RETURN_CANCEL_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        SUPPLIER_RETURNS_CANCELLED.inc();
        Ok(result)
    }
}

impl CancelSupplierReturnCommand {
    async fn cancel_in_db(&self, db: &DbPool) -> Result<CancelSupplierReturnResult, LedgerError> {
        let return_id = self.return_id;

        db.transaction::<_, CancelSupplierReturnResult, LedgerError>(move |txn| {
            Box::pin(async move {
                let row = SupplierReturn::find()
                    .filter(supplier_return::Column::Id.eq(return_id))
                    .lock_exclusive()
                    .one(txn)
                    .await
                    .map_err(LedgerError::db_error)?
                    .ok_or_else(|| {
                        LedgerError::NotFound(format!("Supplier return {} not found", return_id))
                    })?;
                let previous_status = row.status;
                if !matches!(
                    previous_status,
                    SupplierReturnStatus::Draft | SupplierReturnStatus::Completed
                ) {
                    return Err(LedgerError::Conflict(format!(
                        "Supplier return {} cannot be cancelled from status {}",
                        return_id, previous_status
                    )));
                }

                let now = Utc::now();
                let mut restored_base = Decimal::ZERO;

                if previous_status == SupplierReturnStatus::Completed {
                    let product_id = batches::get_batch(txn, row.batch_id).await?.product_id;
                    let product = stock::lock_product(txn, product_id).await?;
                    let branch_stock =
                        stock::lock_or_create_branch_stock(txn, row.branch_id, product_id).await?;
                    let batch = batches::lock_batch(txn, row.batch_id).await?;

                    restored_base = row.quantity * batch.conversion_factor;
                    batches::restore_to_batch(txn, &batch, restored_base).await?;
                    stock::apply_branch_delta(txn, branch_stock, restored_base).await?;
                    stock::apply_global_delta(txn, product, restored_base).await?;
                    stock::record_movement(
                        txn,
                        product_id,
                        Some(row.branch_id),
                        Some(batch.id),
                        restored_base,
                        MovementKind::SupplierReturnReversal,
                        "supplier_return",
                        return_id.to_string(),
                    )
                    .await?;
                }

                supplier_return::ActiveModel {
                    id: Set(row.id),
                    status: Set(SupplierReturnStatus::Cancelled),
                    cancelled_at: Set(Some(now)),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .update(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(CancelSupplierReturnResult {
                    return_id,
                    previous_status,
                    restored_base,
                    cancelled_at: now,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for supplier return cancellation: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &CancelSupplierReturnResult,
    ) -> Result<(), LedgerError> {
        info!(
            return_id = %result.return_id,
            previous_status = %result.previous_status,
            restored_base = %result.restored_base,
            "Supplier return cancelled"
        );
        event_sender
            .send(LedgerEvent::SupplierReturnCancelled {
                return_id: result.return_id,
            })
            .await
            .map_err(|e| {
                SUPPLIER_RETURN_CANCEL_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!(
                    "Failed to send event for supplier return cancellation: {}",
                    e
                );
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
