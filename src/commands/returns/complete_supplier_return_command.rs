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
    static ref SUPPLIER_RETURNS_COMPLETED: IntCounter = IntCounter::new(
        "supplier_returns_completed_total",
        "Total number of supplier returns completed"
    )
    .expect("metric can be created");
    static ref SUPPLIER_RETURN_COMPLETE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "supplier_return_complete_failures_total",
            "Total number of failed supplier return completions"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Completes a draft supplier return.
///
/// The deduction happens here, not at draft time: the named batch, the
/// branch row and the global total all drop by the drafted quantity.
/// The product's active flag is not checked, a return drafted before
/// deactivation must still be able to leave.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CompleteSupplierReturnCommand {
    pub return_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteSupplierReturnResult {
    pub return_id: i64,
    pub batch_id: i64,
    pub branch_id: i32,
    pub quantity_base: Decimal,
    pub completed_at: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for CompleteSupplierReturnCommand {
    type Result = CompleteSupplierReturnResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            SUPPLIER_RETURN_COMPLETE_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.complete_in_db(db).await.map_err(|e| {
            SUPPLIER_RETURN_COMPLETE_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        SUPPLIER_RETURNS_COMPLETED.inc();
        Ok(result)
    }
}

impl CompleteSupplierReturnCommand {
    async fn complete_in_db(
        &self,
        db: &DbPool,
    ) -> Result<CompleteSupplierReturnResult, LedgerError> {
        let return_id = self.return_id;

        db.transaction::<_, CompleteSupplierReturnResult, LedgerError>(move |txn| {
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
                if row.status != SupplierReturnStatus::Draft {
                    return Err(LedgerError::Conflict(format!(
                        "Supplier return {} cannot be completed from status {}",
                        return_id, row.status
                    )));
                }

                let product_id = batches::get_batch(txn, row.batch_id).await?.product_id;
                let product = stock::lock_product(txn, product_id).await?;
                let branch_stock =
                    stock::lock_or_create_branch_stock(txn, row.branch_id, product_id).await?;
                let batch = batches::lock_batch(txn, row.batch_id).await?;

                let quantity_base = row.quantity * batch.conversion_factor;
                stock::apply_branch_delta(txn, branch_stock, -quantity_base).await?;
                batches::draw_from_batch(txn, &batch, quantity_base).await?;
                stock::apply_global_delta(txn, product, -quantity_base).await?;
                stock::record_movement(
                    txn,
                    product_id,
                    Some(row.branch_id),
                    Some(batch.id),
                    -quantity_base,
                    MovementKind::SupplierReturn,
                    "supplier_return",
                    return_id.to_string(),
                )
                .await?;

                let now = Utc::now();
                supplier_return::ActiveModel {
                    id: Set(row.id),
                    status: Set(SupplierReturnStatus::Completed),
                    completed_at: Set(Some(now)),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .update(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(CompleteSupplierReturnResult {
                    return_id,
                    batch_id: batch.id,
                    branch_id: row.branch_id,
                    quantity_base,
                    completed_at: now,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for supplier return completion: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &CompleteSupplierReturnResult,
    ) -> Result<(), LedgerError> {
        info!(
            return_id = %result.return_id,
            batch_id = %result.batch_id,
            branch_id = %result.branch_id,
            quantity_base = %result.quantity_base,
            "Supplier return completed"
        );
        event_sender
            .send(LedgerEvent::SupplierReturnCompleted {
                return_id: result.return_id,
                batch_id: result.batch_id,
            })
            .await
            .map_err(|e| {
                SUPPLIER_RETURN_COMPLETE_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for supplier return completion: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
