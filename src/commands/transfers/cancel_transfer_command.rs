use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        stock_movement::MovementKind,
        stock_transfer::{self, Entity as StockTransfer, TransferStatus},
        stock_transfer_line::{self, Entity as StockTransferLine},
    },
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::stock,
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use validator::Validate;

lazy_static! {
    static ref TRANSFERS_CANCELLED: IntCounter = IntCounter::new(
        "transfers_cancelled_total",
        "Total number of stock transfers cancelled"
    )
    .expect("metric can be created");
    static ref TRANSFER_CANCEL_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "transfer_cancel_failures_total",
            "Total number of failed transfer cancellations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Cancels a pending or shipped transfer.
///
/// A pending transfer never moved stock, so cancelling it only flips
/// the status. Cancelling a shipped transfer returns the in-transit
/// quantity to the source branch. A received transfer cannot be
/// cancelled.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CancelTransferCommand {
    pub transfer_id: i64,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelTransferResult {
    pub transfer_id: i64,
    pub previous_status: TransferStatus,
    pub restored_base: Decimal,
    pub cancelled_at: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for CancelTransferCommand {
    type Result = CancelTransferResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            TRANSFER_CANCEL_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.cancel_in_db(db).await.map_err(|e| {
            TRANSFER_CANCEL_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        TRANSFERS_CANCELLED.inc();
        Ok(result)
    }
}

impl CancelTransferCommand {
    async fn cancel_in_db(&self, db: &DbPool) -> Result<CancelTransferResult, LedgerError> {
        let transfer_id = self.transfer_id;

        db.transaction::<_, CancelTransferResult, LedgerError>(move |txn| {
            Box::pin(async move {
                let transfer = StockTransfer::find()
                    .filter(stock_transfer::Column::Id.eq(transfer_id))
                    .lock_exclusive()
                    .one(txn)
                    .await
                    .map_err(LedgerError::db_error)?
                    .ok_or_else(|| {
                        LedgerError::NotFound(format!("Transfer {} not found", transfer_id))
                    })?;
                let previous_status = transfer.status;
                if !matches!(
                    previous_status,
                    TransferStatus::Pending | TransferStatus::Shipped
                ) {
                    return Err(LedgerError::Conflict(format!(
                        "Transfer {} cannot be cancelled from status {}",
                        transfer_id, previous_status
                    )));
                }

                let now = Utc::now();
                let mut restored_base = Decimal::ZERO;

                if previous_status == TransferStatus::Shipped {
                    let lines = StockTransferLine::find()
                        .filter(stock_transfer_line::Column::TransferId.eq(transfer_id))
                        .order_by_asc(stock_transfer_line::Column::ProductId)
                        .order_by_asc(stock_transfer_line::Column::UnitId)
                        .all(txn)
                        .await
                        .map_err(LedgerError::db_error)?;

                    for line in lines.iter() {
                        let approved = line.approved_quantity.ok_or_else(|| {
                            LedgerError::Integrity(format!(
                                "Line {} of shipped transfer {} has no approved quantity",
                                line.id, transfer_id
                            ))
                        })?;

                        stock::lock_product(txn, line.product_id).await?;
                        let (source, _dest) = stock::lock_branch_stock_pair(
                            txn,
                            line.product_id,
                            transfer.from_branch_id,
                            transfer.to_branch_id,
                        )
                        .await?;

                        let base_quantity = approved * line.conversion_factor;
                        stock::apply_branch_delta(txn, source, base_quantity).await?;
                        stock::record_movement(
                            txn,
                            line.product_id,
                            Some(transfer.from_branch_id),
                            None,
                            base_quantity,
                            MovementKind::TransferCancel,
                            "transfer",
                            transfer_id.to_string(),
                        )
                        .await?;

                        restored_base += base_quantity;
                    }
                }

                stock_transfer::ActiveModel {
                    id: Set(transfer.id),
                    status: Set(TransferStatus::Cancelled),
                    cancelled_at: Set(Some(now)),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .update(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(CancelTransferResult {
                    transfer_id,
                    previous_status,
                    restored_base,
                    cancelled_at: now,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for transfer cancellation: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &CancelTransferResult,
    ) -> Result<(), LedgerError> {
        info!(
            transfer_id = %result.transfer_id,
            previous_status = %result.previous_status,
            restored_base = %result.restored_base,
            reason = ?self.reason,
            "Transfer cancelled"
        );
        event_sender
            .send(LedgerEvent::TransferCancelled {
                transfer_id: result.transfer_id,
            })
            .await
            .map_err(|e| {
                TRANSFER_CANCEL_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for transfer cancellation: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
