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
    static ref TRANSFERS_RECEIVED: IntCounter = IntCounter::new(
        "transfers_received_total",
        "Total number of stock transfers received"
    )
    .expect("metric can be created");
    static ref TRANSFER_RECEIVE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "transfer_receive_failures_total",
            "Total number of failed transfer receipts"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Receives a shipped transfer at the destination branch.
///
/// Every approved quantity lands at the destination. The product's
/// active flag is not checked here: stock already in transit must be
/// allowed to arrive even when the product was deactivated after the
/// shipment left.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ReceiveTransferCommand {
    pub transfer_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiveTransferResult {
    pub transfer_id: i64,
    pub from_branch_id: i32,
    pub to_branch_id: i32,
    pub line_count: usize,
    pub total_base_received: Decimal,
    pub received_at: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for ReceiveTransferCommand {
    type Result = ReceiveTransferResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            TRANSFER_RECEIVE_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.receive_in_db(db).await.map_err(|e| {
            TRANSFER_RECEIVE_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        TRANSFERS_RECEIVED.inc();
        Ok(result)
    }
}

impl ReceiveTransferCommand {
    async fn receive_in_db(&self, db: &DbPool) -> Result<ReceiveTransferResult, LedgerError> {
        let transfer_id = self.transfer_id;

        db.transaction::<_, ReceiveTransferResult, LedgerError>(move |txn| {
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
                if transfer.status != TransferStatus::Shipped {
                    return Err(LedgerError::Conflict(format!(
                        "Transfer {} cannot be received from status {}",
                        transfer_id, transfer.status
                    )));
                }

                let lines = StockTransferLine::find()
                    .filter(stock_transfer_line::Column::TransferId.eq(transfer_id))
                    .order_by_asc(stock_transfer_line::Column::ProductId)
                    .order_by_asc(stock_transfer_line::Column::UnitId)
                    .all(txn)
                    .await
                    .map_err(LedgerError::db_error)?;

                let now = Utc::now();
                let mut total_base_received = Decimal::ZERO;

                for line in lines.iter() {
                    let approved = line.approved_quantity.ok_or_else(|| {
                        LedgerError::Integrity(format!(
                            "Line {} of shipped transfer {} has no approved quantity",
                            line.id, transfer_id
                        ))
                    })?;

                    stock::lock_product(txn, line.product_id).await?;
                    let (_source, dest) = stock::lock_branch_stock_pair(
                        txn,
                        line.product_id,
                        transfer.from_branch_id,
                        transfer.to_branch_id,
                    )
                    .await?;

                    let base_quantity = approved * line.conversion_factor;
                    stock::apply_branch_delta(txn, dest, base_quantity).await?;
                    stock::record_movement(
                        txn,
                        line.product_id,
                        Some(transfer.to_branch_id),
                        None,
                        base_quantity,
                        MovementKind::TransferIn,
                        "transfer",
                        transfer_id.to_string(),
                    )
                    .await?;

                    stock_transfer_line::ActiveModel {
                        id: Set(line.id),
                        received_quantity: Set(Some(approved)),
                        ..Default::default()
                    }
                    .update(txn)
                    .await
                    .map_err(LedgerError::db_error)?;

                    total_base_received += base_quantity;
                }

                stock_transfer::ActiveModel {
                    id: Set(transfer.id),
                    status: Set(TransferStatus::Received),
                    received_at: Set(Some(now)),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .update(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(ReceiveTransferResult {
                    transfer_id,
                    from_branch_id: transfer.from_branch_id,
                    to_branch_id: transfer.to_branch_id,
                    line_count: lines.len(),
                    total_base_received,
                    received_at: now,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for transfer receipt: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &ReceiveTransferResult,
    ) -> Result<(), LedgerError> {
        info!(
            transfer_id = %result.transfer_id,
            to_branch_id = %result.to_branch_id,
            total_base_received = %result.total_base_received,
            "Transfer received"
        );
        event_sender
            .send(LedgerEvent::TransferReceived {
                transfer_id: result.transfer_id,
            })
            .await
            .map_err(|e| {
                TRANSFER_RECEIVE_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for transfer receipt: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
