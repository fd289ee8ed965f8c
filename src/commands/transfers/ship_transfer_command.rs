use crate::{
    commands::{Command, LowStockAlert},
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
    static ref TRANSFERS_SHIPPED: IntCounter = IntCounter::new(
        "transfers_shipped_total",
        "Total number of stock transfers shipped"
    )
    .expect("metric can be created");
    static ref TRANSFER_SHIP_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "transfer_ship_failures_total",
            "Total number of failed transfer shipments"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Ships a pending transfer.
///
/// Shipping is the point where stock actually leaves the source branch:
/// every line is approved at its requested quantity and the source rows
/// are decremented under lock. Global stock is untouched, the shipped
/// quantity is in transit until the transfer is received or cancelled.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ShipTransferCommand {
    pub transfer_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ShipTransferResult {
    pub transfer_id: i64,
    pub from_branch_id: i32,
    pub to_branch_id: i32,
    pub line_count: usize,
    pub total_base_shipped: Decimal,
    pub low_stock: Vec<LowStockAlert>,
    pub shipped_at: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for ShipTransferCommand {
    type Result = ShipTransferResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            TRANSFER_SHIP_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.ship_in_db(db).await.map_err(|e| {
            TRANSFER_SHIP_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        TRANSFERS_SHIPPED.inc();
        Ok(result)
    }
}

impl ShipTransferCommand {
    async fn ship_in_db(&self, db: &DbPool) -> Result<ShipTransferResult, LedgerError> {
        let transfer_id = self.transfer_id;

        db.transaction::<_, ShipTransferResult, LedgerError>(move |txn| {
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
                if transfer.status != TransferStatus::Pending {
                    return Err(LedgerError::Conflict(format!(
                        "Transfer {} cannot be shipped from status {}",
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
                let mut total_base_shipped = Decimal::ZERO;
                let mut low_stock: Vec<LowStockAlert> = Vec::new();

                for line in lines.iter() {
                    let product = stock::lock_active_product(txn, line.product_id).await?;
                    let (source, _dest) = stock::lock_branch_stock_pair(
                        txn,
                        line.product_id,
                        transfer.from_branch_id,
                        transfer.to_branch_id,
                    )
                    .await?;

                    let base_quantity = line.requested_quantity * line.conversion_factor;
                    let updated = stock::apply_branch_delta(txn, source, -base_quantity).await?;
                    stock::record_movement(
                        txn,
                        line.product_id,
                        Some(transfer.from_branch_id),
                        None,
                        -base_quantity,
                        MovementKind::TransferOut,
                        "transfer",
                        transfer_id.to_string(),
                    )
                    .await?;

                    stock_transfer_line::ActiveModel {
                        id: Set(line.id),
                        approved_quantity: Set(Some(line.requested_quantity)),
                        ..Default::default()
                    }
                    .update(txn)
                    .await
                    .map_err(LedgerError::db_error)?;

                    total_base_shipped += base_quantity;
                    if let Some(minimum) = stock::low_stock_breach(&updated, &product) {
                        low_stock.retain(|a: &LowStockAlert| a.product_id != line.product_id);
                        low_stock.push(LowStockAlert {
                            product_id: line.product_id,
                            branch_id: transfer.from_branch_id,
                            quantity: updated.quantity,
                            minimum,
                        });
                    }
                }

                stock_transfer::ActiveModel {
                    id: Set(transfer.id),
                    status: Set(TransferStatus::Shipped),
                    shipped_at: Set(Some(now)),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .update(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(ShipTransferResult {
                    transfer_id,
                    from_branch_id: transfer.from_branch_id,
                    to_branch_id: transfer.to_branch_id,
                    line_count: lines.len(),
                    total_base_shipped,
                    low_stock,
                    shipped_at: now,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for transfer shipment: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &ShipTransferResult,
    ) -> Result<(), LedgerError> {
        info!(
            transfer_id = %result.transfer_id,
            from_branch_id = %result.from_branch_id,
            to_branch_id = %result.to_branch_id,
            total_base_shipped = %result.total_base_shipped,
            "Transfer shipped"
        );
        event_sender
            .send(LedgerEvent::TransferShipped {
                transfer_id: result.transfer_id,
            })
            .await
            .map_err(|e| {
                TRANSFER_SHIP_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for transfer shipment: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })?;

        for alert in &result.low_stock {
            event_sender
                .send(LedgerEvent::StockBelowMinimum {
                    product_id: alert.product_id,
                    branch_id: alert.branch_id,
                    quantity: alert.quantity,
                    minimum: alert.minimum,
                })
                .await
                .map_err(|e| {
                    let msg = format!("Failed to send low stock event: {}", e);
                    error!("{}", msg);
                    LedgerError::Event(msg)
                })?;
        }
        Ok(())
    }
}
