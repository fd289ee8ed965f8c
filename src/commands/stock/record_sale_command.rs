use crate::{
    commands::{Command, LowStockAlert},
    db::DbPool,
    entities::stock_movement::MovementKind,
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::{batches, stock, units},
};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{TransactionError, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    static ref SALES_RECORDED: IntCounter = IntCounter::new(
        "sales_recorded_total",
        "Total number of sales recorded against the ledger"
    )
    .expect("metric can be created");
    static ref SALE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("sale_failures_total", "Total number of failed sales"),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// One sold line, in the unit it was rung up in.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaleLineInput {
    pub product_id: i64,
    pub unit_id: i64,
    #[validate(custom = "crate::commands::validate_movement_quantity")]
    pub quantity: Decimal,
}

/// Deducts a completed sale from the ledger: branch and global totals
/// down, batches consumed in FIFO/expiry order. All lines succeed or
/// none do.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RecordSaleCommand {
    /// Defaults to the main branch when absent.
    pub branch_id: Option<i32>,
    /// External receipt number, when the till supplies one.
    #[validate(length(max = 64))]
    pub reference: Option<String>,
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<SaleLineInput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordSaleResult {
    pub sale_id: Uuid,
    pub branch_id: i32,
    pub line_count: usize,
    /// Net base-unit quantity removed from the branch and global totals.
    pub total_base_deducted: Decimal,
    pub low_stock: Vec<LowStockAlert>,
}

#[async_trait::async_trait]
impl Command for RecordSaleCommand {
    type Result = RecordSaleResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate()
            .and_then(|_| self.lines.iter().try_for_each(|line| line.validate()))
            .map_err(|e| {
                SALE_FAILURES.with_label_values(&["validation_error"]).inc();
                let msg = format!("Invalid input: {}", e);
                error!("{}", msg);
                LedgerError::Validation(msg)
            })?;

        let db = db_pool.as_ref();
        let result = self.record_in_db(db).await.map_err(|e| {
            SALE_FAILURES.with_label_values(&[e.metric_label()]).inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        SALES_RECORDED.inc();
        Ok(result)
    }
}

impl RecordSaleCommand {
    async fn record_in_db(&self, db: &DbPool) -> Result<RecordSaleResult, LedgerError> {
        let branch_id = self.branch_id;
        let reference = self.reference.clone();
        let mut lines = self.lines.clone();
        // Products are locked in ascending id order.
        lines.sort_by_key(|l| (l.product_id, l.unit_id));

        db.transaction::<_, RecordSaleResult, LedgerError>(|txn| {
            Box::pin(async move {
                let branch = stock::resolve_branch(txn, branch_id).await?;
                let sale_id = Uuid::new_v4();
                let reference_id = reference.unwrap_or_else(|| sale_id.to_string());

                let mut total_base = Decimal::ZERO;
                let mut low_stock = Vec::new();

                for line in &lines {
                    let product = stock::lock_active_product(txn, line.product_id).await?;
                    let unit = units::resolve_unit(txn, line.product_id, line.unit_id).await?;
                    let base_quantity = unit.to_base(line.quantity);

                    let branch_stock =
                        stock::lock_or_create_branch_stock(txn, branch.id, line.product_id)
                            .await?;
                    let updated_stock =
                        stock::apply_branch_delta(txn, branch_stock, -base_quantity).await?;

                    let available = batches::lock_available_batches(txn, line.product_id).await?;
                    let plan =
                        batches::plan_consumption(line.product_id, &available, base_quantity)?;
                    batches::apply_consumption(txn, &available, &plan).await?;

                    for draw in &plan.draws {
                        stock::record_movement(
                            txn,
                            line.product_id,
                            Some(branch.id),
                            Some(draw.batch_id),
                            -draw.draw_base,
                            MovementKind::Sale,
                            "sale",
                            reference_id.clone(),
                        )
                        .await?;
                    }

                    let updated_product =
                        stock::apply_global_delta(txn, product, -base_quantity).await?;

                    if let Some(minimum) = stock::low_stock_breach(&updated_stock, &updated_product)
                    {
                        // A product repeated across lines alerts once, at its final level.
                        low_stock.retain(|a: &LowStockAlert| a.product_id != line.product_id);
                        low_stock.push(LowStockAlert {
                            product_id: line.product_id,
                            branch_id: branch.id,
                            quantity: updated_stock.quantity,
                            minimum,
                        });
                    }

                    total_base += base_quantity;
                }

                Ok(RecordSaleResult {
                    sale_id,
                    branch_id: branch.id,
                    line_count: lines.len(),
                    total_base_deducted: total_base,
                    low_stock,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for sale: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &RecordSaleResult,
    ) -> Result<(), LedgerError> {
        info!(
            sale_id = %result.sale_id,
            branch_id = %result.branch_id,
            line_count = %result.line_count,
            total_base_deducted = %result.total_base_deducted,
            "Sale recorded"
        );

        event_sender
            .send(LedgerEvent::SaleRecorded {
                sale_id: result.sale_id,
                branch_id: result.branch_id,
                line_count: result.line_count,
            })
            .await
            .map_err(|e| {
                SALE_FAILURES.with_label_values(&["event_error"]).inc();
                let msg = format!("Failed to send event for sale: {}", e);
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
                .map_err(LedgerError::Event)?;
        }

        Ok(())
    }
}
