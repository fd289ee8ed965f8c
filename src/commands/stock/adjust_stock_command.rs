use crate::{
    commands::{Command, LowStockAlert},
    db::DbPool,
    entities::{
        stock_batch::{self, BatchKind},
        stock_movement::MovementKind,
    },
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::{batches, stock, units},
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set, TransactionError, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

lazy_static! {
    static ref STOCK_ADJUSTMENTS: IntCounter = IntCounter::new(
        "stock_adjustments_total",
        "Total number of manual stock adjustments"
    )
    .expect("metric can be created");
    static ref STOCK_ADJUSTMENT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "stock_adjustment_failures_total",
            "Total number of failed stock adjustments"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AdjustmentDirection {
    Add,
    Subtract,
}

/// Manual stock correction (count differences, damage, found stock).
///
/// Adding creates a synthetic batch without an expiry so the total
/// stays batch-backed; subtracting consumes batches exactly like a sale.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct AdjustStockCommand {
    pub product_id: i64,
    /// Defaults to the main branch when absent.
    pub branch_id: Option<i32>,
    pub unit_id: i64,
    #[validate(custom = "crate::commands::validate_movement_quantity")]
    pub quantity: Decimal,
    pub direction: AdjustmentDirection,
    #[validate(length(min = 1, max = 200))]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustStockResult {
    pub adjustment_id: Uuid,
    pub product_id: i64,
    pub branch_id: i32,
    pub direction: AdjustmentDirection,
    pub quantity_base: Decimal,
    pub new_branch_quantity: Decimal,
    pub new_global_stock: Decimal,
    /// Batches touched: the synthetic batch on add, the drained ones on
    /// subtract.
    pub batch_ids: Vec<i64>,
    pub low_stock: Option<LowStockAlert>,
}

#[async_trait::async_trait]
impl Command for AdjustStockCommand {
    type Result = AdjustStockResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            STOCK_ADJUSTMENT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.adjust_in_db(db).await.map_err(|e| {
            STOCK_ADJUSTMENT_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        STOCK_ADJUSTMENTS.inc();
        Ok(result)
    }
}

impl AdjustStockCommand {
    async fn adjust_in_db(&self, db: &DbPool) -> Result<AdjustStockResult, LedgerError> {
        let product_id = self.product_id;
        let branch_id = self.branch_id;
        let unit_id = self.unit_id;
        let quantity = self.quantity;
        let direction = self.direction;

        db.transaction::<_, AdjustStockResult, LedgerError>(move |txn| {
            Box::pin(async move {
                let adjustment_id = Uuid::new_v4();
                let branch = stock::resolve_branch(txn, branch_id).await?;
                let product = stock::lock_active_product(txn, product_id).await?;
                let unit = units::resolve_unit(txn, product_id, unit_id).await?;
                let base_quantity = unit.to_base(quantity);

                let branch_stock =
                    stock::lock_or_create_branch_stock(txn, branch.id, product_id).await?;

                let (updated_stock, updated_product, batch_ids) = match direction {
                    AdjustmentDirection::Add => {
                        let batch = stock_batch::ActiveModel {
                            product_id: Set(product_id),
                            purchase_line_id: Set(None),
                            kind: Set(BatchKind::Adjustment),
                            unit_name: Set(unit.unit_name.clone()),
                            conversion_factor: Set(unit.factor),
                            received_quantity: Set(quantity),
                            remaining_base: Set(base_quantity),
                            expiry_date: Set(None),
                            created_at: Set(Utc::now()),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await
                        .map_err(LedgerError::db_error)?;

                        let updated_stock =
                            stock::apply_branch_delta(txn, branch_stock, base_quantity).await?;
                        let updated_product =
                            stock::apply_global_delta(txn, product, base_quantity).await?;

                        stock::record_movement(
                            txn,
                            product_id,
                            Some(branch.id),
                            Some(batch.id),
                            base_quantity,
                            MovementKind::AdjustmentAdd,
                            "adjustment",
                            adjustment_id.to_string(),
                        )
                        .await?;

                        (updated_stock, updated_product, vec![batch.id])
                    }
                    AdjustmentDirection::Subtract => {
                        let updated_stock =
                            stock::apply_branch_delta(txn, branch_stock, -base_quantity).await?;

                        let available = batches::lock_available_batches(txn, product_id).await?;
                        let plan =
                            batches::plan_consumption(product_id, &available, base_quantity)?;
                        batches::apply_consumption(txn, &available, &plan).await?;

                        let mut batch_ids = Vec::with_capacity(plan.draws.len());
                        for draw in &plan.draws {
                            batch_ids.push(draw.batch_id);
                            stock::record_movement(
                                txn,
                                product_id,
                                Some(branch.id),
                                Some(draw.batch_id),
                                -draw.draw_base,
                                MovementKind::AdjustmentSubtract,
                                "adjustment",
                                adjustment_id.to_string(),
                            )
                            .await?;
                        }

                        let updated_product =
                            stock::apply_global_delta(txn, product, -base_quantity).await?;

                        (updated_stock, updated_product, batch_ids)
                    }
                };

                // Only a decrement can newly breach the minimum.
                let low_stock = match direction {
                    AdjustmentDirection::Add => None,
                    AdjustmentDirection::Subtract => {
                        stock::low_stock_breach(&updated_stock, &updated_product).map(|minimum| {
                            LowStockAlert {
                                product_id,
                                branch_id: branch.id,
                                quantity: updated_stock.quantity,
                                minimum,
                            }
                        })
                    }
                };

                Ok(AdjustStockResult {
                    adjustment_id,
                    product_id,
                    branch_id: branch.id,
                    direction,
                    quantity_base: base_quantity,
                    new_branch_quantity: updated_stock.quantity,
                    new_global_stock: updated_product.global_stock,
                    batch_ids,
                    low_stock,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for stock adjustment: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &AdjustStockResult,
    ) -> Result<(), LedgerError> {
        info!(
            adjustment_id = %result.adjustment_id,
            product_id = %result.product_id,
            branch_id = %result.branch_id,
            direction = %result.direction,
            quantity_base = %result.quantity_base,
            reason = %self.reason,
            "Stock adjusted"
        );

        let signed = match result.direction {
            AdjustmentDirection::Add => result.quantity_base,
            AdjustmentDirection::Subtract => -result.quantity_base,
        };
        event_sender
            .send(LedgerEvent::StockAdjusted {
                product_id: result.product_id,
                branch_id: result.branch_id,
                quantity_base: signed,
            })
            .await
            .map_err(|e| {
                STOCK_ADJUSTMENT_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for stock adjustment: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })?;

        if let Some(alert) = &result.low_stock {
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
