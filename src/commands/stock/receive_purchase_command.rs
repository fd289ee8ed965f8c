use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        purchase,
        purchase_line,
        stock_batch::{self, BatchKind},
        stock_movement::MovementKind,
    },
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::{catalog, stock, units},
};
use chrono::{DateTime, NaiveDate, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set, TransactionError, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use validator::Validate;

lazy_static! {
    static ref PURCHASE_RECEIPTS: IntCounter = IntCounter::new(
        "purchase_receipts_total",
        "Total number of purchase receipts posted"
    )
    .expect("metric can be created");
    static ref PURCHASE_RECEIPT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "purchase_receipt_failures_total",
            "Total number of failed purchase receipts"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// One received purchase line, in the supplier's unit.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PurchaseLineInput {
    pub product_id: i64,
    pub unit_id: i64,
    #[validate(custom = "crate::commands::validate_movement_quantity")]
    pub quantity: Decimal,
    #[validate(custom = "crate::commands::validate_money")]
    pub unit_price: Decimal,
    pub expiry_date: Option<NaiveDate>,
}

/// Posts a supplier receipt: one batch per line, branch and global
/// totals raised, buy prices fed back into the catalog.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ReceivePurchaseCommand {
    /// Defaults to the main branch when absent.
    pub branch_id: Option<i32>,
    #[validate(length(min = 1, max = 100))]
    pub reference: String,
    #[validate(length(max = 255))]
    pub supplier: Option<String>,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<PurchaseLineInput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceivePurchaseResult {
    pub purchase_id: i64,
    pub branch_id: i32,
    pub line_count: usize,
    pub batch_ids: Vec<i64>,
    /// Net base-unit quantity added to the branch and global totals.
    pub total_base_added: Decimal,
    /// Products whose buy prices were re-derived, with the number of
    /// units touched.
    pub repriced: Vec<(i64, usize)>,
    pub received_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for ReceivePurchaseCommand {
    type Result = ReceivePurchaseResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate()
            .and_then(|_| self.lines.iter().try_for_each(|line| line.validate()))
            .map_err(|e| {
                PURCHASE_RECEIPT_FAILURES
                    .with_label_values(&["validation_error"])
                    .inc();
                let msg = format!("Invalid input: {}", e);
                error!("{}", msg);
                LedgerError::Validation(msg)
            })?;

        let db = db_pool.as_ref();
        let result = self.receive_in_db(db).await.map_err(|e| {
            PURCHASE_RECEIPT_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        PURCHASE_RECEIPTS.inc();
        Ok(result)
    }
}

impl ReceivePurchaseCommand {
    async fn receive_in_db(&self, db: &DbPool) -> Result<ReceivePurchaseResult, LedgerError> {
        let branch_id = self.branch_id;
        let reference = self.reference.clone();
        let supplier = self.supplier.clone();
        let note = self.note.clone();
        let mut lines = self.lines.clone();
        // Products are locked in ascending id order.
        lines.sort_by_key(|l| (l.product_id, l.unit_id));

        db.transaction::<_, ReceivePurchaseResult, LedgerError>(|txn| {
            Box::pin(async move {
                let branch = stock::resolve_branch(txn, branch_id).await?;
                let now = Utc::now();

                let header = purchase::ActiveModel {
                    branch_id: Set(branch.id),
                    reference: Set(reference),
                    supplier: Set(supplier),
                    note: Set(note),
                    received_at: Set(now),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(LedgerError::db_error)?;

                let mut batch_ids = Vec::with_capacity(lines.len());
                let mut total_base = Decimal::ZERO;
                let mut repriced: Vec<(i64, usize)> = Vec::new();

                for line in &lines {
                    let product = stock::lock_active_product(txn, line.product_id).await?;
                    let catalog_unit =
                        units::resolve_unit_model(txn, line.product_id, line.unit_id).await?;
                    let unit = units::UnitConversion::from(&catalog_unit);
                    let base_quantity = unit.to_base(line.quantity);

                    let saved_line = purchase_line::ActiveModel {
                        purchase_id: Set(header.id),
                        product_id: Set(line.product_id),
                        unit_id: Set(line.unit_id),
                        quantity: Set(line.quantity),
                        unit_price: Set(line.unit_price),
                        expiry_date: Set(line.expiry_date),
                        created_at: Set(now),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(LedgerError::db_error)?;

                    let batch = stock_batch::ActiveModel {
                        product_id: Set(line.product_id),
                        purchase_line_id: Set(Some(saved_line.id)),
                        kind: Set(BatchKind::Purchase),
                        unit_name: Set(unit.unit_name.clone()),
                        conversion_factor: Set(unit.factor),
                        received_quantity: Set(line.quantity),
                        remaining_base: Set(base_quantity),
                        expiry_date: Set(line.expiry_date),
                        created_at: Set(now),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(LedgerError::db_error)?;
                    batch_ids.push(batch.id);

                    let branch_stock =
                        stock::lock_or_create_branch_stock(txn, branch.id, line.product_id)
                            .await?;
                    stock::apply_branch_delta(txn, branch_stock, base_quantity).await?;
                    stock::apply_global_delta(txn, product, base_quantity).await?;

                    stock::record_movement(
                        txn,
                        line.product_id,
                        Some(branch.id),
                        Some(batch.id),
                        base_quantity,
                        MovementKind::Purchase,
                        "purchase",
                        header.id.to_string(),
                    )
                    .await?;

                    // Feed the price actually paid back into the catalog.
                    if catalog_unit.buy_price != line.unit_price {
                        let updated = catalog::propagate_buy_price(
                            txn,
                            line.product_id,
                            line.unit_id,
                            line.unit_price,
                        )
                        .await?;
                        repriced.push((line.product_id, updated.len()));
                    }

                    total_base += base_quantity;
                }

                Ok(ReceivePurchaseResult {
                    purchase_id: header.id,
                    branch_id: branch.id,
                    line_count: lines.len(),
                    batch_ids,
                    total_base_added: total_base,
                    repriced,
                    received_at: now,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for purchase receipt: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &ReceivePurchaseResult,
    ) -> Result<(), LedgerError> {
        info!(
            purchase_id = %result.purchase_id,
            branch_id = %result.branch_id,
            line_count = %result.line_count,
            total_base_added = %result.total_base_added,
            "Purchase received"
        );

        event_sender
            .send(LedgerEvent::PurchaseReceived {
                purchase_id: result.purchase_id,
                branch_id: result.branch_id,
                line_count: result.line_count,
            })
            .await
            .map_err(|e| {
                PURCHASE_RECEIPT_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for purchase receipt: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })?;

        for (product_id, unit_count) in &result.repriced {
            event_sender
                .send(LedgerEvent::PriceRecalculated {
                    product_id: *product_id,
                    unit_count: *unit_count,
                })
                .await
                .map_err(LedgerError::Event)?;
        }

        Ok(())
    }
}
