use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        customer_return::{self, CustomerReturnStatus, Entity as CustomerReturn},
        stock_movement::MovementKind,
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
    static ref CUSTOMER_RETURNS_REJECTED: IntCounter = IntCounter::new(
        "customer_returns_rejected_total",
        "Total number of customer returns rejected"
    )
    .expect("metric can be created");
    static ref CUSTOMER_RETURN_REJECT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "customer_return_reject_failures_total",
            "Total number of failed customer return rejections"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Rejects a customer return.
///
/// Rejecting a pending return only flips the status. Rejecting an
/// approved return takes the restocked quantity back out: the restock
/// batch is drained first and any part of it already consumed by later
/// sales is taken from the remaining batches in consumption order.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RejectCustomerReturnCommand {
    pub return_id: i64,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectCustomerReturnResult {
    pub return_id: i64,
    pub previous_status: CustomerReturnStatus,
    pub reversed_base: Decimal,
    pub resolved_at: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for RejectCustomerReturnCommand {
    type Result = RejectCustomerReturnResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            CUSTOMER_RETURN_REJECT_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.reject_in_db(db).await.map_err(|e| {
            CUSTOMER_RETURN_REJECT_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        CUSTOMER_RETURNS_REJECTED.inc();
        Ok(result)
    }
}

impl RejectCustomerReturnCommand {
    async fn reject_in_db(&self, db: &DbPool) -> Result<RejectCustomerReturnResult, LedgerError> {
        let return_id = self.return_id;

        db.transaction::<_, RejectCustomerReturnResult, LedgerError>(move |txn| {
            Box::pin(async move {
                let row = CustomerReturn::find()
                    .filter(customer_return::Column::Id.eq(return_id))
                    .lock_exclusive()
                    .one(txn)
                    .await
                    .map_err(LedgerError::db_error)?
                    .ok_or_else(|| {
                        LedgerError::NotFound(format!("Customer return {} not found", return_id))
                    })?;
                let previous_status = row.status;
                if !matches!(
                    previous_status,
                    CustomerReturnStatus::Pending | CustomerReturnStatus::Approved
                ) {
                    return Err(LedgerError::Conflict(format!(
                        "Customer return {} cannot be rejected from status {}",
                        return_id, previous_status
                    )));
                }

                let now = Utc::now();
                let mut reversed_base = Decimal::ZERO;

                if previous_status == CustomerReturnStatus::Approved {
                    let restock_batch_id = row.restock_batch_id.ok_or_else(|| {
                        LedgerError::Integrity(format!(
                            "Approved customer return {} has no restock batch",
                            return_id
                        ))
                    })?;

                    let product = stock::lock_product(txn, row.product_id).await?;
                    let branch_stock =
                        stock::lock_or_create_branch_stock(txn, row.branch_id, row.product_id)
                            .await?;
                    let restock_batch = batches::lock_batch(txn, restock_batch_id).await?;

                    reversed_base = row.quantity * restock_batch.conversion_factor;
                    stock::apply_branch_delta(txn, branch_stock, -reversed_base).await?;

                    // Drain the restock batch first; what later sales already
                    // consumed from it comes out of the other batches.
                    let from_restock = restock_batch.remaining_base.min(reversed_base);
                    if from_restock > Decimal::ZERO {
                        batches::draw_from_batch(txn, &restock_batch, from_restock).await?;
                        stock::record_movement(
                            txn,
                            row.product_id,
                            Some(row.branch_id),
                            Some(restock_batch.id),
                            -from_restock,
                            MovementKind::CustomerReturnReversal,
                            "customer_return",
                            return_id.to_string(),
                        )
                        .await?;
                    }

                    let remainder = reversed_base - from_restock;
                    if remainder > Decimal::ZERO {
                        let available = batches::lock_available_batches(txn, row.product_id).await?;
                        let plan = batches::plan_consumption(row.product_id, &available, remainder)?;
                        batches::apply_consumption(txn, &available, &plan).await?;
                        for draw in &plan.draws {
                            stock::record_movement(
                                txn,
                                row.product_id,
                                Some(row.branch_id),
                                Some(draw.batch_id),
                                -draw.draw_base,
                                MovementKind::CustomerReturnReversal,
                                "customer_return",
                                return_id.to_string(),
                            )
                            .await?;
                        }
                    }

                    stock::apply_global_delta(txn, product, -reversed_base).await?;
                }

                customer_return::ActiveModel {
                    id: Set(row.id),
                    status: Set(CustomerReturnStatus::Rejected),
                    resolved_at: Set(Some(now)),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .update(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(RejectCustomerReturnResult {
                    return_id,
                    previous_status,
                    reversed_base,
                    resolved_at: now,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for customer return rejection: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &RejectCustomerReturnResult,
    ) -> Result<(), LedgerError> {
        info!(
            return_id = %result.return_id,
            previous_status = %result.previous_status,
            reversed_base = %result.reversed_base,
            reason = ?self.reason,
            "Customer return rejected"
        );
        event_sender
            .send(LedgerEvent::CustomerReturnRejected {
                return_id: result.return_id,
            })
            .await
            .map_err(|e| {
                CUSTOMER_RETURN_REJECT_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for customer return rejection: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
