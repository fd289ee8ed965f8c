use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        customer_return::{self, CustomerReturnStatus, Entity as CustomerReturn},
        stock_batch::{self, BatchKind},
        stock_movement::MovementKind,
    },
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::{stock, units},
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
    static ref CUSTOMER_RETURNS_APPROVED: IntCounter = IntCounter::new(
        "customer_returns_approved_total",
        "Total number of customer returns approved"
    )
    .expect("metric can be created");
    static ref CUSTOMER_RETURN_APPROVE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "customer_return_approve_failures_total",
            "Total number of failed customer return approvals"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Approves a pending customer return and restocks it.
///
/// The returned quantity goes into a dedicated batch so it stays
/// visible to FIFO consumption and reconciliation instead of floating
/// outside the batch history. The batch carries no expiry date since
/// the original batch of the goods is unknown.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ApproveCustomerReturnCommand {
    pub return_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveCustomerReturnResult {
    pub return_id: i64,
    pub product_id: i64,
    pub branch_id: i32,
    pub restock_batch_id: i64,
    pub quantity_base: Decimal,
    pub resolved_at: chrono::DateTime<Utc>,
}

#[async_trait::async_trait]
impl Command for ApproveCustomerReturnCommand {
    type Result = ApproveCustomerReturnResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            CUSTOMER_RETURN_APPROVE_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.approve_in_db(db).await.map_err(|e| {
            CUSTOMER_RETURN_APPROVE_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        CUSTOMER_RETURNS_APPROVED.inc();
        Ok(result)
    }
}

impl ApproveCustomerReturnCommand {
    async fn approve_in_db(
        &self,
        db: &DbPool,
    ) -> Result<ApproveCustomerReturnResult, LedgerError> {
        let return_id = self.return_id;

        db.transaction::<_, ApproveCustomerReturnResult, LedgerError>(move |txn| {
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
                if row.status != CustomerReturnStatus::Pending {
                    return Err(LedgerError::Conflict(format!(
                        "Customer return {} cannot be approved from status {}",
                        return_id, row.status
                    )));
                }

                let product = stock::lock_product(txn, row.product_id).await?;
                let unit = units::resolve_unit(txn, row.product_id, row.unit_id).await?;
                let quantity_base = unit.to_base(row.quantity);
                let branch_stock =
                    stock::lock_or_create_branch_stock(txn, row.branch_id, row.product_id).await?;

                let now = Utc::now();
                let restock_batch = stock_batch::ActiveModel {
                    product_id: Set(row.product_id),
                    purchase_line_id: Set(None),
                    kind: Set(BatchKind::CustomerReturn),
                    unit_name: Set(unit.unit_name.clone()),
                    conversion_factor: Set(unit.factor),
                    received_quantity: Set(row.quantity),
                    remaining_base: Set(quantity_base),
                    expiry_date: Set(None),
                    created_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(LedgerError::db_error)?;

                stock::apply_branch_delta(txn, branch_stock, quantity_base).await?;
                stock::apply_global_delta(txn, product, quantity_base).await?;
                stock::record_movement(
                    txn,
                    row.product_id,
                    Some(row.branch_id),
                    Some(restock_batch.id),
                    quantity_base,
                    MovementKind::CustomerReturn,
                    "customer_return",
                    return_id.to_string(),
                )
                .await?;

                customer_return::ActiveModel {
                    id: Set(row.id),
                    status: Set(CustomerReturnStatus::Approved),
                    restock_batch_id: Set(Some(restock_batch.id)),
                    resolved_at: Set(Some(now)),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .update(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(ApproveCustomerReturnResult {
                    return_id,
                    product_id: row.product_id,
                    branch_id: row.branch_id,
                    restock_batch_id: restock_batch.id,
                    quantity_base,
                    resolved_at: now,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for customer return approval: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &ApproveCustomerReturnResult,
    ) -> Result<(), LedgerError> {
        info!(
            return_id = %result.return_id,
            product_id = %result.product_id,
            branch_id = %result.branch_id,
            restock_batch_id = %result.restock_batch_id,
            quantity_base = %result.quantity_base,
            "Customer return approved and restocked"
        );
        event_sender
            .send(LedgerEvent::CustomerReturnApproved {
                return_id: result.return_id,
                restock_batch_id: result.restock_batch_id,
            })
            .await
            .map_err(|e| {
                CUSTOMER_RETURN_APPROVE_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for customer return approval: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
