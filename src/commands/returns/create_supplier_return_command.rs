use crate::{
    commands::Command,
    db::DbPool,
    entities::supplier_return::{self, SupplierReturnStatus},
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::{batches, stock},
};
use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set, TransactionError, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use validator::Validate;

lazy_static! {
    static ref SUPPLIER_RETURNS_CREATED: IntCounter = IntCounter::new(
        "supplier_returns_created_total",
        "Total number of supplier return drafts created"
    )
    .expect("metric can be created");
    static ref SUPPLIER_RETURN_CREATE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "supplier_return_create_failures_total",
            "Total number of failed supplier return creations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Opens a supplier return draft against one batch.
///
/// The draft deducts nothing. It checks that the batch currently holds
/// the quantity, completion re-validates that under lock.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateSupplierReturnCommand {
    pub batch_id: i64,
    /// Defaults to the main branch when absent.
    pub branch_id: Option<i32>,
    /// Quantity in the batch's received unit.
    #[validate(custom = "crate::commands::validate_movement_quantity")]
    pub quantity: Decimal,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSupplierReturnResult {
    pub return_id: i64,
    pub batch_id: i64,
    pub branch_id: i32,
    pub status: SupplierReturnStatus,
}

#[async_trait::async_trait]
impl Command for CreateSupplierReturnCommand {
    type Result = CreateSupplierReturnResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            SUPPLIER_RETURN_CREATE_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.create_in_db(db).await.map_err(|e| {
            SUPPLIER_RETURN_CREATE_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        SUPPLIER_RETURNS_CREATED.inc();
        Ok(result)
    }
}

impl CreateSupplierReturnCommand {
    async fn create_in_db(&self, db: &DbPool) -> Result<CreateSupplierReturnResult, LedgerError> {
        let batch_id = self.batch_id;
        let branch_id = self.branch_id;
        let quantity = self.quantity;
        let reason = self.reason.clone();

        db.transaction::<_, CreateSupplierReturnResult, LedgerError>(move |txn| {
            Box::pin(async move {
                let branch = stock::resolve_branch(txn, branch_id).await?;
                let batch = batches::get_batch(txn, batch_id).await?;
                stock::lock_active_product(txn, batch.product_id).await?;

                // Advisory availability check; completion re-validates.
                let required_base = quantity * batch.conversion_factor;
                if required_base > batch.remaining_base {
                    return Err(LedgerError::insufficient_stock(
                        batch.product_id,
                        required_base,
                        batch.remaining_base,
                    ));
                }

                let now = Utc::now();
                let row = supplier_return::ActiveModel {
                    batch_id: Set(batch.id),
                    branch_id: Set(branch.id),
                    quantity: Set(quantity),
                    reason: Set(reason),
                    status: Set(SupplierReturnStatus::Draft),
                    completed_at: Set(None),
                    cancelled_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(CreateSupplierReturnResult {
                    return_id: row.id,
                    batch_id: batch.id,
                    branch_id: branch.id,
                    status: SupplierReturnStatus::Draft,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for supplier return creation: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &CreateSupplierReturnResult,
    ) -> Result<(), LedgerError> {
        info!(
            return_id = %result.return_id,
            batch_id = %result.batch_id,
            branch_id = %result.branch_id,
            quantity = %self.quantity,
            "Supplier return draft created"
        );
        event_sender
            .send(LedgerEvent::Generic {
                message: format!("Supplier return {} drafted", result.return_id),
                timestamp: Utc::now(),
            })
            .await
            .map_err(|e| {
                SUPPLIER_RETURN_CREATE_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for supplier return draft: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
