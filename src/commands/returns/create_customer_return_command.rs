use crate::{
    commands::Command,
    db::DbPool,
    entities::customer_return::{self, CustomerReturnStatus},
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::{stock, units},
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
    static ref CUSTOMER_RETURNS_CREATED: IntCounter = IntCounter::new(
        "customer_returns_created_total",
        "Total number of customer returns registered"
    )
    .expect("metric can be created");
    static ref CUSTOMER_RETURN_CREATE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "customer_return_create_failures_total",
            "Total number of failed customer return registrations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Registers a customer return in `pending` state.
///
/// Nothing is restocked until someone approves the return.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateCustomerReturnCommand {
    pub product_id: i64,
    /// Defaults to the main branch when absent.
    pub branch_id: Option<i32>,
    pub unit_id: i64,
    #[validate(custom = "crate::commands::validate_movement_quantity")]
    pub quantity: Decimal,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCustomerReturnResult {
    pub return_id: i64,
    pub product_id: i64,
    pub branch_id: i32,
    pub status: CustomerReturnStatus,
}

#[async_trait::async_trait]
impl Command for CreateCustomerReturnCommand {
    type Result = CreateCustomerReturnResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate().map_err(|e| {
            CUSTOMER_RETURN_CREATE_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            let msg = format!("Invalid input: {}", e);
            error!("{}", msg);
            LedgerError::Validation(msg)
        })?;

        let db = db_pool.as_ref();
        let result = self.create_in_db(db).await.map_err(|e| {
            CUSTOMER_RETURN_CREATE_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        CUSTOMER_RETURNS_CREATED.inc();
        Ok(result)
    }
}

impl CreateCustomerReturnCommand {
    async fn create_in_db(&self, db: &DbPool) -> Result<CreateCustomerReturnResult, LedgerError> {
        let product_id = self.product_id;
        let branch_id = self.branch_id;
        let unit_id = self.unit_id;
        let quantity = self.quantity;
        let reason = self.reason.clone();

        db.transaction::<_, CreateCustomerReturnResult, LedgerError>(move |txn| {
            Box::pin(async move {
                let branch = stock::resolve_branch(txn, branch_id).await?;
                stock::lock_active_product(txn, product_id).await?;
                units::resolve_unit(txn, product_id, unit_id).await?;

                let now = Utc::now();
                let row = customer_return::ActiveModel {
                    product_id: Set(product_id),
                    branch_id: Set(branch.id),
                    unit_id: Set(unit_id),
                    quantity: Set(quantity),
                    reason: Set(reason),
                    status: Set(CustomerReturnStatus::Pending),
                    restock_batch_id: Set(None),
                    resolved_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(LedgerError::db_error)?;

                Ok(CreateCustomerReturnResult {
                    return_id: row.id,
                    product_id,
                    branch_id: branch.id,
                    status: CustomerReturnStatus::Pending,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for customer return creation: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &CreateCustomerReturnResult,
    ) -> Result<(), LedgerError> {
        info!(
            return_id = %result.return_id,
            product_id = %result.product_id,
            branch_id = %result.branch_id,
            quantity = %self.quantity,
            "Customer return registered"
        );
        event_sender
            .send(LedgerEvent::Generic {
                message: format!("Customer return {} awaiting approval", result.return_id),
                timestamp: Utc::now(),
            })
            .await
            .map_err(|e| {
                CUSTOMER_RETURN_CREATE_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for customer return: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
