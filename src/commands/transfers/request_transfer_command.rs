use crate::{
    commands::Command,
    db::DbPool,
    entities::{
        branch_stock::{self, Entity as BranchStock},
        stock_transfer::{self, TransferStatus},
        stock_transfer_line,
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
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionError,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use validator::Validate;

lazy_static! {
    static ref TRANSFER_REQUESTS: IntCounter = IntCounter::new(
        "transfer_requests_total",
        "Total number of stock transfer requests"
    )
    .expect("metric can be created");
    static ref TRANSFER_REQUEST_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "transfer_request_failures_total",
            "Total number of failed transfer requests"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransferLineInput {
    pub product_id: i64,
    pub unit_id: i64,
    #[validate(custom = "crate::commands::validate_movement_quantity")]
    pub quantity: Decimal,
}

/// Opens a transfer in `pending` state.
///
/// The request checks that the source branch currently holds what is
/// asked for, but moves nothing; stock changes when the transfer ships.
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RequestTransferCommand {
    pub from_branch_id: i32,
    pub to_branch_id: i32,
    #[validate(length(max = 500))]
    pub note: Option<String>,
    #[validate(length(min = 1, message = "At least one line is required"))]
    pub lines: Vec<TransferLineInput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestTransferResult {
    pub transfer_id: i64,
    pub from_branch_id: i32,
    pub to_branch_id: i32,
    pub line_count: usize,
    pub status: TransferStatus,
}

#[async_trait::async_trait]
impl Command for RequestTransferCommand {
    type Result = RequestTransferResult;

    #[instrument(skip(self, db_pool, event_sender))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, LedgerError> {
        self.validate()
            .and_then(|_| self.lines.iter().try_for_each(|line| line.validate()))
            .map_err(|e| {
                TRANSFER_REQUEST_FAILURES
                    .with_label_values(&["validation_error"])
                    .inc();
                let msg = format!("Invalid input: {}", e);
                error!("{}", msg);
                LedgerError::Validation(msg)
            })?;
        if self.from_branch_id == self.to_branch_id {
            TRANSFER_REQUEST_FAILURES
                .with_label_values(&["validation_error"])
                .inc();
            return Err(LedgerError::Validation(
                "Transfer source and destination branches must differ".to_string(),
            ));
        }

        let db = db_pool.as_ref();
        let result = self.request_in_db(db).await.map_err(|e| {
            TRANSFER_REQUEST_FAILURES
                .with_label_values(&[e.metric_label()])
                .inc();
            e
        })?;

        self.log_and_trigger_event(&event_sender, &result).await?;
        TRANSFER_REQUESTS.inc();
        Ok(result)
    }
}

impl RequestTransferCommand {
    async fn request_in_db(&self, db: &DbPool) -> Result<RequestTransferResult, LedgerError> {
        let from_branch_id = self.from_branch_id;
        let to_branch_id = self.to_branch_id;
        let note = self.note.clone();
        let mut lines = self.lines.clone();
        lines.sort_by_key(|l| (l.product_id, l.unit_id));

        db.transaction::<_, RequestTransferResult, LedgerError>(move |txn| {
            Box::pin(async move {
                let from_branch = stock::resolve_branch(txn, Some(from_branch_id)).await?;
                let to_branch = stock::resolve_branch(txn, Some(to_branch_id)).await?;
                let now = Utc::now();

                let header = stock_transfer::ActiveModel {
                    from_branch_id: Set(from_branch.id),
                    to_branch_id: Set(to_branch.id),
                    status: Set(TransferStatus::Pending),
                    note: Set(note),
                    requested_at: Set(now),
                    shipped_at: Set(None),
                    received_at: Set(None),
                    cancelled_at: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(LedgerError::db_error)?;

                for line in &lines {
                    let product = stock::lock_active_product(txn, line.product_id).await?;
                    let unit = units::resolve_unit(txn, line.product_id, line.unit_id).await?;
                    let base_required = unit.to_base(line.quantity);

                    // Advisory availability check; ship re-validates under lock.
                    let on_hand = BranchStock::find()
                        .filter(branch_stock::Column::BranchId.eq(from_branch.id))
                        .filter(branch_stock::Column::ProductId.eq(line.product_id))
                        .one(txn)
                        .await
                        .map_err(LedgerError::db_error)?
                        .map(|s| s.quantity)
                        .unwrap_or(Decimal::ZERO);
                    if on_hand < base_required {
                        return Err(LedgerError::insufficient_stock(
                            product.id,
                            base_required,
                            on_hand,
                        ));
                    }

                    stock_transfer_line::ActiveModel {
                        transfer_id: Set(header.id),
                        product_id: Set(line.product_id),
                        unit_id: Set(line.unit_id),
                        unit_name: Set(unit.unit_name.clone()),
                        conversion_factor: Set(unit.factor),
                        requested_quantity: Set(line.quantity),
                        approved_quantity: Set(None),
                        received_quantity: Set(None),
                        created_at: Set(now),
                        ..Default::default()
                    }
                    .insert(txn)
                    .await
                    .map_err(LedgerError::db_error)?;
                }

                Ok(RequestTransferResult {
                    transfer_id: header.id,
                    from_branch_id: from_branch.id,
                    to_branch_id: to_branch.id,
                    line_count: lines.len(),
                    status: TransferStatus::Pending,
                })
            })
        })
        .await
        .map_err(|e| {
            error!("Transaction failed for transfer request: {}", e);
            match e {
                TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
                TransactionError::Transaction(ledger_err) => ledger_err,
            }
        })
    }

    async fn log_and_trigger_event(
        &self,
        event_sender: &EventSender,
        result: &RequestTransferResult,
    ) -> Result<(), LedgerError> {
        info!(
            transfer_id = %result.transfer_id,
            from_branch_id = %result.from_branch_id,
            to_branch_id = %result.to_branch_id,
            line_count = %result.line_count,
            "Transfer requested"
        );
        event_sender
            .send(LedgerEvent::TransferRequested {
                transfer_id: result.transfer_id,
                from_branch_id: result.from_branch_id,
                to_branch_id: result.to_branch_id,
            })
            .await
            .map_err(|e| {
                TRANSFER_REQUEST_FAILURES
                    .with_label_values(&["event_error"])
                    .inc();
                let msg = format!("Failed to send event for transfer request: {}", e);
                error!("{}", msg);
                LedgerError::Event(msg)
            })
    }
}
