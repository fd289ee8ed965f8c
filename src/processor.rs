//! Single entry point for stock movements.
//!
//! Callers build one [`StockMovementCommand`] variant per business
//! event and submit it here. The processor dispatches to the command,
//! retries transient database failures with exponential backoff, and
//! optionally deduplicates submissions through an idempotency key so a
//! POS terminal that resends after a timeout cannot apply the same
//! movement twice.

use crate::{
    commands::{
        returns::{
            ApproveCustomerReturnCommand, ApproveCustomerReturnResult,
            CancelSupplierReturnCommand, CancelSupplierReturnResult,
            CompleteSupplierReturnCommand, CompleteSupplierReturnResult,
            CreateCustomerReturnCommand, CreateCustomerReturnResult, CreateSupplierReturnCommand,
            CreateSupplierReturnResult, RejectCustomerReturnCommand, RejectCustomerReturnResult,
        },
        stock::{
            AdjustStockCommand, AdjustStockResult, ReceivePurchaseCommand, ReceivePurchaseResult,
            RecordSaleCommand, RecordSaleResult,
        },
        transfers::{
            CancelTransferCommand, CancelTransferResult, ReceiveTransferCommand,
            ReceiveTransferResult, RequestTransferCommand, RequestTransferResult,
            ShipTransferCommand, ShipTransferResult,
        },
        Command,
    },
    config::AppConfig,
    db::DbPool,
    entities::movement_key::{self, Entity as MovementKey},
    errors::LedgerError,
    events::EventSender,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, ModelTrait, Set, SqlErr};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// One stock movement, tagged by kind.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockMovementCommand {
    Purchase(ReceivePurchaseCommand),
    Sale(RecordSaleCommand),
    Adjustment(AdjustStockCommand),
    TransferRequest(RequestTransferCommand),
    TransferShip(ShipTransferCommand),
    TransferReceive(ReceiveTransferCommand),
    TransferCancel(CancelTransferCommand),
    SupplierReturnCreate(CreateSupplierReturnCommand),
    SupplierReturnComplete(CompleteSupplierReturnCommand),
    SupplierReturnCancel(CancelSupplierReturnCommand),
    CustomerReturnCreate(CreateCustomerReturnCommand),
    CustomerReturnApprove(ApproveCustomerReturnCommand),
    CustomerReturnReject(RejectCustomerReturnCommand),
}

impl StockMovementCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            StockMovementCommand::Purchase(_) => "purchase",
            StockMovementCommand::Sale(_) => "sale",
            StockMovementCommand::Adjustment(_) => "adjustment",
            StockMovementCommand::TransferRequest(_) => "transfer_request",
            StockMovementCommand::TransferShip(_) => "transfer_ship",
            StockMovementCommand::TransferReceive(_) => "transfer_receive",
            StockMovementCommand::TransferCancel(_) => "transfer_cancel",
            StockMovementCommand::SupplierReturnCreate(_) => "supplier_return_create",
            StockMovementCommand::SupplierReturnComplete(_) => "supplier_return_complete",
            StockMovementCommand::SupplierReturnCancel(_) => "supplier_return_cancel",
            StockMovementCommand::CustomerReturnCreate(_) => "customer_return_create",
            StockMovementCommand::CustomerReturnApprove(_) => "customer_return_approve",
            StockMovementCommand::CustomerReturnReject(_) => "customer_return_reject",
        }
    }
}

/// Result of a processed movement, tagged the same way as the command
/// that produced it. Serialized into the idempotency registry so a
/// replayed key returns the original payload.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MovementOutcome {
    Purchase(ReceivePurchaseResult),
    Sale(RecordSaleResult),
    Adjustment(AdjustStockResult),
    TransferRequest(RequestTransferResult),
    TransferShip(ShipTransferResult),
    TransferReceive(ReceiveTransferResult),
    TransferCancel(CancelTransferResult),
    SupplierReturnCreate(CreateSupplierReturnResult),
    SupplierReturnComplete(CompleteSupplierReturnResult),
    SupplierReturnCancel(CancelSupplierReturnResult),
    CustomerReturnCreate(CreateCustomerReturnResult),
    CustomerReturnApprove(ApproveCustomerReturnResult),
    CustomerReturnReject(RejectCustomerReturnResult),
}

/// Retry behavior for transient database failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.movement_retry_attempts,
            base_delay: Duration::from_millis(config.movement_retry_base_delay_ms),
            ..Self::default()
        }
    }
}

pub struct MovementProcessor {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    retry: RetryConfig,
}

impl MovementProcessor {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            retry,
        }
    }

    /// Processes one movement.
    ///
    /// With an idempotency key the first submission claims the key,
    /// executes and stores its outcome; any later submission with the
    /// same key gets the stored outcome back without touching stock.
    /// A submission that races the first one while it is still running
    /// fails with `Conflict` rather than waiting. A claim left behind
    /// by a process that crashed mid-movement keeps the key occupied
    /// until the row is removed.
    #[instrument(skip(self, command), fields(kind = command.kind()))]
    pub async fn submit(
        &self,
        command: StockMovementCommand,
        idempotency_key: Option<String>,
    ) -> Result<MovementOutcome, LedgerError> {
        let claimed = match idempotency_key.as_deref() {
            Some(key) => {
                if let Some(prior) = self.find_stored_outcome(key).await? {
                    debug!(key, "Replaying stored movement outcome");
                    return Ok(prior);
                }
                self.claim_key(key).await?;
                true
            }
            None => false,
        };

        let outcome = match self.execute_with_retry(&command).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if claimed {
                    if let Some(key) = idempotency_key.as_deref() {
                        self.release_key(key).await;
                    }
                }
                return Err(e);
            }
        };

        if let Some(key) = idempotency_key.as_deref() {
            self.store_outcome(key, &outcome).await?;
        }
        Ok(outcome)
    }

    async fn execute_with_retry(
        &self,
        command: &StockMovementCommand,
    ) -> Result<MovementOutcome, LedgerError> {
        let mut delay = self.retry.base_delay;
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.dispatch(command).await {
                Ok(outcome) => {
                    if attempts > 1 {
                        debug!(kind = command.kind(), attempts, "Movement succeeded after retry");
                    }
                    return Ok(outcome);
                }
                Err(e) => {
                    if attempts >= self.retry.max_attempts || !e.is_transient() {
                        return Err(e);
                    }
                    warn!(
                        kind = command.kind(),
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying: {}",
                        e
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(self.retry.max_delay);
                }
            }
        }
    }

    async fn dispatch(&self, command: &StockMovementCommand) -> Result<MovementOutcome, LedgerError> {
        let db = self.db_pool.clone();
        let events = self.event_sender.clone();
        match command {
            StockMovementCommand::Purchase(cmd) => {
                cmd.execute(db, events).await.map(MovementOutcome::Purchase)
            }
            StockMovementCommand::Sale(cmd) => {
                cmd.execute(db, events).await.map(MovementOutcome::Sale)
            }
            StockMovementCommand::Adjustment(cmd) => {
                cmd.execute(db, events).await.map(MovementOutcome::Adjustment)
            }
            StockMovementCommand::TransferRequest(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::TransferRequest),
            StockMovementCommand::TransferShip(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::TransferShip),
            StockMovementCommand::TransferReceive(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::TransferReceive),
            StockMovementCommand::TransferCancel(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::TransferCancel),
            StockMovementCommand::SupplierReturnCreate(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::SupplierReturnCreate),
            StockMovementCommand::SupplierReturnComplete(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::SupplierReturnComplete),
            StockMovementCommand::SupplierReturnCancel(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::SupplierReturnCancel),
            StockMovementCommand::CustomerReturnCreate(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::CustomerReturnCreate),
            StockMovementCommand::CustomerReturnApprove(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::CustomerReturnApprove),
            StockMovementCommand::CustomerReturnReject(cmd) => cmd
                .execute(db, events)
                .await
                .map(MovementOutcome::CustomerReturnReject),
        }
    }

    async fn find_stored_outcome(&self, key: &str) -> Result<Option<MovementOutcome>, LedgerError> {
        let row = MovementKey::find_by_id(key.to_string())
            .one(self.db_pool.as_ref())
            .await
            .map_err(LedgerError::db_error)?;
        match row {
            None => Ok(None),
            Some(row) if row.outcome.is_empty() => Err(LedgerError::Conflict(format!(
                "Movement with idempotency key {} is already in flight",
                key
            ))),
            Some(row) => {
                let outcome = serde_json::from_str(&row.outcome).map_err(|e| {
                    LedgerError::Serialization(format!(
                        "Stored outcome for key {} is unreadable: {}",
                        key, e
                    ))
                })?;
                Ok(Some(outcome))
            }
        }
    }

    /// Inserts the key with an empty outcome as an in-flight marker.
    async fn claim_key(&self, key: &str) -> Result<(), LedgerError> {
        let claim = movement_key::ActiveModel {
            idempotency_key: Set(key.to_string()),
            outcome: Set(String::new()),
            created_at: Set(Utc::now()),
        };
        claim.insert(self.db_pool.as_ref()).await.map(|_| ()).map_err(|e| {
            if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                LedgerError::Conflict(format!(
                    "Movement with idempotency key {} is already in flight",
                    key
                ))
            } else {
                LedgerError::db_error(e)
            }
        })
    }

    async fn store_outcome(&self, key: &str, outcome: &MovementOutcome) -> Result<(), LedgerError> {
        let serialized = serde_json::to_string(outcome)
            .map_err(|e| LedgerError::Serialization(format!("Cannot store outcome: {}", e)))?;
        movement_key::ActiveModel {
            idempotency_key: Set(key.to_string()),
            outcome: Set(serialized),
            created_at: Set(Utc::now()),
        }
        .update(self.db_pool.as_ref())
        .await
        .map(|_| ())
        .map_err(LedgerError::db_error)
    }

    /// Frees a claimed key after a failed execution so the caller can
    /// retry with the same key.
    async fn release_key(&self, key: &str) {
        match MovementKey::find_by_id(key.to_string())
            .one(self.db_pool.as_ref())
            .await
        {
            Ok(Some(row)) => {
                if let Err(e) = row.delete(self.db_pool.as_ref()).await {
                    warn!(key, "Failed to release idempotency key: {}", e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(key, "Failed to look up idempotency key for release: {}", e),
        }
    }
}
