use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events published after a movement commits. Delivery to the
/// outside world (notifications and so on) is a consumer concern; the
/// ledger only guarantees the event is sent after the commit it
/// describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerEvent {
    PurchaseReceived {
        purchase_id: i64,
        branch_id: i32,
        line_count: usize,
    },
    SaleRecorded {
        sale_id: Uuid,
        branch_id: i32,
        line_count: usize,
    },
    StockAdjusted {
        product_id: i64,
        branch_id: i32,
        quantity_base: Decimal,
    },
    TransferRequested {
        transfer_id: i64,
        from_branch_id: i32,
        to_branch_id: i32,
    },
    TransferShipped {
        transfer_id: i64,
    },
    TransferReceived {
        transfer_id: i64,
    },
    TransferCancelled {
        transfer_id: i64,
    },
    SupplierReturnCompleted {
        return_id: i64,
        batch_id: i64,
    },
    SupplierReturnCancelled {
        return_id: i64,
    },
    CustomerReturnApproved {
        return_id: i64,
        restock_batch_id: i64,
    },
    CustomerReturnRejected {
        return_id: i64,
    },
    StockBelowMinimum {
        product_id: i64,
        branch_id: i32,
        quantity: Decimal,
        minimum: Decimal,
    },
    PriceRecalculated {
        product_id: i64,
        unit_count: usize,
    },
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<LedgerEvent>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<LedgerEvent>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: LedgerEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Builds a channel pair with a reasonable buffer for one process.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<LedgerEvent>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Drains the event channel, logging each event. Consumers that care
/// about specific events subscribe here; everything else just gets a
/// structured log line.
pub async fn process_events(mut rx: mpsc::Receiver<LedgerEvent>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            LedgerEvent::StockBelowMinimum {
                product_id,
                branch_id,
                quantity,
                minimum,
            } => {
                warn!(
                    product_id = %product_id,
                    branch_id = %branch_id,
                    quantity = %quantity,
                    minimum = %minimum,
                    "Stock fell below minimum"
                );
            }
            other => {
                info!("Ledger event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}
