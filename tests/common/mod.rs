#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use stockledger::{
    commands::{
        stock::{
            AdjustStockCommand, AdjustStockResult, AdjustmentDirection, PurchaseLineInput,
            ReceivePurchaseCommand, ReceivePurchaseResult, RecordSaleCommand, RecordSaleResult,
            SaleLineInput,
        },
        transfers::{RequestTransferCommand, TransferLineInput},
    },
    db::{create_db_pool, run_migrations, DbPool},
    entities::{
        branch, branch_stock, product, product_unit,
        stock_batch::Entity as StockBatch,
        stock_movement::{self, Entity as StockMovement},
    },
    errors::LedgerError,
    events::{self, EventSender},
    processor::{MovementOutcome, StockMovementCommand},
    services::catalog::NewUnit,
    StockLedger,
};
use uuid::Uuid;

/// Test harness: one fresh shared-cache in-memory database per
/// instance, migrations applied, events drained in the background.
pub struct TestLedger {
    pub ledger: StockLedger,
    pub pool: Arc<DbPool>,
    pub event_sender: Arc<EventSender>,
    _event_task: tokio::task::JoinHandle<()>,
}

/// A seeded two-branch shop with one product sold in pieces or boxes.
pub struct Shop {
    pub main: branch::Model,
    pub annex: branch::Model,
    pub product: product::Model,
    pub piece: product_unit::Model,
    pub case_of_twelve: product_unit::Model,
}

impl TestLedger {
    pub async fn new() -> Self {
        let url = format!(
            "sqlite:file:stockledger_test_{}?mode=memory&cache=shared",
            Uuid::new_v4().simple()
        );
        let pool = create_db_pool(&url).await.expect("test database");
        run_migrations(pool.as_ref()).await.expect("migrations");

        let (event_sender, event_rx) = events::channel(64);
        let event_sender = Arc::new(event_sender);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let ledger = StockLedger::new(pool.clone(), event_sender.clone());
        Self {
            ledger,
            pool,
            event_sender,
            _event_task: event_task,
        }
    }

    /// Two branches and a product with a base unit and a twelve-pack.
    pub async fn seed_shop(&self) -> Shop {
        self.seed_shop_with_minimum(Decimal::ZERO).await
    }

    pub async fn seed_shop_with_minimum(&self, minimum_stock: Decimal) -> Shop {
        let main = self
            .ledger
            .catalog
            .create_branch("Main store".into(), true)
            .await
            .expect("main branch");
        let annex = self
            .ledger
            .catalog
            .create_branch("Annex".into(), false)
            .await
            .expect("annex branch");
        let (product, units) = self
            .ledger
            .catalog
            .create_product(
                "Instant noodles".into(),
                Some("Food".into()),
                minimum_stock,
                vec![
                    NewUnit {
                        name: "Pcs".into(),
                        conversion_factor: dec!(1),
                        buy_price: dec!(2.50),
                        sell_price: dec!(3.50),
                        is_base_unit: true,
                        sort_order: 0,
                    },
                    NewUnit {
                        name: "Box".into(),
                        conversion_factor: dec!(12),
                        buy_price: dec!(29),
                        sell_price: dec!(40),
                        is_base_unit: false,
                        sort_order: 1,
                    },
                ],
            )
            .await
            .expect("product");
        let piece = units
            .iter()
            .find(|u| u.is_base_unit)
            .expect("base unit")
            .clone();
        let case_of_twelve = units
            .iter()
            .find(|u| !u.is_base_unit)
            .expect("pack unit")
            .clone();
        Shop {
            main,
            annex,
            product,
            piece,
            case_of_twelve,
        }
    }

    pub async fn receive(
        &self,
        branch_id: i32,
        product_id: i64,
        unit_id: i64,
        quantity: Decimal,
        unit_price: Decimal,
        expiry_date: Option<NaiveDate>,
    ) -> Result<ReceivePurchaseResult, LedgerError> {
        let outcome = self
            .ledger
            .processor
            .submit(
                StockMovementCommand::Purchase(ReceivePurchaseCommand {
                    branch_id: Some(branch_id),
                    reference: format!("PO-{}", Uuid::new_v4().simple()),
                    supplier: None,
                    note: None,
                    lines: vec![PurchaseLineInput {
                        product_id,
                        unit_id,
                        quantity,
                        unit_price,
                        expiry_date,
                    }],
                }),
                None,
            )
            .await?;
        match outcome {
            MovementOutcome::Purchase(result) => Ok(result),
            other => panic!("expected purchase outcome, got {:?}", other),
        }
    }

    pub async fn sell(
        &self,
        branch_id: i32,
        product_id: i64,
        unit_id: i64,
        quantity: Decimal,
    ) -> Result<RecordSaleResult, LedgerError> {
        let outcome = self
            .ledger
            .processor
            .submit(
                StockMovementCommand::Sale(RecordSaleCommand {
                    branch_id: Some(branch_id),
                    reference: None,
                    lines: vec![SaleLineInput {
                        product_id,
                        unit_id,
                        quantity,
                    }],
                }),
                None,
            )
            .await?;
        match outcome {
            MovementOutcome::Sale(result) => Ok(result),
            other => panic!("expected sale outcome, got {:?}", other),
        }
    }

    pub async fn adjust(
        &self,
        branch_id: i32,
        product_id: i64,
        unit_id: i64,
        quantity: Decimal,
        direction: AdjustmentDirection,
    ) -> Result<AdjustStockResult, LedgerError> {
        let outcome = self
            .ledger
            .processor
            .submit(
                StockMovementCommand::Adjustment(AdjustStockCommand {
                    product_id,
                    branch_id: Some(branch_id),
                    unit_id,
                    quantity,
                    direction,
                    reason: "test correction".into(),
                }),
                None,
            )
            .await?;
        match outcome {
            MovementOutcome::Adjustment(result) => Ok(result),
            other => panic!("expected adjustment outcome, got {:?}", other),
        }
    }

    pub async fn request_transfer(
        &self,
        from_branch_id: i32,
        to_branch_id: i32,
        product_id: i64,
        unit_id: i64,
        quantity: Decimal,
    ) -> Result<i64, LedgerError> {
        let outcome = self
            .ledger
            .processor
            .submit(
                StockMovementCommand::TransferRequest(RequestTransferCommand {
                    from_branch_id,
                    to_branch_id,
                    note: None,
                    lines: vec![TransferLineInput {
                        product_id,
                        unit_id,
                        quantity,
                    }],
                }),
                None,
            )
            .await?;
        match outcome {
            MovementOutcome::TransferRequest(result) => Ok(result.transfer_id),
            other => panic!("expected transfer request outcome, got {:?}", other),
        }
    }

    pub async fn submit(
        &self,
        command: StockMovementCommand,
    ) -> Result<MovementOutcome, LedgerError> {
        self.ledger.processor.submit(command, None).await
    }

    // Read-side helpers for assertions.

    pub async fn branch_qty(&self, branch_id: i32, product_id: i64) -> Decimal {
        branch_stock::Entity::find()
            .filter(branch_stock::Column::BranchId.eq(branch_id))
            .filter(branch_stock::Column::ProductId.eq(product_id))
            .one(self.pool.as_ref())
            .await
            .expect("branch stock query")
            .map(|s| s.quantity)
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn global_qty(&self, product_id: i64) -> Decimal {
        product::Entity::find_by_id(product_id)
            .one(self.pool.as_ref())
            .await
            .expect("product query")
            .expect("product exists")
            .global_stock
    }

    pub async fn batch_remaining(&self, batch_id: i64) -> Decimal {
        StockBatch::find_by_id(batch_id)
            .one(self.pool.as_ref())
            .await
            .expect("batch query")
            .expect("batch exists")
            .remaining_base
    }

    pub async fn movement_sum(&self, product_id: i64) -> Decimal {
        StockMovement::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .all(self.pool.as_ref())
            .await
            .expect("movement query")
            .iter()
            .map(|m| m.quantity_base)
            .sum()
    }
}
