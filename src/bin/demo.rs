//! End-to-end walkthrough of one trading day.
//!
//! Seeds a two-branch shop, receives a purchase, sells over the
//! counter, breaks something, moves stock between branches and closes
//! with a valuation and a ledger audit. Defaults to an in-memory
//! SQLite database, set APP__DATABASE_URL to point it elsewhere.

use std::sync::Arc;

use anyhow::Context;
use rust_decimal_macros::dec;
use tracing::info;

use stockledger::{
    commands::{
        stock::{
            AdjustStockCommand, AdjustmentDirection, PurchaseLineInput, ReceivePurchaseCommand,
            RecordSaleCommand, SaleLineInput,
        },
        transfers::{
            ReceiveTransferCommand, RequestTransferCommand, ShipTransferCommand,
            TransferLineInput,
        },
    },
    config, db, events,
    processor::{MovementOutcome, StockMovementCommand},
    services::catalog::NewUnit,
    StockLedger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::env::set_var(
        "APP__DATABASE_URL",
        std::env::var("APP__DATABASE_URL").unwrap_or_else(|_| {
            // Shared cache so every pooled connection sees the same
            // in-memory database.
            "sqlite:file:stockledger_demo?mode=memory&cache=shared".to_string()
        }),
    );
    let cfg = config::load_config().context("loading configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("connecting to database")?;
    if cfg.auto_migrate {
        db::run_migrations(&pool).await.context("running migrations")?;
    }
    let pool = Arc::new(pool);

    let (event_sender, event_rx) = events::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(event_sender);
    tokio::spawn(events::process_events(event_rx));

    let ledger = StockLedger::with_config(pool, event_sender, &cfg);

    // Catalog: two branches, one product sold by the bottle or the case.
    let main = ledger.catalog.create_branch("Main store".into(), true).await?;
    let kiosk = ledger
        .catalog
        .create_branch("Harbor kiosk".into(), false)
        .await?;
    let (water, units) = ledger
        .catalog
        .create_product(
            "Mineral water 600ml".into(),
            Some("Beverages".into()),
            dec!(24),
            vec![
                NewUnit {
                    name: "Botol".into(),
                    conversion_factor: dec!(1),
                    buy_price: dec!(2500),
                    sell_price: dec!(4000),
                    is_base_unit: true,
                    sort_order: 0,
                },
                NewUnit {
                    name: "Dus".into(),
                    conversion_factor: dec!(24),
                    buy_price: dec!(60000),
                    sell_price: dec!(90000),
                    is_base_unit: false,
                    sort_order: 1,
                },
            ],
        )
        .await?;
    let botol = units
        .iter()
        .find(|u| u.is_base_unit)
        .context("base unit missing")?;
    let dus = units
        .iter()
        .find(|u| u.name == "Dus")
        .context("case unit missing")?;
    info!(product_id = water.id, "Catalog seeded");

    // Goods receipt, submitted twice with the same idempotency key to
    // show the replay path.
    let purchase = |reference: &str| {
        StockMovementCommand::Purchase(ReceivePurchaseCommand {
            branch_id: Some(main.id),
            reference: reference.to_string(),
            supplier: Some("Tirta distribution".into()),
            note: None,
            lines: vec![PurchaseLineInput {
                product_id: water.id,
                unit_id: dus.id,
                quantity: dec!(5),
                unit_price: dec!(58000),
                expiry_date: None,
            }],
        })
    };
    let first = ledger
        .processor
        .submit(purchase("PO-2024-001"), Some("po-2024-001".into()))
        .await?;
    info!("Purchase applied: {:?}", first);
    let replay = ledger
        .processor
        .submit(purchase("PO-2024-001"), Some("po-2024-001".into()))
        .await?;
    if let MovementOutcome::Purchase(r) = &replay {
        info!(purchase_id = r.purchase_id, "Replay returned the stored outcome");
    }

    // Counter sale of ten bottles.
    let sale = ledger
        .processor
        .submit(
            StockMovementCommand::Sale(RecordSaleCommand {
                branch_id: Some(main.id),
                reference: Some("POS-000117".into()),
                lines: vec![SaleLineInput {
                    product_id: water.id,
                    unit_id: botol.id,
                    quantity: dec!(10),
                }],
            }),
            None,
        )
        .await?;
    info!("Sale applied: {:?}", sale);

    // Two bottles dropped in the stock room.
    ledger
        .processor
        .submit(
            StockMovementCommand::Adjustment(AdjustStockCommand {
                product_id: water.id,
                branch_id: Some(main.id),
                unit_id: botol.id,
                quantity: dec!(2),
                direction: AdjustmentDirection::Subtract,
                reason: "Broken during restocking".into(),
            }),
            None,
        )
        .await?;

    // Move two cases out to the kiosk.
    let requested = ledger
        .processor
        .submit(
            StockMovementCommand::TransferRequest(RequestTransferCommand {
                from_branch_id: main.id,
                to_branch_id: kiosk.id,
                note: Some("Weekend stocking".into()),
                lines: vec![TransferLineInput {
                    product_id: water.id,
                    unit_id: dus.id,
                    quantity: dec!(2),
                }],
            }),
            None,
        )
        .await?;
    let transfer_id = match &requested {
        MovementOutcome::TransferRequest(r) => r.transfer_id,
        other => anyhow::bail!("unexpected outcome {:?}", other),
    };
    ledger
        .processor
        .submit(
            StockMovementCommand::TransferShip(ShipTransferCommand { transfer_id }),
            None,
        )
        .await?;
    ledger
        .processor
        .submit(
            StockMovementCommand::TransferReceive(ReceiveTransferCommand { transfer_id }),
            None,
        )
        .await?;
    info!(transfer_id, "Transfer round trip finished");

    // Close of day: what the shelves are worth and whether the ledger
    // still adds up.
    let valuation = ledger.valuation.value_inventory().await?;
    for line in &valuation.products {
        info!(
            product = %line.product_name,
            stock_base = %line.global_stock,
            unit = %line.valued_unit,
            quantity = %line.unit_quantity,
            value = %line.value,
            "Valuation"
        );
    }
    info!(total = %valuation.total_value, "Inventory value");

    let audit = ledger.reconciliation.audit_product(water.id).await?;
    info!(
        consistent = audit.is_consistent(),
        global = %audit.global_stock,
        branches = %audit.branch_total,
        batches = %audit.batch_total,
        movements = %audit.movement_total,
        in_transit = %audit.in_transit,
        "Ledger audit"
    );

    Ok(())
}
