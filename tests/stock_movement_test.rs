mod common;

use chrono::NaiveDate;
use common::TestLedger;
use rust_decimal_macros::dec;
use stockledger::{
    commands::stock::{AdjustmentDirection, PurchaseLineInput, ReceivePurchaseCommand},
    errors::LedgerError,
    processor::{MovementOutcome, StockMovementCommand},
    services::stock,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[tokio::test]
async fn purchase_converts_packs_to_base_units() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    let receipt = t
        .receive(
            shop.main.id,
            shop.product.id,
            shop.case_of_twelve.id,
            dec!(5),
            dec!(29),
            None,
        )
        .await
        .expect("receipt");

    assert_eq!(receipt.total_base_added, dec!(60));
    assert_eq!(receipt.batch_ids.len(), 1);
    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(60));
    assert_eq!(t.global_qty(shop.product.id).await, dec!(60));
    assert_eq!(t.batch_remaining(receipt.batch_ids[0]).await, dec!(60));
}

#[tokio::test]
async fn sales_consume_expiring_batches_first() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    // Received first but expires later.
    let late = t
        .receive(
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(20),
            dec!(2.50),
            Some(date(2026, 12, 1)),
        )
        .await
        .expect("late batch");
    // Received second but expires sooner, so it must drain first.
    let soon = t
        .receive(
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(20),
            dec!(2.50),
            Some(date(2026, 9, 1)),
        )
        .await
        .expect("soon batch");
    // Undated stock is consumed last.
    let undated = t
        .receive(
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(20),
            dec!(2.50),
            None,
        )
        .await
        .expect("undated batch");

    t.sell(shop.main.id, shop.product.id, shop.piece.id, dec!(25))
        .await
        .expect("sale");

    assert_eq!(t.batch_remaining(soon.batch_ids[0]).await, dec!(0));
    assert_eq!(t.batch_remaining(late.batch_ids[0]).await, dec!(15));
    assert_eq!(t.batch_remaining(undated.batch_ids[0]).await, dec!(20));
    assert_eq!(t.global_qty(shop.product.id).await, dec!(35));
}

#[tokio::test]
async fn oversell_fails_atomically() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(10),
        dec!(2.50),
        None,
    )
    .await
    .expect("receipt");

    let err = t
        .sell(shop.main.id, shop.product.id, shop.piece.id, dec!(11))
        .await
        .expect_err("oversell must fail");
    match err {
        LedgerError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, shop.product.id);
            assert_eq!(requested, dec!(11));
            assert_eq!(available, dec!(10));
        }
        other => panic!("expected insufficient stock, got {:?}", other),
    }

    // Nothing moved.
    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(10));
    assert_eq!(t.global_qty(shop.product.id).await, dec!(10));
    assert_eq!(t.movement_sum(shop.product.id).await, dec!(10));
}

#[tokio::test]
async fn selling_a_pack_draws_twelve_base_units() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.case_of_twelve.id,
        dec!(2),
        dec!(29),
        None,
    )
    .await
    .expect("receipt");

    let sale = t
        .sell(
            shop.main.id,
            shop.product.id,
            shop.case_of_twelve.id,
            dec!(1),
        )
        .await
        .expect("sale");

    assert_eq!(sale.total_base_deducted, dec!(12));
    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(12));
}

#[tokio::test]
async fn subtract_adjustment_follows_consumption_order() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    let first = t
        .receive(
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(6),
            dec!(2.50),
            Some(date(2026, 10, 1)),
        )
        .await
        .expect("first");
    let second = t
        .receive(
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(6),
            dec!(2.50),
            None,
        )
        .await
        .expect("second");

    let adjustment = t
        .adjust(
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(8),
            AdjustmentDirection::Subtract,
        )
        .await
        .expect("adjustment");

    assert_eq!(adjustment.quantity_base, dec!(8));
    assert_eq!(adjustment.new_branch_quantity, dec!(4));
    assert_eq!(adjustment.new_global_stock, dec!(4));
    assert_eq!(t.batch_remaining(first.batch_ids[0]).await, dec!(0));
    assert_eq!(t.batch_remaining(second.batch_ids[0]).await, dec!(4));
}

#[tokio::test]
async fn add_adjustment_creates_a_traceable_batch() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    let adjustment = t
        .adjust(
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(7),
            AdjustmentDirection::Add,
        )
        .await
        .expect("adjustment");

    assert_eq!(adjustment.batch_ids.len(), 1);
    assert_eq!(t.batch_remaining(adjustment.batch_ids[0]).await, dec!(7));
    assert_eq!(t.global_qty(shop.product.id).await, dec!(7));
    assert!(adjustment.low_stock.is_none());

    // The created batch participates in FIFO like any purchase batch.
    t.sell(shop.main.id, shop.product.id, shop.piece.id, dec!(3))
        .await
        .expect("sale");
    assert_eq!(t.batch_remaining(adjustment.batch_ids[0]).await, dec!(4));
}

#[tokio::test]
async fn sale_below_minimum_reports_low_stock() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop_with_minimum(dec!(12)).await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(20),
        dec!(2.50),
        None,
    )
    .await
    .expect("receipt");

    let above = t
        .sell(shop.main.id, shop.product.id, shop.piece.id, dec!(5))
        .await
        .expect("first sale");
    assert!(above.low_stock.is_empty());

    let below = t
        .sell(shop.main.id, shop.product.id, shop.piece.id, dec!(5))
        .await
        .expect("second sale");
    assert_eq!(below.low_stock.len(), 1);
    let alert = &below.low_stock[0];
    assert_eq!(alert.product_id, shop.product.id);
    assert_eq!(alert.branch_id, shop.main.id);
    assert_eq!(alert.quantity, dec!(10));
    assert_eq!(alert.minimum, dec!(12));
}

#[tokio::test]
async fn purchase_price_change_reprices_all_units() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    // Catalog buy price for a box is 29; receive at 32 instead.
    let receipt = t
        .receive(
            shop.main.id,
            shop.product.id,
            shop.case_of_twelve.id,
            dec!(3),
            dec!(32),
            None,
        )
        .await
        .expect("receipt");
    assert_eq!(receipt.repriced.len(), 1);
    assert_eq!(receipt.repriced[0].0, shop.product.id);
    assert_eq!(receipt.repriced[0].1, 2);

    let units = stockledger::services::units::units_for_product(
        t.pool.as_ref(),
        shop.product.id,
    )
    .await
    .expect("units");
    let piece = units.iter().find(|u| u.is_base_unit).expect("piece");
    let case = units.iter().find(|u| !u.is_base_unit).expect("case");
    // 32 per twelve-pack puts the piece at 32/12 rounded to money scale.
    assert_eq!(piece.buy_price, dec!(2.67));
    assert_eq!(case.buy_price, dec!(32));
}

#[tokio::test]
async fn idempotency_key_replays_without_reapplying() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    let command = || {
        StockMovementCommand::Purchase(ReceivePurchaseCommand {
            branch_id: Some(shop.main.id),
            reference: "PO-77".into(),
            supplier: None,
            note: None,
            lines: vec![PurchaseLineInput {
                product_id: shop.product.id,
                unit_id: shop.piece.id,
                quantity: dec!(10),
                unit_price: dec!(2.50),
                expiry_date: None,
            }],
        })
    };

    let first = t
        .ledger
        .processor
        .submit(command(), Some("po-77".into()))
        .await
        .expect("first submission");
    let second = t
        .ledger
        .processor
        .submit(command(), Some("po-77".into()))
        .await
        .expect("replayed submission");

    let (first_id, second_id) = match (&first, &second) {
        (MovementOutcome::Purchase(a), MovementOutcome::Purchase(b)) => {
            (a.purchase_id, b.purchase_id)
        }
        other => panic!("expected purchase outcomes, got {:?}", other),
    };
    assert_eq!(first_id, second_id);
    assert_eq!(t.global_qty(shop.product.id).await, dec!(10));

    // A different key applies a fresh movement.
    t.ledger
        .processor
        .submit(command(), Some("po-78".into()))
        .await
        .expect("new key");
    assert_eq!(t.global_qty(shop.product.id).await, dec!(20));
}

#[tokio::test]
async fn failed_submission_releases_its_idempotency_key() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    let sale = || {
        StockMovementCommand::Sale(stockledger::commands::stock::RecordSaleCommand {
            branch_id: Some(shop.main.id),
            reference: None,
            lines: vec![stockledger::commands::stock::SaleLineInput {
                product_id: shop.product.id,
                unit_id: shop.piece.id,
                quantity: dec!(4),
            }],
        })
    };

    // No stock yet, so the first submission fails.
    t.ledger
        .processor
        .submit(sale(), Some("pos-1".into()))
        .await
        .expect_err("sale without stock");

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(4),
        dec!(2.50),
        None,
    )
    .await
    .expect("receipt");

    // Same key is free again after the failure.
    t.ledger
        .processor
        .submit(sale(), Some("pos-1".into()))
        .await
        .expect("retry with same key");
    assert_eq!(t.global_qty(shop.product.id).await, dec!(0));
}

#[tokio::test]
async fn inactive_product_rejects_movements() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(5),
        dec!(2.50),
        None,
    )
    .await
    .expect("receipt");

    t.ledger
        .catalog
        .deactivate_product(shop.product.id)
        .await
        .expect("deactivate");

    let err = t
        .sell(shop.main.id, shop.product.id, shop.piece.id, dec!(1))
        .await
        .expect_err("inactive product");
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn unit_of_another_product_is_rejected() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;
    let (other, other_units) = t
        .ledger
        .catalog
        .create_product(
            "Bottled tea".into(),
            None,
            dec!(0),
            vec![stockledger::services::catalog::NewUnit {
                name: "Pcs".into(),
                conversion_factor: dec!(1),
                buy_price: dec!(1),
                sell_price: dec!(2),
                is_base_unit: true,
                sort_order: 0,
            }],
        )
        .await
        .expect("other product");
    assert!(other.id != shop.product.id);

    let err = t
        .receive(
            shop.main.id,
            shop.product.id,
            other_units[0].id,
            dec!(1),
            dec!(1),
            None,
        )
        .await
        .expect_err("foreign unit");
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn movement_log_matches_branch_totals() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.case_of_twelve.id,
        dec!(4),
        dec!(29),
        None,
    )
    .await
    .expect("receipt");
    t.sell(shop.main.id, shop.product.id, shop.piece.id, dec!(17))
        .await
        .expect("sale");
    t.adjust(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(2),
        AdjustmentDirection::Subtract,
    )
    .await
    .expect("shrinkage");

    let branch_total = t.branch_qty(shop.main.id, shop.product.id).await;
    assert_eq!(branch_total, dec!(29));
    assert_eq!(t.movement_sum(shop.product.id).await, branch_total);
    assert_eq!(t.global_qty(shop.product.id).await, branch_total);
}

#[tokio::test]
async fn low_stock_scan_lists_only_breached_branches() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop_with_minimum(dec!(12)).await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(20),
        dec!(2.50),
        None,
    )
    .await
    .expect("main receipt");
    t.receive(
        shop.annex.id,
        shop.product.id,
        shop.piece.id,
        dec!(15),
        dec!(2.50),
        None,
    )
    .await
    .expect("annex receipt");
    t.sell(shop.main.id, shop.product.id, shop.piece.id, dec!(11))
        .await
        .expect("sale");

    let rows = stock::low_stock_candidates(t.pool.as_ref())
        .await
        .expect("scan");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].product_id, shop.product.id);
    assert_eq!(rows[0].branch_id, shop.main.id);
    assert_eq!(rows[0].quantity, dec!(9));
    assert_eq!(rows[0].minimum, dec!(12));

    t.ledger
        .catalog
        .deactivate_product(shop.product.id)
        .await
        .expect("deactivate");
    let rows = stock::low_stock_candidates(t.pool.as_ref())
        .await
        .expect("scan after deactivation");
    assert!(rows.is_empty());
}
