mod common;

use common::TestLedger;
use rust_decimal_macros::dec;
use stockledger::{
    commands::transfers::{
        CancelTransferCommand, ReceiveTransferCommand, RequestTransferCommand,
        ShipTransferCommand, TransferLineInput,
    },
    entities::stock_transfer::TransferStatus,
    errors::LedgerError,
    processor::{MovementOutcome, StockMovementCommand},
};

#[tokio::test]
async fn requesting_a_transfer_moves_nothing() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.case_of_twelve.id,
        dec!(5),
        dec!(29),
        None,
    )
    .await
    .expect("receipt");

    t.request_transfer(
        shop.main.id,
        shop.annex.id,
        shop.product.id,
        shop.case_of_twelve.id,
        dec!(2),
    )
    .await
    .expect("request");

    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(60));
    assert_eq!(t.branch_qty(shop.annex.id, shop.product.id).await, dec!(0));
    assert_eq!(t.global_qty(shop.product.id).await, dec!(60));
}

#[tokio::test]
async fn request_checks_source_stock_upfront() {
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

    // Two boxes are 24 pieces but the source only holds 10.
    let err = t
        .request_transfer(
            shop.main.id,
            shop.annex.id,
            shop.product.id,
            shop.case_of_twelve.id,
            dec!(2),
        )
        .await
        .expect_err("short source");
    match err {
        LedgerError::InsufficientStock {
            product_id,
            requested,
            available,
        } => {
            assert_eq!(product_id, shop.product.id);
            assert_eq!(requested, dec!(24));
            assert_eq!(available, dec!(10));
        }
        other => panic!("expected insufficient stock, got {:?}", other),
    }
}

#[tokio::test]
async fn transfer_to_the_same_branch_is_rejected() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    let err = t
        .request_transfer(
            shop.main.id,
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(1),
        )
        .await
        .expect_err("same branch");
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn shipping_deducts_source_but_not_global() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.case_of_twelve.id,
        dec!(5),
        dec!(29),
        None,
    )
    .await
    .expect("receipt");
    let transfer_id = t
        .request_transfer(
            shop.main.id,
            shop.annex.id,
            shop.product.id,
            shop.case_of_twelve.id,
            dec!(2),
        )
        .await
        .expect("request");

    let shipped = match t
        .submit(StockMovementCommand::TransferShip(ShipTransferCommand {
            transfer_id,
        }))
        .await
        .expect("ship")
    {
        MovementOutcome::TransferShip(r) => r,
        other => panic!("expected ship outcome, got {:?}", other),
    };

    assert_eq!(shipped.total_base_shipped, dec!(24));
    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(36));
    assert_eq!(t.branch_qty(shop.annex.id, shop.product.id).await, dec!(0));
    // 24 pieces are in transit: global keeps them, branch rows do not.
    assert_eq!(t.global_qty(shop.product.id).await, dec!(60));
    assert_eq!(t.movement_sum(shop.product.id).await, dec!(36));
}

#[tokio::test]
async fn receiving_lands_stock_at_the_destination() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.case_of_twelve.id,
        dec!(5),
        dec!(29),
        None,
    )
    .await
    .expect("receipt");
    let transfer_id = t
        .request_transfer(
            shop.main.id,
            shop.annex.id,
            shop.product.id,
            shop.case_of_twelve.id,
            dec!(2),
        )
        .await
        .expect("request");
    t.submit(StockMovementCommand::TransferShip(ShipTransferCommand {
        transfer_id,
    }))
    .await
    .expect("ship");

    let received = match t
        .submit(StockMovementCommand::TransferReceive(
            ReceiveTransferCommand { transfer_id },
        ))
        .await
        .expect("receive")
    {
        MovementOutcome::TransferReceive(r) => r,
        other => panic!("expected receive outcome, got {:?}", other),
    };

    assert_eq!(received.total_base_received, dec!(24));
    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(36));
    assert_eq!(t.branch_qty(shop.annex.id, shop.product.id).await, dec!(24));
    assert_eq!(t.global_qty(shop.product.id).await, dec!(60));
    assert_eq!(t.movement_sum(shop.product.id).await, dec!(60));
}

#[tokio::test]
async fn cancelling_a_pending_transfer_restores_nothing() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(30),
        dec!(2.50),
        None,
    )
    .await
    .expect("receipt");
    let transfer_id = t
        .request_transfer(
            shop.main.id,
            shop.annex.id,
            shop.product.id,
            shop.piece.id,
            dec!(10),
        )
        .await
        .expect("request");

    let cancelled = match t
        .submit(StockMovementCommand::TransferCancel(CancelTransferCommand {
            transfer_id,
            reason: Some("requested by branch manager".into()),
        }))
        .await
        .expect("cancel")
    {
        MovementOutcome::TransferCancel(r) => r,
        other => panic!("expected cancel outcome, got {:?}", other),
    };

    assert_eq!(cancelled.previous_status, TransferStatus::Pending);
    assert_eq!(cancelled.restored_base, dec!(0));
    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(30));
}

#[tokio::test]
async fn cancelling_a_shipped_transfer_returns_stock_to_source() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(30),
        dec!(2.50),
        None,
    )
    .await
    .expect("receipt");
    let transfer_id = t
        .request_transfer(
            shop.main.id,
            shop.annex.id,
            shop.product.id,
            shop.piece.id,
            dec!(10),
        )
        .await
        .expect("request");
    t.submit(StockMovementCommand::TransferShip(ShipTransferCommand {
        transfer_id,
    }))
    .await
    .expect("ship");
    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(20));

    let cancelled = match t
        .submit(StockMovementCommand::TransferCancel(CancelTransferCommand {
            transfer_id,
            reason: None,
        }))
        .await
        .expect("cancel")
    {
        MovementOutcome::TransferCancel(r) => r,
        other => panic!("expected cancel outcome, got {:?}", other),
    };

    assert_eq!(cancelled.previous_status, TransferStatus::Shipped);
    assert_eq!(cancelled.restored_base, dec!(10));
    assert_eq!(t.branch_qty(shop.main.id, shop.product.id).await, dec!(30));
    assert_eq!(t.branch_qty(shop.annex.id, shop.product.id).await, dec!(0));
    assert_eq!(t.global_qty(shop.product.id).await, dec!(30));
    assert_eq!(t.movement_sum(shop.product.id).await, dec!(30));
}

#[tokio::test]
async fn lifecycle_steps_must_run_in_order() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(30),
        dec!(2.50),
        None,
    )
    .await
    .expect("receipt");
    let transfer_id = t
        .request_transfer(
            shop.main.id,
            shop.annex.id,
            shop.product.id,
            shop.piece.id,
            dec!(10),
        )
        .await
        .expect("request");

    // Pending cannot be received.
    let err = t
        .submit(StockMovementCommand::TransferReceive(
            ReceiveTransferCommand { transfer_id },
        ))
        .await
        .expect_err("receive before ship");
    assert!(matches!(err, LedgerError::Conflict(_)));

    t.submit(StockMovementCommand::TransferShip(ShipTransferCommand {
        transfer_id,
    }))
    .await
    .expect("ship");

    // Shipped cannot be shipped again.
    let err = t
        .submit(StockMovementCommand::TransferShip(ShipTransferCommand {
            transfer_id,
        }))
        .await
        .expect_err("double ship");
    assert!(matches!(err, LedgerError::Conflict(_)));

    t.submit(StockMovementCommand::TransferReceive(
        ReceiveTransferCommand { transfer_id },
    ))
    .await
    .expect("receive");

    // Received is terminal.
    let err = t
        .submit(StockMovementCommand::TransferCancel(CancelTransferCommand {
            transfer_id,
            reason: None,
        }))
        .await
        .expect_err("cancel after receive");
    assert!(matches!(err, LedgerError::Conflict(_)));
}

#[tokio::test]
async fn shipping_can_breach_the_source_minimum() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop_with_minimum(dec!(48)).await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.case_of_twelve.id,
        dec!(5),
        dec!(29),
        None,
    )
    .await
    .expect("receipt");
    let transfer_id = t
        .request_transfer(
            shop.main.id,
            shop.annex.id,
            shop.product.id,
            shop.case_of_twelve.id,
            dec!(2),
        )
        .await
        .expect("request");

    let shipped = match t
        .submit(StockMovementCommand::TransferShip(ShipTransferCommand {
            transfer_id,
        }))
        .await
        .expect("ship")
    {
        MovementOutcome::TransferShip(r) => r,
        other => panic!("expected ship outcome, got {:?}", other),
    };

    assert_eq!(shipped.low_stock.len(), 1);
    assert_eq!(shipped.low_stock[0].quantity, dec!(36));
    assert_eq!(shipped.low_stock[0].minimum, dec!(48));
}

#[tokio::test]
async fn in_flight_transfer_survives_product_deactivation() {
    let t = TestLedger::new().await;
    let shop = t.seed_shop().await;

    t.receive(
        shop.main.id,
        shop.product.id,
        shop.piece.id,
        dec!(12),
        dec!(2.50),
        None,
    )
    .await
    .expect("receipt");
    let transfer_id = t
        .request_transfer(
            shop.main.id,
            shop.annex.id,
            shop.product.id,
            shop.piece.id,
            dec!(12),
        )
        .await
        .expect("request");
    t.submit(StockMovementCommand::TransferShip(ShipTransferCommand {
        transfer_id,
    }))
    .await
    .expect("ship");

    t.ledger
        .catalog
        .deactivate_product(shop.product.id)
        .await
        .expect("deactivate");

    // New requests are refused but the shipped stock still lands.
    let err = t
        .request_transfer(
            shop.annex.id,
            shop.main.id,
            shop.product.id,
            shop.piece.id,
            dec!(1),
        )
        .await
        .expect_err("new request on inactive product");
    assert!(matches!(err, LedgerError::Validation(_)));

    t.submit(StockMovementCommand::TransferReceive(
        ReceiveTransferCommand { transfer_id },
    ))
    .await
    .expect("receive lands despite deactivation");
    assert_eq!(t.branch_qty(shop.annex.id, shop.product.id).await, dec!(12));
}
