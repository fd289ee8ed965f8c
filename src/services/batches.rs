use crate::{
    entities::stock_batch::{self, Entity as StockBatch},
    errors::LedgerError,
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

/// One planned deduction against a single batch, in base units.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchDraw {
    pub batch_id: i64,
    pub draw_base: Decimal,
}

/// The full plan for consuming a required quantity across batches.
#[derive(Debug, Clone, Default)]
pub struct ConsumptionPlan {
    pub draws: Vec<BatchDraw>,
}

impl ConsumptionPlan {
    pub fn total_base(&self) -> Decimal {
        self.draws.iter().map(|d| d.draw_base).sum()
    }
}

/// Sorts batches into consumption order: dated batches by expiry
/// ascending, then undated batches, oldest receipt first, batch id as the
/// final tiebreaker.
pub fn fifo_order(batches: &mut [stock_batch::Model]) {
    batches.sort_by(|a, b| {
        (a.expiry_date.is_none(), a.expiry_date, a.created_at, a.id).cmp(&(
            b.expiry_date.is_none(),
            b.expiry_date,
            b.created_at,
            b.id,
        ))
    });
}

/// Plans an all-or-nothing consumption of `required_base` base units.
///
/// `batches` must already be in consumption order (see [`fifo_order`]).
/// Batches with nothing remaining are skipped. If the batches cannot cover
/// the requirement the plan fails with `InsufficientStock` and nothing is
/// drawn.
pub fn plan_consumption(
    product_id: i64,
    batches: &[stock_batch::Model],
    required_base: Decimal,
) -> Result<ConsumptionPlan, LedgerError> {
    if required_base <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "Consumption quantity must be positive, got {}",
            required_base
        )));
    }

    let mut plan = ConsumptionPlan::default();
    let mut still_needed = required_base;

    for batch in batches {
        if still_needed.is_zero() {
            break;
        }
        if batch.remaining_base <= Decimal::ZERO {
            continue;
        }
        let draw = batch.remaining_base.min(still_needed);
        plan.draws.push(BatchDraw {
            batch_id: batch.id,
            draw_base: draw,
        });
        still_needed -= draw;
    }

    if still_needed > Decimal::ZERO {
        let available: Decimal = batches
            .iter()
            .map(|b| b.remaining_base.max(Decimal::ZERO))
            .sum();
        return Err(LedgerError::insufficient_stock(
            product_id,
            required_base,
            available,
        ));
    }

    Ok(plan)
}

/// Loads and row-locks every batch of a product that still has stock,
/// returned in consumption order.
///
/// The locking SELECT orders by batch id so concurrent movements acquire
/// batch locks in the same sequence.
pub async fn lock_available_batches<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
) -> Result<Vec<stock_batch::Model>, LedgerError> {
    let mut batches = StockBatch::find()
        .filter(stock_batch::Column::ProductId.eq(product_id))
        .filter(stock_batch::Column::RemainingBase.gt(Decimal::ZERO))
        .order_by_asc(stock_batch::Column::Id)
        .lock_exclusive()
        .all(db)
        .await
        .map_err(LedgerError::db_error)?;
    fifo_order(&mut batches);
    Ok(batches)
}

/// Loads one batch without locking it. For mutation paths lock the
/// product first, then use [`lock_batch`].
pub async fn get_batch<C: ConnectionTrait>(
    db: &C,
    batch_id: i64,
) -> Result<stock_batch::Model, LedgerError> {
    StockBatch::find_by_id(batch_id)
        .one(db)
        .await
        .map_err(LedgerError::db_error)?
        .ok_or_else(|| LedgerError::NotFound(format!("Batch {} not found", batch_id)))
}

/// Loads and row-locks one batch by id.
pub async fn lock_batch<C: ConnectionTrait>(
    db: &C,
    batch_id: i64,
) -> Result<stock_batch::Model, LedgerError> {
    StockBatch::find()
        .filter(stock_batch::Column::Id.eq(batch_id))
        .lock_exclusive()
        .one(db)
        .await
        .map_err(LedgerError::db_error)?
        .ok_or_else(|| LedgerError::NotFound(format!("Batch {} not found", batch_id)))
}

/// Applies a consumption plan to the locked batches it was planned from.
pub async fn apply_consumption<C: ConnectionTrait>(
    db: &C,
    batches: &[stock_batch::Model],
    plan: &ConsumptionPlan,
) -> Result<(), LedgerError> {
    for draw in &plan.draws {
        let batch = batches
            .iter()
            .find(|b| b.id == draw.batch_id)
            .ok_or_else(|| {
                LedgerError::Integrity(format!(
                    "Consumption plan references batch {} that was not locked",
                    draw.batch_id
                ))
            })?;
        draw_from_batch(db, batch, draw.draw_base).await?;
    }
    Ok(())
}

/// Deducts `amount_base` from one locked batch.
pub async fn draw_from_batch<C: ConnectionTrait>(
    db: &C,
    batch: &stock_batch::Model,
    amount_base: Decimal,
) -> Result<stock_batch::Model, LedgerError> {
    let new_remaining = batch.remaining_base - amount_base;
    if new_remaining < Decimal::ZERO {
        return Err(LedgerError::insufficient_stock(
            batch.product_id,
            amount_base,
            batch.remaining_base,
        ));
    }

    let mut active: stock_batch::ActiveModel = batch.clone().into();
    active.remaining_base = Set(new_remaining);
    active.update(db).await.map_err(LedgerError::db_error)
}

/// Restores `amount_base` to one locked batch, e.g. when a completed
/// supplier return is cancelled. Restoring past the originally received
/// quantity means the ledger diverged somewhere.
pub async fn restore_to_batch<C: ConnectionTrait>(
    db: &C,
    batch: &stock_batch::Model,
    amount_base: Decimal,
) -> Result<stock_batch::Model, LedgerError> {
    let received_base = batch.received_quantity * batch.conversion_factor;
    let new_remaining = batch.remaining_base + amount_base;
    if new_remaining > received_base {
        return Err(LedgerError::Integrity(format!(
            "Restoring {} to batch {} would exceed its received quantity ({} > {})",
            amount_base, batch.id, new_remaining, received_base
        )));
    }

    let mut active: stock_batch::ActiveModel = batch.clone().into();
    active.remaining_base = Set(new_remaining);
    active.update(db).await.map_err(LedgerError::db_error)
}

/// Sum of `remaining_base` across all batches of a product.
pub async fn total_remaining_base<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
) -> Result<Decimal, LedgerError> {
    let batches = StockBatch::find()
        .filter(stock_batch::Column::ProductId.eq(product_id))
        .all(db)
        .await
        .map_err(LedgerError::db_error)?;
    Ok(batches.iter().map(|b| b.remaining_base).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::stock_batch::BatchKind;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn batch(id: i64, remaining: Decimal, expiry: Option<NaiveDate>) -> stock_batch::Model {
        stock_batch::Model {
            id,
            product_id: 1,
            purchase_line_id: None,
            kind: BatchKind::Purchase,
            unit_name: "Pcs".to_string(),
            conversion_factor: dec!(1),
            received_quantity: remaining,
            remaining_base: remaining,
            expiry_date: expiry,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(id),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn orders_dated_batches_before_undated() {
        let mut batches = vec![
            batch(1, dec!(5), None),
            batch(2, dec!(5), Some(date(2025, 2, 1))),
            batch(3, dec!(5), Some(date(2025, 1, 1))),
        ];
        fifo_order(&mut batches);
        let ids: Vec<i64> = batches.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn drains_earliest_expiry_first() {
        let batches = vec![
            batch(1, dec!(5), Some(date(2025, 1, 1))),
            batch(2, dec!(10), Some(date(2025, 2, 1))),
        ];
        let plan = plan_consumption(1, &batches, dec!(7)).unwrap();
        assert_eq!(
            plan.draws,
            vec![
                BatchDraw {
                    batch_id: 1,
                    draw_base: dec!(5)
                },
                BatchDraw {
                    batch_id: 2,
                    draw_base: dec!(2)
                },
            ]
        );
        assert_eq!(plan.total_base(), dec!(7));
    }

    #[test]
    fn skips_empty_batches() {
        let batches = vec![
            batch(1, dec!(0), Some(date(2025, 1, 1))),
            batch(2, dec!(10), Some(date(2025, 2, 1))),
        ];
        let plan = plan_consumption(1, &batches, dec!(4)).unwrap();
        assert_eq!(plan.draws.len(), 1);
        assert_eq!(plan.draws[0].batch_id, 2);
    }

    #[test]
    fn shortfall_fails_with_deficit() {
        let batches = vec![batch(1, dec!(30), None)];
        let err = plan_consumption(1, &batches, dec!(100)).unwrap_err();
        match err {
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => {
                assert_eq!(product_id, 1);
                assert_eq!(requested, dec!(100));
                assert_eq!(available, dec!(30));
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }
    }

    #[test]
    fn exact_drain_consumes_everything() {
        let batches = vec![
            batch(1, dec!(5), Some(date(2025, 1, 1))),
            batch(2, dec!(5), Some(date(2025, 2, 1))),
        ];
        let plan = plan_consumption(1, &batches, dec!(10)).unwrap();
        assert_eq!(plan.total_base(), dec!(10));
        assert_eq!(plan.draws.len(), 2);
    }

    #[test]
    fn zero_requirement_is_rejected() {
        let batches = vec![batch(1, dec!(5), None)];
        assert!(matches!(
            plan_consumption(1, &batches, dec!(0)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn undated_batches_fall_back_to_receipt_order() {
        let mut batches = vec![batch(9, dec!(5), None), batch(4, dec!(5), None)];
        fifo_order(&mut batches);
        let ids: Vec<i64> = batches.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![4, 9]);
    }
}
