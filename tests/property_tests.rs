//! Property-based tests for the batch planner and price derivation.
//!
//! These use proptest to check the invariants that the ledger's
//! correctness hangs on: consumption plans cover exactly what was asked
//! or fail with the true deficit, consumption order is stable, and
//! derived prices stay consistent with the base price.

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stockledger::{
    entities::{
        product_unit,
        stock_batch::{self, BatchKind},
    },
    errors::LedgerError,
    services::{
        batches::{fifo_order, plan_consumption},
        catalog::derive_buy_prices,
        units::{round_money, to_base},
    },
};

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
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::seconds(id),
    }
}

fn expiry_strategy() -> impl Strategy<Value = Option<NaiveDate>> {
    proptest::option::of(
        (0i64..720)
            .prop_map(|days| NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Duration::days(days)),
    )
}

fn batch_set_strategy() -> impl Strategy<Value = Vec<stock_batch::Model>> {
    proptest::collection::vec((0u32..=500, expiry_strategy()), 1..10).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (remaining, expiry))| batch(i as i64 + 1, Decimal::from(remaining), expiry))
            .collect()
    })
}

fn unit_model(id: i64, factor: Decimal, buy: Decimal) -> product_unit::Model {
    product_unit::Model {
        id,
        product_id: 1,
        name: format!("Unit{}", id),
        conversion_factor: factor,
        buy_price: buy,
        sell_price: Decimal::ZERO,
        is_base_unit: factor == Decimal::ONE,
        sort_order: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn unit_set_strategy() -> impl Strategy<Value = Vec<product_unit::Model>> {
    proptest::collection::vec((2u32..=500, 0u64..10_000_000), 0..4).prop_map(|raw| {
        let mut units = vec![unit_model(1, Decimal::ONE, dec!(0))];
        units.extend(raw.into_iter().enumerate().map(|(i, (factor, cents))| {
            unit_model(i as i64 + 2, Decimal::from(factor), Decimal::new(cents as i64, 2))
        }));
        units
    })
}

// Property: a consumption plan covers exactly the requirement, or fails
// carrying the true totals.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn plan_covers_the_requirement_or_reports_the_deficit(
        mut batches in batch_set_strategy(),
        required in 1u32..=1500,
    ) {
        fifo_order(&mut batches);
        let required = Decimal::from(required);
        let available: Decimal = batches.iter().map(|b| b.remaining_base).sum();

        match plan_consumption(1, &batches, required) {
            Ok(plan) => {
                prop_assert!(available >= required);
                prop_assert_eq!(plan.total_base(), required);
            }
            Err(LedgerError::InsufficientStock {
                product_id,
                requested,
                available: reported,
            }) => {
                prop_assert!(available < required);
                prop_assert_eq!(product_id, 1);
                prop_assert_eq!(requested, required);
                prop_assert_eq!(reported, available);
            }
            Err(other) => prop_assert!(false, "unexpected error: {:?}", other),
        }
    }

    #[test]
    fn draws_respect_batch_remainders_and_order(
        mut batches in batch_set_strategy(),
        required in 1u32..=1500,
    ) {
        fifo_order(&mut batches);
        if let Ok(plan) = plan_consumption(1, &batches, Decimal::from(required)) {
            let mut last_position = None;
            for draw in &plan.draws {
                let position = batches
                    .iter()
                    .position(|b| b.id == draw.batch_id)
                    .expect("draw references a known batch");
                prop_assert!(draw.draw_base > Decimal::ZERO);
                prop_assert!(draw.draw_base <= batches[position].remaining_base);
                if let Some(last) = last_position {
                    prop_assert!(position > last, "plan revisited or reordered batches");
                }
                last_position = Some(position);
            }
        }
    }
}

// Property: consumption order is a stable total order over any batch set.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn fifo_order_sorts_dated_stock_first(mut batches in batch_set_strategy()) {
        let mut original_ids: Vec<i64> = batches.iter().map(|b| b.id).collect();
        fifo_order(&mut batches);

        // Same batches, just reordered.
        let mut sorted_ids: Vec<i64> = batches.iter().map(|b| b.id).collect();
        original_ids.sort_unstable();
        sorted_ids.sort_unstable();
        prop_assert_eq!(original_ids, sorted_ids);

        // No dated batch may follow an undated one, and dated batches
        // run in ascending expiry.
        let mut seen_undated = false;
        let mut last_expiry: Option<NaiveDate> = None;
        for b in &batches {
            match b.expiry_date {
                Some(expiry) => {
                    prop_assert!(!seen_undated, "dated batch after undated batch");
                    if let Some(last) = last_expiry {
                        prop_assert!(expiry >= last, "expiry order regressed");
                    }
                    last_expiry = Some(expiry);
                }
                None => seen_undated = true,
            }
        }
    }

    #[test]
    fn fifo_order_is_idempotent(mut batches in batch_set_strategy()) {
        fifo_order(&mut batches);
        let once: Vec<i64> = batches.iter().map(|b| b.id).collect();
        fifo_order(&mut batches);
        let twice: Vec<i64> = batches.iter().map(|b| b.id).collect();
        prop_assert_eq!(once, twice);
    }
}

// Property: money rounding never moves an amount by more than half a cent.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn money_rounding_stays_within_half_a_cent(
        mantissa in -1_000_000_000i64..1_000_000_000,
        scale in 0u32..6,
    ) {
        let amount = Decimal::new(mantissa, scale);
        let rounded = round_money(amount);
        prop_assert!((rounded - amount).abs() <= dec!(0.005));
        prop_assert!((rounded * dec!(100)).fract().is_zero(), "more than two decimals");
    }
}

// Property: price derivation keeps the source exact and every sibling on
// the implied base price.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn derived_prices_follow_the_source_unit(
        units in unit_set_strategy(),
        source in any::<prop::sample::Index>(),
        cents in 0u64..100_000_000,
    ) {
        let source_unit = units[source.index(units.len())].clone();
        let new_price = Decimal::new(cents as i64, 2);

        let prices = derive_buy_prices(&units, source_unit.id, new_price).unwrap();
        prop_assert_eq!(prices.len(), units.len());

        for (unit_id, price) in prices {
            let unit = units.iter().find(|u| u.id == unit_id).unwrap();
            if unit.id == source_unit.id {
                prop_assert_eq!(price, new_price, "source unit must keep its price");
            } else {
                // Exact proportional price, before money rounding.
                let exact =
                    new_price * unit.conversion_factor / source_unit.conversion_factor;
                prop_assert!(
                    (price - exact).abs() <= dec!(0.005),
                    "unit {} drifted from the implied base price: {} vs {}",
                    unit_id,
                    price,
                    exact
                );
                prop_assert!(price >= Decimal::ZERO);
            }
        }
    }
}

// Property: integral quantities survive the round trip through base units.
proptest! {
    #[test]
    fn unit_conversion_round_trips_for_integral_quantities(
        quantity in 1u32..=10_000,
        factor in 1u32..=500,
    ) {
        let quantity = Decimal::from(quantity);
        let factor = Decimal::from(factor);
        let base = to_base(quantity, factor);
        prop_assert_eq!(base / factor, quantity);
    }
}
