use crate::{
    db::DbPool,
    entities::{
        product::{self, Entity as Product},
        product_unit,
    },
    errors::LedgerError,
    services::units::round_money,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::instrument;

/// Valuation of one product's global stock.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductValuation {
    pub product_id: i64,
    pub product_name: String,
    pub global_stock: Decimal,
    /// Name of the unit the value was computed in (the largest one).
    pub valued_unit: String,
    /// Global stock expressed in the valued unit.
    pub unit_quantity: Decimal,
    pub unit_buy_price: Decimal,
    pub value: Decimal,
}

/// Valuation of the whole inventory.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryValuation {
    pub products: Vec<ProductValuation>,
    pub total_value: Decimal,
}

/// Values stock at buy prices in each product's largest unit.
///
/// Pure read: running it twice against an unchanged ledger returns the
/// same numbers.
pub struct ValuationService {
    db_pool: Arc<DbPool>,
}

impl ValuationService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Values a single product's global stock.
    #[instrument(skip(self))]
    pub async fn value_product(&self, product_id: i64) -> Result<ProductValuation, LedgerError> {
        let db = self.db_pool.as_ref();
        let prod = Product::find_by_id(product_id)
            .one(db)
            .await
            .map_err(LedgerError::db_error)?
            .ok_or_else(|| LedgerError::NotFound(format!("Product {} not found", product_id)))?;

        let units = crate::services::units::units_for_product(db, product_id).await?;
        value_one(&prod, &units)
    }

    /// Values every active product holding stock and sums the result.
    #[instrument(skip(self))]
    pub async fn value_inventory(&self) -> Result<InventoryValuation, LedgerError> {
        let db = self.db_pool.as_ref();
        let products = Product::find()
            .filter(product::Column::IsActive.eq(true))
            .filter(product::Column::GlobalStock.gt(Decimal::ZERO))
            .all(db)
            .await
            .map_err(LedgerError::db_error)?;

        let mut valuations = Vec::with_capacity(products.len());
        let mut total = Decimal::ZERO;
        for prod in &products {
            let units = crate::services::units::units_for_product(db, prod.id).await?;
            let valuation = value_one(prod, &units)?;
            total += valuation.value;
            valuations.push(valuation);
        }

        Ok(InventoryValuation {
            products: valuations,
            total_value: total,
        })
    }
}

/// Picks the unit with the largest conversion factor.
pub fn largest_unit(units: &[product_unit::Model]) -> Option<&product_unit::Model> {
    units.iter().reduce(|best, candidate| {
        if candidate.conversion_factor > best.conversion_factor {
            candidate
        } else {
            best
        }
    })
}

fn value_one(
    prod: &product::Model,
    units: &[product_unit::Model],
) -> Result<ProductValuation, LedgerError> {
    let unit = largest_unit(units).ok_or_else(|| {
        LedgerError::Integrity(format!("Product {} has no units to value by", prod.id))
    })?;
    if unit.conversion_factor <= Decimal::ZERO {
        return Err(LedgerError::Integrity(format!(
            "Unit {} of product {} has non-positive conversion factor",
            unit.name, prod.id
        )));
    }

    let unit_quantity = prod.global_stock / unit.conversion_factor;
    let value = round_money(unit_quantity * unit.buy_price);

    Ok(ProductValuation {
        product_id: prod.id,
        product_name: prod.name.clone(),
        global_stock: prod.global_stock,
        valued_unit: unit.name.clone(),
        unit_quantity,
        unit_buy_price: unit.buy_price,
        value,
    })
}
