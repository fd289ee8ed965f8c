use crate::{
    entities::product_unit::{self, Entity as ProductUnit},
    errors::LedgerError,
};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};

/// Conversion data for one product unit, resolved at movement time.
///
/// The factor is the number of base units one of this unit contains.
/// Movements snapshot it into batches and transfer lines so later catalog
/// edits never reinterpret history.
#[derive(Debug, Clone)]
pub struct UnitConversion {
    pub unit_id: i64,
    pub unit_name: String,
    pub factor: Decimal,
}

impl UnitConversion {
    pub fn to_base(&self, quantity: Decimal) -> Decimal {
        to_base(quantity, self.factor)
    }

    pub fn from_base(&self, base_quantity: Decimal) -> Decimal {
        base_quantity / self.factor
    }
}

impl From<&product_unit::Model> for UnitConversion {
    fn from(unit: &product_unit::Model) -> Self {
        Self {
            unit_id: unit.id,
            unit_name: unit.name.clone(),
            factor: unit.conversion_factor,
        }
    }
}

/// Converts a quantity in some unit into base units.
pub fn to_base(quantity: Decimal, factor: Decimal) -> Decimal {
    quantity * factor
}

/// Rounds a monetary amount to two decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Looks up a unit row and checks it belongs to the given product.
pub async fn resolve_unit_model<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
    unit_id: i64,
) -> Result<product_unit::Model, LedgerError> {
    let unit = ProductUnit::find_by_id(unit_id)
        .one(db)
        .await
        .map_err(LedgerError::db_error)?
        .ok_or_else(|| LedgerError::NotFound(format!("Unit {} not found", unit_id)))?;

    if unit.product_id != product_id {
        return Err(LedgerError::Validation(format!(
            "Unit {} does not belong to product {}",
            unit_id, product_id
        )));
    }
    if unit.conversion_factor <= Decimal::ZERO {
        return Err(LedgerError::Integrity(format!(
            "Unit {} of product {} has non-positive conversion factor {}",
            unit.name, product_id, unit.conversion_factor
        )));
    }

    Ok(unit)
}

/// Like [`resolve_unit_model`], reduced to the conversion data movements
/// snapshot.
pub async fn resolve_unit<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
    unit_id: i64,
) -> Result<UnitConversion, LedgerError> {
    let unit = resolve_unit_model(db, product_id, unit_id).await?;
    Ok(UnitConversion::from(&unit))
}

/// Returns the base unit of a product (the row with `is_base_unit = true`).
pub async fn base_unit<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
) -> Result<product_unit::Model, LedgerError> {
    ProductUnit::find()
        .filter(product_unit::Column::ProductId.eq(product_id))
        .filter(product_unit::Column::IsBaseUnit.eq(true))
        .one(db)
        .await
        .map_err(LedgerError::db_error)?
        .ok_or_else(|| {
            LedgerError::Integrity(format!("Product {} has no base unit", product_id))
        })
}

/// All units of a product, in catalog display order.
pub async fn units_for_product<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
) -> Result<Vec<product_unit::Model>, LedgerError> {
    ProductUnit::find()
        .filter(product_unit::Column::ProductId.eq(product_id))
        .order_by_asc(product_unit::Column::SortOrder)
        .order_by_asc(product_unit::Column::Id)
        .all(db)
        .await
        .map_err(LedgerError::db_error)
}
