use crate::{
    db::DbPool,
    entities::{
        branch::{self, Entity as Branch},
        product::{self, Entity as Product},
        product_unit::{self, Entity as ProductUnit},
    },
    errors::LedgerError,
    events::{EventSender, LedgerEvent},
    services::units::round_money,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
    TransactionError, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument};

/// One unit definition supplied when creating a product.
#[derive(Debug, Clone)]
pub struct NewUnit {
    pub name: String,
    pub conversion_factor: Decimal,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub is_base_unit: bool,
    pub sort_order: i32,
}

/// Ledger-side slice of the catalog: product and branch rows plus the
/// buy-price writeback that purchases trigger.
pub struct CatalogService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Creates a product together with its full unit set.
    #[instrument(skip(self, units))]
    pub async fn create_product(
        &self,
        name: String,
        category: Option<String>,
        minimum_stock: Decimal,
        units: Vec<NewUnit>,
    ) -> Result<(product::Model, Vec<product_unit::Model>), LedgerError> {
        validate_unit_set(&units)?;
        if name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Product name must not be empty".to_string(),
            ));
        }
        if minimum_stock < Decimal::ZERO {
            return Err(LedgerError::Validation(
                "Minimum stock must not be negative".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let created = db
            .transaction::<_, (product::Model, Vec<product_unit::Model>), LedgerError>(
                move |txn| {
                    Box::pin(async move {
                        let now = Utc::now();
                        let prod = product::ActiveModel {
                            name: Set(name),
                            category: Set(category),
                            minimum_stock: Set(minimum_stock),
                            global_stock: Set(Decimal::ZERO),
                            is_active: Set(true),
                            created_at: Set(now),
                            updated_at: Set(now),
                            ..Default::default()
                        }
                        .insert(txn)
                        .await
                        .map_err(LedgerError::db_error)?;

                        let mut created_units = Vec::with_capacity(units.len());
                        for unit in units {
                            let row = product_unit::ActiveModel {
                                product_id: Set(prod.id),
                                name: Set(unit.name),
                                conversion_factor: Set(unit.conversion_factor),
                                buy_price: Set(unit.buy_price),
                                sell_price: Set(unit.sell_price),
                                is_base_unit: Set(unit.is_base_unit),
                                sort_order: Set(unit.sort_order),
                                created_at: Set(now),
                                updated_at: Set(now),
                                ..Default::default()
                            }
                            .insert(txn)
                            .await
                            .map_err(LedgerError::db_error)?;
                            created_units.push(row);
                        }

                        Ok((prod, created_units))
                    })
                },
            )
            .await
            .map_err(unwrap_transaction_error)?;

        info!(
            product_id = created.0.id,
            unit_count = created.1.len(),
            "Product created"
        );
        Ok(created)
    }

    /// Marks a product inactive. Movements against it are rejected from
    /// then on; history and batches stay untouched.
    #[instrument(skip(self))]
    pub async fn deactivate_product(&self, product_id: i64) -> Result<(), LedgerError> {
        let db = self.db_pool.as_ref();
        let prod = Product::find_by_id(product_id)
            .one(db)
            .await
            .map_err(LedgerError::db_error)?
            .ok_or_else(|| LedgerError::NotFound(format!("Product {} not found", product_id)))?;

        let mut active: product::ActiveModel = prod.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        active.update(db).await.map_err(LedgerError::db_error)?;
        Ok(())
    }

    /// Creates a branch. Flagging it as main demotes the previous main
    /// branch so the no-branch fallback stays unambiguous.
    #[instrument(skip(self))]
    pub async fn create_branch(
        &self,
        name: String,
        is_main: bool,
    ) -> Result<branch::Model, LedgerError> {
        if name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Branch name must not be empty".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        db.transaction::<_, branch::Model, LedgerError>(move |txn| {
            Box::pin(async move {
                if is_main {
                    let mains = Branch::find()
                        .filter(branch::Column::IsMain.eq(true))
                        .all(txn)
                        .await
                        .map_err(LedgerError::db_error)?;
                    for main in mains {
                        let mut active: branch::ActiveModel = main.into();
                        active.is_main = Set(false);
                        active.updated_at = Set(Utc::now());
                        active.update(txn).await.map_err(LedgerError::db_error)?;
                    }
                }

                let now = Utc::now();
                branch::ActiveModel {
                    name: Set(name),
                    is_main: Set(is_main),
                    is_active: Set(true),
                    created_at: Set(now),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(LedgerError::db_error)
            })
        })
        .await
        .map_err(unwrap_transaction_error)
    }

    /// Sets one unit's buy price and re-derives every sibling unit from
    /// the implied base price.
    #[instrument(skip(self))]
    pub async fn update_buy_price(
        &self,
        product_id: i64,
        unit_id: i64,
        new_buy_price: Decimal,
    ) -> Result<Vec<product_unit::Model>, LedgerError> {
        if new_buy_price < Decimal::ZERO {
            return Err(LedgerError::Validation(
                "Buy price must not be negative".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let updated = db
            .transaction::<_, Vec<product_unit::Model>, LedgerError>(move |txn| {
                Box::pin(
                    async move { propagate_buy_price(txn, product_id, unit_id, new_buy_price).await },
                )
            })
            .await
            .map_err(unwrap_transaction_error)?;

        self.event_sender
            .send(LedgerEvent::PriceRecalculated {
                product_id,
                unit_count: updated.len(),
            })
            .await
            .map_err(LedgerError::Event)?;

        Ok(updated)
    }
}

/// Computes the new buy price for every unit of a product after one
/// unit's price changed: the source keeps the given price, the others are
/// re-derived from the implied base price by their own factor and
/// money-rounded.
pub fn derive_buy_prices(
    units: &[product_unit::Model],
    source_unit_id: i64,
    new_buy_price: Decimal,
) -> Result<Vec<(i64, Decimal)>, LedgerError> {
    let source = units
        .iter()
        .find(|u| u.id == source_unit_id)
        .ok_or_else(|| LedgerError::NotFound(format!("Unit {} not found", source_unit_id)))?;
    if source.conversion_factor <= Decimal::ZERO {
        return Err(LedgerError::Integrity(format!(
            "Unit {} has non-positive conversion factor",
            source_unit_id
        )));
    }

    let base_price = new_buy_price / source.conversion_factor;
    Ok(units
        .iter()
        .map(|u| {
            let price = if u.id == source_unit_id {
                new_buy_price
            } else {
                round_money(base_price * u.conversion_factor)
            };
            (u.id, price)
        })
        .collect())
}

/// Applies [`derive_buy_prices`] inside the caller's transaction.
///
/// Used both by the catalog surface and by purchase receipt, which feeds
/// back the price actually paid.
pub async fn propagate_buy_price<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
    source_unit_id: i64,
    new_buy_price: Decimal,
) -> Result<Vec<product_unit::Model>, LedgerError> {
    let units = ProductUnit::find()
        .filter(product_unit::Column::ProductId.eq(product_id))
        .all(db)
        .await
        .map_err(LedgerError::db_error)?;

    let new_prices = derive_buy_prices(&units, source_unit_id, new_buy_price)?;

    let mut updated = Vec::with_capacity(units.len());
    for unit in units {
        let (_, price) = new_prices
            .iter()
            .find(|(id, _)| *id == unit.id)
            .copied()
            .ok_or_else(|| {
                LedgerError::Integrity(format!("Price derivation missed unit {}", unit.id))
            })?;
        if price == unit.buy_price {
            updated.push(unit);
            continue;
        }
        let mut active: product_unit::ActiveModel = unit.into();
        active.buy_price = Set(price);
        active.updated_at = Set(Utc::now());
        updated.push(active.update(db).await.map_err(LedgerError::db_error)?);
    }
    Ok(updated)
}

fn validate_unit_set(units: &[NewUnit]) -> Result<(), LedgerError> {
    if units.is_empty() {
        return Err(LedgerError::Validation(
            "A product needs at least one unit".to_string(),
        ));
    }

    let base_units: Vec<&NewUnit> = units.iter().filter(|u| u.is_base_unit).collect();
    if base_units.len() != 1 {
        return Err(LedgerError::Validation(format!(
            "A product needs exactly one base unit, got {}",
            base_units.len()
        )));
    }
    if base_units[0].conversion_factor != Decimal::ONE {
        return Err(LedgerError::Validation(
            "The base unit's conversion factor must be 1".to_string(),
        ));
    }

    for unit in units {
        if unit.name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Unit name must not be empty".to_string(),
            ));
        }
        if unit.conversion_factor <= Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "Unit {} must have a positive conversion factor",
                unit.name
            )));
        }
        if unit.buy_price < Decimal::ZERO || unit.sell_price < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "Unit {} must not have negative prices",
                unit.name
            )));
        }
    }

    let mut names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    if names.len() != units.len() {
        return Err(LedgerError::Validation(
            "Unit names must be unique per product".to_string(),
        ));
    }

    Ok(())
}

fn unwrap_transaction_error(err: TransactionError<LedgerError>) -> LedgerError {
    match err {
        TransactionError::Connection(db_err) => LedgerError::db_error(db_err),
        TransactionError::Transaction(ledger_err) => ledger_err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn unit(id: i64, name: &str, factor: Decimal, buy: Decimal, is_base: bool) -> product_unit::Model {
        product_unit::Model {
            id,
            product_id: 1,
            name: name.to_string(),
            conversion_factor: factor,
            buy_price: buy,
            sell_price: Decimal::ZERO,
            is_base_unit: is_base,
            sort_order: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn new_unit(name: &str, factor: Decimal, is_base: bool) -> NewUnit {
        NewUnit {
            name: name.to_string(),
            conversion_factor: factor,
            buy_price: Decimal::ZERO,
            sell_price: Decimal::ZERO,
            is_base_unit: is_base,
            sort_order: 0,
        }
    }

    #[test]
    fn derives_sibling_prices_from_base() {
        let units = vec![
            unit(1, "Pcs", dec!(1), dec!(1000), true),
            unit(2, "Dus", dec!(24), dec!(20000), false),
        ];
        // New Dus price 30000 implies base 1250, so Pcs follows.
        let prices = derive_buy_prices(&units, 2, dec!(30000)).unwrap();
        assert_eq!(prices, vec![(1, dec!(1250.00)), (2, dec!(30000))]);
    }

    #[test]
    fn rounds_derived_prices_to_money() {
        let units = vec![
            unit(1, "Pcs", dec!(1), dec!(0), true),
            unit(2, "Pack", dec!(3), dec!(0), false),
        ];
        // Base 1000/3 = 333.33..., Pack keeps the exact source price.
        let prices = derive_buy_prices(&units, 2, dec!(1000)).unwrap();
        assert_eq!(prices[0], (1, dec!(333.33)));
        assert_eq!(prices[1], (2, dec!(1000)));
    }

    #[test]
    fn unknown_source_unit_is_rejected() {
        let units = vec![unit(1, "Pcs", dec!(1), dec!(0), true)];
        assert!(matches!(
            derive_buy_prices(&units, 99, dec!(100)),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn unit_set_requires_exactly_one_base() {
        let no_base = vec![new_unit("Pcs", dec!(1), false)];
        assert!(validate_unit_set(&no_base).is_err());

        let two_bases = vec![
            new_unit("Pcs", dec!(1), true),
            new_unit("Each", dec!(1), true),
        ];
        assert!(validate_unit_set(&two_bases).is_err());

        let ok = vec![
            new_unit("Pcs", dec!(1), true),
            new_unit("Dus", dec!(24), false),
        ];
        assert!(validate_unit_set(&ok).is_ok());
    }

    #[test]
    fn base_unit_factor_must_be_one() {
        let bad = vec![new_unit("Pcs", dec!(2), true)];
        assert!(validate_unit_set(&bad).is_err());
    }

    #[test]
    fn duplicate_unit_names_are_rejected() {
        let dup = vec![
            new_unit("Pcs", dec!(1), true),
            new_unit("Pcs", dec!(24), false),
        ];
        assert!(validate_unit_set(&dup).is_err());
    }
}
