use crate::{
    entities::{
        branch::{self, Entity as Branch},
        branch_stock::{self, Entity as BranchStock},
        product::{self, Entity as Product},
        stock_movement::{self, MovementKind},
    },
    errors::LedgerError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, Set,
};
use uuid::Uuid;

/// Loads and row-locks a product.
///
/// Every movement transaction takes this lock first; branch stock and
/// batch locks follow it, which keeps concurrent movements on the same
/// product serialized in one global order.
pub async fn lock_product<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
) -> Result<product::Model, LedgerError> {
    Product::find()
        .filter(product::Column::Id.eq(product_id))
        .lock_exclusive()
        .one(db)
        .await
        .map_err(LedgerError::db_error)?
        .ok_or_else(|| LedgerError::NotFound(format!("Product {} not found", product_id)))
}

/// [`lock_product`] with an activity gate, for movements that bring new
/// work to a product. Completion steps of already started flows (transfer
/// receive, cancellations) lock without the gate so deactivation never
/// strands in-flight stock.
pub async fn lock_active_product<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
) -> Result<product::Model, LedgerError> {
    let product = lock_product(db, product_id).await?;
    if !product.is_active {
        return Err(LedgerError::Validation(format!(
            "Product {} is inactive",
            product_id
        )));
    }
    Ok(product)
}

/// Resolves the branch a movement applies to.
///
/// `None` falls back to the main branch. Inactive branches are rejected
/// either way.
pub async fn resolve_branch<C: ConnectionTrait>(
    db: &C,
    branch_id: Option<i32>,
) -> Result<branch::Model, LedgerError> {
    let found = match branch_id {
        Some(id) => Branch::find_by_id(id)
            .one(db)
            .await
            .map_err(LedgerError::db_error)?
            .ok_or_else(|| LedgerError::NotFound(format!("Branch {} not found", id)))?,
        None => Branch::find()
            .filter(branch::Column::IsMain.eq(true))
            .one(db)
            .await
            .map_err(LedgerError::db_error)?
            .ok_or_else(|| LedgerError::NotFound("No main branch configured".to_string()))?,
    };

    if !found.is_active {
        return Err(LedgerError::Validation(format!(
            "Branch {} is inactive",
            found.id
        )));
    }
    Ok(found)
}

/// Loads and row-locks the branch stock row for a (branch, product) pair,
/// creating a zero row on first touch.
pub async fn lock_or_create_branch_stock<C: ConnectionTrait>(
    db: &C,
    branch_id: i32,
    product_id: i64,
) -> Result<branch_stock::Model, LedgerError> {
    let existing = BranchStock::find()
        .filter(branch_stock::Column::BranchId.eq(branch_id))
        .filter(branch_stock::Column::ProductId.eq(product_id))
        .lock_exclusive()
        .one(db)
        .await
        .map_err(LedgerError::db_error)?;

    if let Some(stock) = existing {
        return Ok(stock);
    }

    let now = Utc::now();
    let created = branch_stock::ActiveModel {
        branch_id: Set(branch_id),
        product_id: Set(product_id),
        quantity: Set(Decimal::ZERO),
        minimum_stock: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    created.insert(db).await.map_err(LedgerError::db_error)
}

/// Locks the branch stock rows at both ends of a transfer.
///
/// Rows are acquired in ascending branch-id order regardless of transfer
/// direction, then handed back as (source, destination).
pub async fn lock_branch_stock_pair<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
    from_branch_id: i32,
    to_branch_id: i32,
) -> Result<(branch_stock::Model, branch_stock::Model), LedgerError> {
    if from_branch_id == to_branch_id {
        return Err(LedgerError::Validation(
            "Transfer source and destination branches must differ".to_string(),
        ));
    }

    let lo = from_branch_id.min(to_branch_id);
    let hi = from_branch_id.max(to_branch_id);
    let lo_stock = lock_or_create_branch_stock(db, lo, product_id).await?;
    let hi_stock = lock_or_create_branch_stock(db, hi, product_id).await?;

    if from_branch_id == lo {
        Ok((lo_stock, hi_stock))
    } else {
        Ok((hi_stock, lo_stock))
    }
}

/// Applies a signed base-unit delta to a locked branch stock row.
pub async fn apply_branch_delta<C: ConnectionTrait>(
    db: &C,
    stock: branch_stock::Model,
    delta: Decimal,
) -> Result<branch_stock::Model, LedgerError> {
    let new_quantity = stock.quantity + delta;
    if new_quantity < Decimal::ZERO {
        return Err(LedgerError::insufficient_stock(
            stock.product_id,
            -delta,
            stock.quantity,
        ));
    }

    let mut active: branch_stock::ActiveModel = stock.into();
    active.quantity = Set(new_quantity);
    active.updated_at = Set(Utc::now());
    active.update(db).await.map_err(LedgerError::db_error)
}

/// Applies a signed base-unit delta to a locked product's global total.
///
/// The branch-level guard runs first, so a negative global here means the
/// denormalized totals diverged.
pub async fn apply_global_delta<C: ConnectionTrait>(
    db: &C,
    product: product::Model,
    delta: Decimal,
) -> Result<product::Model, LedgerError> {
    let new_global = product.global_stock + delta;
    if new_global < Decimal::ZERO {
        return Err(LedgerError::Integrity(format!(
            "Global stock of product {} would become negative ({} {})",
            product.id, product.global_stock, delta
        )));
    }

    let mut active: product::ActiveModel = product.into();
    active.global_stock = Set(new_global);
    active.updated_at = Set(Utc::now());
    active.update(db).await.map_err(LedgerError::db_error)
}

/// Appends one audit row to the movement log, inside the caller's
/// transaction.
pub async fn record_movement<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
    branch_id: Option<i32>,
    batch_id: Option<i64>,
    quantity_base: Decimal,
    kind: MovementKind,
    reference_type: &str,
    reference_id: impl Into<String>,
) -> Result<stock_movement::Model, LedgerError> {
    let movement = stock_movement::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        branch_id: Set(branch_id),
        batch_id: Set(batch_id),
        quantity_base: Set(quantity_base),
        kind: Set(kind),
        reference_type: Set(reference_type.to_string()),
        reference_id: Set(reference_id.into()),
        ..Default::default()
    };
    movement.insert(db).await.map_err(LedgerError::db_error)
}

/// The minimum threshold in force for a branch stock row.
pub fn effective_minimum(stock: &branch_stock::Model, product: &product::Model) -> Decimal {
    stock.minimum_stock.unwrap_or(product.minimum_stock)
}

/// Returns the breached threshold when a row sits below its minimum.
pub fn low_stock_breach(stock: &branch_stock::Model, product: &product::Model) -> Option<Decimal> {
    let minimum = effective_minimum(stock, product);
    if minimum > Decimal::ZERO && stock.quantity < minimum {
        Some(minimum)
    } else {
        None
    }
}

/// Sum of branch stock quantities for one product.
pub async fn total_branch_quantity<C: ConnectionTrait>(
    db: &C,
    product_id: i64,
) -> Result<Decimal, LedgerError> {
    let rows = BranchStock::find()
        .filter(branch_stock::Column::ProductId.eq(product_id))
        .all(db)
        .await
        .map_err(LedgerError::db_error)?;
    Ok(rows.iter().map(|r| r.quantity).sum())
}

/// A branch stock row sitting at or below its effective minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct LowStockRow {
    pub product_id: i64,
    pub product_name: String,
    pub branch_id: i32,
    pub quantity: Decimal,
    pub minimum: Decimal,
}

/// Scans for branch stock rows below their effective minimum across all
/// active products. Read-only; used by the low-stock event emitter and by
/// reporting consumers.
pub async fn low_stock_candidates<C: ConnectionTrait>(
    db: &C,
) -> Result<Vec<LowStockRow>, LedgerError> {
    let products = Product::find()
        .filter(product::Column::IsActive.eq(true))
        .all(db)
        .await
        .map_err(LedgerError::db_error)?;

    let mut rows = Vec::new();
    for prod in &products {
        let stocks = BranchStock::find()
            .filter(branch_stock::Column::ProductId.eq(prod.id))
            .all(db)
            .await
            .map_err(LedgerError::db_error)?;
        for stock in stocks {
            if let Some(minimum) = low_stock_breach(&stock, prod) {
                rows.push(LowStockRow {
                    product_id: prod.id,
                    product_name: prod.name.clone(),
                    branch_id: stock.branch_id,
                    quantity: stock.quantity,
                    minimum,
                });
            }
        }
    }
    Ok(rows)
}
