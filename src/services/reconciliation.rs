use crate::{
    db::DbPool,
    entities::{
        product::{self, Entity as Product},
        stock_movement::{self, Entity as StockMovement},
        stock_transfer::{self, Entity as StockTransfer, TransferStatus},
        stock_transfer_line::{self, Entity as StockTransferLine},
    },
    errors::LedgerError,
    services::{batches, stock},
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Divergence report for one product.
///
/// `in_transit` is stock on shipped-but-unreceived transfers: owned
/// globally, held by no branch.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductAudit {
    pub product_id: i64,
    pub global_stock: Decimal,
    pub branch_total: Decimal,
    pub batch_total: Decimal,
    pub movement_total: Decimal,
    pub in_transit: Decimal,
    pub findings: Vec<String>,
}

impl ProductAudit {
    pub fn is_consistent(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Recomputes every representation of a product's stock and compares
/// them. Read-only; a divergence is reported, never repaired.
pub struct ReconciliationService {
    db_pool: Arc<DbPool>,
}

impl ReconciliationService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self))]
    pub async fn audit_product(&self, product_id: i64) -> Result<ProductAudit, LedgerError> {
        let db = self.db_pool.as_ref();
        let prod = Product::find_by_id(product_id)
            .one(db)
            .await
            .map_err(LedgerError::db_error)?
            .ok_or_else(|| LedgerError::NotFound(format!("Product {} not found", product_id)))?;

        let branch_total = stock::total_branch_quantity(db, product_id).await?;
        let batch_total = batches::total_remaining_base(db, product_id).await?;
        let movement_total = self.movement_total(product_id).await?;
        let in_transit = self.in_transit_quantity(product_id).await?;

        let findings = evaluate_findings(
            prod.global_stock,
            branch_total,
            batch_total,
            movement_total,
            in_transit,
        );
        if !findings.is_empty() {
            warn!(
                product_id,
                finding_count = findings.len(),
                "Stock representations diverged"
            );
        }

        Ok(ProductAudit {
            product_id,
            global_stock: prod.global_stock,
            branch_total,
            batch_total,
            movement_total,
            in_transit,
            findings,
        })
    }

    /// Audits every active product and returns only the divergent ones.
    #[instrument(skip(self))]
    pub async fn divergent_products(&self) -> Result<Vec<ProductAudit>, LedgerError> {
        let db = self.db_pool.as_ref();
        let products = Product::find()
            .filter(product::Column::IsActive.eq(true))
            .all(db)
            .await
            .map_err(LedgerError::db_error)?;

        let mut reports = Vec::new();
        for prod in products {
            let audit = self.audit_product(prod.id).await?;
            if !audit.is_consistent() {
                reports.push(audit);
            }
        }
        Ok(reports)
    }

    async fn movement_total(&self, product_id: i64) -> Result<Decimal, LedgerError> {
        let db = self.db_pool.as_ref();
        let movements = StockMovement::find()
            .filter(stock_movement::Column::ProductId.eq(product_id))
            .all(db)
            .await
            .map_err(LedgerError::db_error)?;
        Ok(movements.iter().map(|m| m.quantity_base).sum())
    }

    async fn in_transit_quantity(&self, product_id: i64) -> Result<Decimal, LedgerError> {
        let db = self.db_pool.as_ref();
        let shipped = StockTransfer::find()
            .filter(stock_transfer::Column::Status.eq(TransferStatus::Shipped))
            .all(db)
            .await
            .map_err(LedgerError::db_error)?;
        if shipped.is_empty() {
            return Ok(Decimal::ZERO);
        }

        let transfer_ids: Vec<i64> = shipped.iter().map(|t| t.id).collect();
        let lines = StockTransferLine::find()
            .filter(stock_transfer_line::Column::TransferId.is_in(transfer_ids))
            .filter(stock_transfer_line::Column::ProductId.eq(product_id))
            .all(db)
            .await
            .map_err(LedgerError::db_error)?;

        Ok(lines
            .iter()
            .map(|l| l.approved_quantity.unwrap_or(Decimal::ZERO) * l.conversion_factor)
            .sum())
    }
}

fn evaluate_findings(
    global_stock: Decimal,
    branch_total: Decimal,
    batch_total: Decimal,
    movement_total: Decimal,
    in_transit: Decimal,
) -> Vec<String> {
    let mut findings = Vec::new();

    if branch_total + in_transit != global_stock {
        findings.push(format!(
            "Branch total {} plus in-transit {} does not match global stock {}",
            branch_total, in_transit, global_stock
        ));
    }
    if batch_total != global_stock {
        findings.push(format!(
            "Batch remainder total {} does not match global stock {}",
            batch_total, global_stock
        ));
    }
    if movement_total != branch_total {
        findings.push(format!(
            "Movement log total {} does not match branch total {}",
            movement_total, branch_total
        ));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn settled_ledger_has_no_findings() {
        let findings = evaluate_findings(dec!(100), dec!(100), dec!(100), dec!(100), dec!(0));
        assert!(findings.is_empty());
    }

    #[test]
    fn in_transit_stock_is_owned_globally() {
        // 20 shipped: branches hold 80, batches and global still 100.
        let findings = evaluate_findings(dec!(100), dec!(80), dec!(100), dec!(80), dec!(20));
        assert!(findings.is_empty());
    }

    #[test]
    fn diverged_batch_total_is_reported() {
        let findings = evaluate_findings(dec!(100), dec!(100), dec!(90), dec!(100), dec!(0));
        assert_eq!(findings.len(), 1);
        assert!(findings[0].contains("Batch remainder total"));
    }

    #[test]
    fn every_divergence_is_listed() {
        let findings = evaluate_findings(dec!(100), dec!(70), dec!(90), dec!(60), dec!(0));
        assert_eq!(findings.len(), 3);
    }
}
