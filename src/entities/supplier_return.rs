use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum SupplierReturnStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Goods sent back to a supplier, always against a specific batch.
///
/// A draft reserves nothing; completion performs the deduction and a
/// later cancellation restores it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "supplier_returns")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub batch_id: i64,
    pub branch_id: i32,
    /// Quantity in the batch's received unit.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: rust_decimal::Decimal,
    pub reason: Option<String>,
    pub status: SupplierReturnStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_batch::Entity",
        from = "Column::BatchId",
        to = "super::stock_batch::Column::Id"
    )]
    StockBatch,
}

impl Related<super::stock_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockBatch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
