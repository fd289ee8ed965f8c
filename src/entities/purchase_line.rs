use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One received line of a purchase. Each line spawns exactly one batch.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_lines")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub purchase_id: i64,
    pub product_id: i64,
    pub unit_id: i64,
    /// Quantity in the purchased unit.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity: rust_decimal::Decimal,
    /// Buy price per purchased unit.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_price: rust_decimal::Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::purchase::Entity",
        from = "Column::PurchaseId",
        to = "super::purchase::Column::Id"
    )]
    Purchase,
    #[sea_orm(has_many = "super::stock_batch::Entity")]
    StockBatches,
}

impl Related<super::purchase::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Purchase.def()
    }
}

impl Related<super::stock_batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockBatches.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
