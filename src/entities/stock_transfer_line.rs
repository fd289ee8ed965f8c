use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One product line of a transfer.
///
/// Quantities are in the requested unit; `conversion_factor` is the
/// factor snapshotted at request time, so the base-unit amount of a
/// line is `quantity * conversion_factor` whatever later catalog edits
/// do. `received_quantity <= approved_quantity <= requested_quantity`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_transfer_lines")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub transfer_id: i64,
    pub product_id: i64,
    pub unit_id: i64,
    pub unit_name: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub conversion_factor: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub requested_quantity: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub approved_quantity: Option<rust_decimal::Decimal>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub received_quantity: Option<rust_decimal::Decimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::stock_transfer::Entity",
        from = "Column::TransferId",
        to = "super::stock_transfer::Column::Id"
    )]
    StockTransfer,
}

impl Related<super::stock_transfer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockTransfer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
