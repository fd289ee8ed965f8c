use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// How a batch came into existence.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum BatchKind {
    #[sea_orm(string_value = "purchase")]
    Purchase,
    #[sea_orm(string_value = "adjustment")]
    Adjustment,
    #[sea_orm(string_value = "customer_return")]
    CustomerReturn,
}

/// One receipt of stock for a product.
///
/// `conversion_factor` is snapshotted at receipt so later catalog edits
/// never reinterpret what this batch holds. `remaining_base` is the
/// mutable column and is always kept in base units; the received-unit
/// view is `remaining_base / conversion_factor`. Batches are never
/// deleted, a fully consumed batch just sits at zero.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_batches")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub product_id: i64,
    pub purchase_line_id: Option<i64>,
    pub kind: BatchKind,
    pub unit_name: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub conversion_factor: rust_decimal::Decimal,
    /// Quantity received, in the unit named by `unit_name`.
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub received_quantity: rust_decimal::Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub remaining_base: rust_decimal::Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(
        belongs_to = "super::purchase_line::Entity",
        from = "Column::PurchaseLineId",
        to = "super::purchase_line::Column::Id"
    )]
    PurchaseLine,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::purchase_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseLine.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
