use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a movement row records.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(40))")]
pub enum MovementKind {
    #[sea_orm(string_value = "purchase")]
    Purchase,
    #[sea_orm(string_value = "sale")]
    Sale,
    #[sea_orm(string_value = "adjustment_add")]
    AdjustmentAdd,
    #[sea_orm(string_value = "adjustment_subtract")]
    AdjustmentSubtract,
    #[sea_orm(string_value = "supplier_return")]
    SupplierReturn,
    #[sea_orm(string_value = "supplier_return_reversal")]
    SupplierReturnReversal,
    #[sea_orm(string_value = "customer_return")]
    CustomerReturn,
    #[sea_orm(string_value = "customer_return_reversal")]
    CustomerReturnReversal,
    #[sea_orm(string_value = "transfer_out")]
    TransferOut,
    #[sea_orm(string_value = "transfer_in")]
    TransferIn,
    #[sea_orm(string_value = "transfer_cancel")]
    TransferCancel,
}

/// Append-only ledger row, written in the same transaction as the
/// mutation it describes. One row per batch touched; transfer legs that
/// touch no batch get a single branch-level row with `batch_id = None`.
/// `quantity_base` is signed: positive adds stock, negative removes it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: i64,
    pub branch_id: Option<i32>,
    pub batch_id: Option<i64>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub quantity_base: rust_decimal::Decimal,
    pub kind: MovementKind,
    pub reference_type: String,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
