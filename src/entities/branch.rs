use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "branches")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    /// The fallback branch for movements that carry no branch id.
    pub is_main: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::branch_stock::Entity")]
    BranchStocks,
}

impl Related<super::branch_stock::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::BranchStocks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
