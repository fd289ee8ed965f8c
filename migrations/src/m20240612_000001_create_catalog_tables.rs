use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20240612_000001_create_catalog_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // products
        manager
            .create_table(
                Table::create()
                    .table(Products::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Products::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Products::Name).string_len(255).not_null())
                    .col(ColumnDef::new(Products::Category).string_len(100).null())
                    .col(
                        ColumnDef::new(Products::MinimumStock)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Products::GlobalStock)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Products::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Products::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Products::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_products_is_active")
                    .table(Products::Table)
                    .col(Products::IsActive)
                    .to_owned(),
            )
            .await?;

        // product_units
        manager
            .create_table(
                Table::create()
                    .table(ProductUnits::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProductUnits::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProductUnits::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ProductUnits::Name).string_len(50).not_null())
                    .col(
                        ColumnDef::new(ProductUnits::ConversionFactor)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductUnits::BuyPrice)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ProductUnits::SellPrice)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ProductUnits::IsBaseUnit)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ProductUnits::SortOrder)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ProductUnits::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProductUnits::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_product_units_product")
                            .from(ProductUnits::Table, ProductUnits::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_product_units_product_name")
                    .table(ProductUnits::Table)
                    .col(ProductUnits::ProductId)
                    .col(ProductUnits::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // branches
        manager
            .create_table(
                Table::create()
                    .table(Branches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Branches::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Branches::Name).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Branches::IsMain)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Branches::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Branches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Branches::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // branch_stocks
        manager
            .create_table(
                Table::create()
                    .table(BranchStocks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BranchStocks::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BranchStocks::BranchId).integer().not_null())
                    .col(
                        ColumnDef::new(BranchStocks::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BranchStocks::Quantity)
                            .decimal_len(16, 4)
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(BranchStocks::MinimumStock)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(BranchStocks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(BranchStocks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_branch_stocks_branch")
                            .from(BranchStocks::Table, BranchStocks::BranchId)
                            .to(Branches::Table, Branches::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_branch_stocks_product")
                            .from(BranchStocks::Table, BranchStocks::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_branch_stocks_branch_product")
                    .table(BranchStocks::Table)
                    .col(BranchStocks::BranchId)
                    .col(BranchStocks::ProductId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_branch_stocks_product_id")
                    .table(BranchStocks::Table)
                    .col(BranchStocks::ProductId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(BranchStocks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Branches::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ProductUnits::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Products::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum Products {
    Table,
    Id,
    Name,
    Category,
    MinimumStock,
    GlobalStock,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum ProductUnits {
    Table,
    Id,
    ProductId,
    Name,
    ConversionFactor,
    BuyPrice,
    SellPrice,
    IsBaseUnit,
    SortOrder,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Branches {
    Table,
    Id,
    Name,
    IsMain,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum BranchStocks {
    Table,
    Id,
    BranchId,
    ProductId,
    Quantity,
    MinimumStock,
    CreatedAt,
    UpdatedAt,
}
