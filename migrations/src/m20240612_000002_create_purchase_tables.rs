use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20240612_000002_create_purchase_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // purchases
        manager
            .create_table(
                Table::create()
                    .table(Purchases::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Purchases::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Purchases::BranchId).integer().not_null())
                    .col(
                        ColumnDef::new(Purchases::Reference)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Purchases::Supplier).string_len(255).null())
                    .col(ColumnDef::new(Purchases::Note).text().null())
                    .col(
                        ColumnDef::new(Purchases::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Purchases::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_purchases_branch_id")
                    .table(Purchases::Table)
                    .col(Purchases::BranchId)
                    .to_owned(),
            )
            .await?;

        // purchase_lines
        manager
            .create_table(
                Table::create()
                    .table(PurchaseLines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PurchaseLines::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PurchaseLines::PurchaseId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseLines::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseLines::UnitId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseLines::Quantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PurchaseLines::UnitPrice)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PurchaseLines::ExpiryDate).date().null())
                    .col(
                        ColumnDef::new(PurchaseLines::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_purchase_lines_purchase")
                            .from(PurchaseLines::Table, PurchaseLines::PurchaseId)
                            .to(Purchases::Table, Purchases::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_purchase_lines_purchase_id")
                    .table(PurchaseLines::Table)
                    .col(PurchaseLines::PurchaseId)
                    .to_owned(),
            )
            .await?;

        // stock_batches
        manager
            .create_table(
                Table::create()
                    .table(StockBatches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockBatches::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::PurchaseLineId)
                            .big_integer()
                            .null(),
                    )
                    .col(ColumnDef::new(StockBatches::Kind).string_len(32).not_null())
                    .col(
                        ColumnDef::new(StockBatches::UnitName)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::ConversionFactor)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::ReceivedQuantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockBatches::RemainingBase)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockBatches::ExpiryDate).date().null())
                    .col(
                        ColumnDef::new(StockBatches::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_batches_product")
                            .from(StockBatches::Table, StockBatches::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_batches_product_expiry")
                    .table(StockBatches::Table)
                    .col(StockBatches::ProductId)
                    .col(StockBatches::ExpiryDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockBatches::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PurchaseLines::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Purchases::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum Purchases {
    Table,
    Id,
    BranchId,
    Reference,
    Supplier,
    Note,
    ReceivedAt,
    CreatedAt,
}

#[derive(Iden)]
enum PurchaseLines {
    Table,
    Id,
    PurchaseId,
    ProductId,
    UnitId,
    Quantity,
    UnitPrice,
    ExpiryDate,
    CreatedAt,
}

#[derive(Iden)]
enum StockBatches {
    Table,
    Id,
    ProductId,
    PurchaseLineId,
    Kind,
    UnitName,
    ConversionFactor,
    ReceivedQuantity,
    RemainingBase,
    ExpiryDate,
    CreatedAt,
}

#[derive(Iden)]
enum Products {
    Table,
    Id,
}
