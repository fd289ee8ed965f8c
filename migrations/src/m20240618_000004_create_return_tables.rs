use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // supplier_returns
        manager
            .create_table(
                Table::create()
                    .table(SupplierReturns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SupplierReturns::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SupplierReturns::BatchId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SupplierReturns::BranchId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SupplierReturns::Quantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(SupplierReturns::Reason).text().null())
                    .col(
                        ColumnDef::new(SupplierReturns::Status)
                            .string_len(32)
                            .not_null()
                            .default("draft"),
                    )
                    .col(
                        ColumnDef::new(SupplierReturns::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SupplierReturns::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SupplierReturns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SupplierReturns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_supplier_returns_batch_id")
                    .table(SupplierReturns::Table)
                    .col(SupplierReturns::BatchId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_supplier_returns_status")
                    .table(SupplierReturns::Table)
                    .col(SupplierReturns::Status)
                    .to_owned(),
            )
            .await?;

        // customer_returns
        manager
            .create_table(
                Table::create()
                    .table(CustomerReturns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CustomerReturns::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CustomerReturns::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CustomerReturns::BranchId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CustomerReturns::UnitId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CustomerReturns::Quantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(CustomerReturns::Reason).text().null())
                    .col(
                        ColumnDef::new(CustomerReturns::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(CustomerReturns::RestockBatchId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CustomerReturns::ResolvedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CustomerReturns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(CustomerReturns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_customer_returns_product_id")
                    .table(CustomerReturns::Table)
                    .col(CustomerReturns::ProductId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_customer_returns_status")
                    .table(CustomerReturns::Table)
                    .col(CustomerReturns::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CustomerReturns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SupplierReturns::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum SupplierReturns {
    Table,
    Id,
    BatchId,
    BranchId,
    Quantity,
    Reason,
    Status,
    CompletedAt,
    CancelledAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum CustomerReturns {
    Table,
    Id,
    ProductId,
    BranchId,
    UnitId,
    Quantity,
    Reason,
    Status,
    RestockBatchId,
    ResolvedAt,
    CreatedAt,
    UpdatedAt,
}
