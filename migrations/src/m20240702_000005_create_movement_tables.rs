use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // stock_movements: append-only ledger rows, one per batch touched
        manager
            .create_table(
                Table::create()
                    .table(StockMovements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockMovements::Id)
                            .uuid()
                            .primary_key()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockMovements::BranchId).integer().null())
                    .col(ColumnDef::new(StockMovements::BatchId).big_integer().null())
                    .col(
                        ColumnDef::new(StockMovements::QuantityBase)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(ColumnDef::new(StockMovements::Kind).string_len(40).not_null())
                    .col(
                        ColumnDef::new(StockMovements::ReferenceType)
                            .string_len(40)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::ReferenceId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockMovements::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_movements_product_created")
                    .table(StockMovements::Table)
                    .col(StockMovements::ProductId)
                    .col(StockMovements::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_movements_reference")
                    .table(StockMovements::Table)
                    .col(StockMovements::ReferenceType)
                    .col(StockMovements::ReferenceId)
                    .to_owned(),
            )
            .await?;

        // movement_keys: idempotency registry for the processor
        manager
            .create_table(
                Table::create()
                    .table(MovementKeys::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MovementKeys::IdempotencyKey)
                            .string_len(128)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MovementKeys::Outcome).text().not_null())
                    .col(
                        ColumnDef::new(MovementKeys::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MovementKeys::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(StockMovements::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StockMovements {
    Table,
    Id,
    ProductId,
    BranchId,
    BatchId,
    QuantityBase,
    Kind,
    ReferenceType,
    ReferenceId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum MovementKeys {
    Table,
    IdempotencyKey,
    Outcome,
    CreatedAt,
}
