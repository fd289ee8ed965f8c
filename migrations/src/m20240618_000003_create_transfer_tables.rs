use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // stock_transfers
        manager
            .create_table(
                Table::create()
                    .table(StockTransfers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockTransfers::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StockTransfers::FromBranchId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransfers::ToBranchId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransfers::Status)
                            .string_len(32)
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(StockTransfers::Note).text().null())
                    .col(
                        ColumnDef::new(StockTransfers::RequestedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransfers::ShippedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockTransfers::ReceivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockTransfers::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockTransfers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransfers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_transfers_status")
                    .table(StockTransfers::Table)
                    .col(StockTransfers::Status)
                    .to_owned(),
            )
            .await?;

        // stock_transfer_lines
        manager
            .create_table(
                Table::create()
                    .table(StockTransferLines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StockTransferLines::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::TransferId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::UnitId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::UnitName)
                            .string_len(50)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::ConversionFactor)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::RequestedQuantity)
                            .decimal_len(16, 4)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::ApprovedQuantity)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::ReceivedQuantity)
                            .decimal_len(16, 4)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(StockTransferLines::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stock_transfer_lines_transfer")
                            .from(StockTransferLines::Table, StockTransferLines::TransferId)
                            .to(StockTransfers::Table, StockTransfers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stock_transfer_lines_transfer_id")
                    .table(StockTransferLines::Table)
                    .col(StockTransferLines::TransferId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StockTransferLines::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(StockTransfers::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Iden)]
enum StockTransfers {
    Table,
    Id,
    FromBranchId,
    ToBranchId,
    Status,
    Note,
    RequestedAt,
    ShippedAt,
    ReceivedAt,
    CancelledAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum StockTransferLines {
    Table,
    Id,
    TransferId,
    ProductId,
    UnitId,
    UnitName,
    ConversionFactor,
    RequestedQuantity,
    ApprovedQuantity,
    ReceivedQuantity,
    CreatedAt,
}
