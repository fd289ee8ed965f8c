pub use sea_orm_migration::prelude::*;

mod m20240612_000001_create_catalog_tables;
mod m20240612_000002_create_purchase_tables;
mod m20240618_000003_create_transfer_tables;
mod m20240618_000004_create_return_tables;
mod m20240702_000005_create_movement_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240612_000001_create_catalog_tables::Migration),
            Box::new(m20240612_000002_create_purchase_tables::Migration),
            Box::new(m20240618_000003_create_transfer_tables::Migration),
            Box::new(m20240618_000004_create_return_tables::Migration),
            Box::new(m20240702_000005_create_movement_tables::Migration),
        ]
    }
}
