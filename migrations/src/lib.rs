pub use sea_orm_migration::prelude::*;

mod m20250801_000001_create_users_table;
mod m20250801_000002_create_catalog_tables;
mod m20250801_000003_create_cart_tables;
mod m20250801_000004_create_order_tables;
mod m20250801_000005_add_indexes;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250801_000001_create_users_table::Migration),
            Box::new(m20250801_000002_create_catalog_tables::Migration),
            Box::new(m20250801_000003_create_cart_tables::Migration),
            Box::new(m20250801_000004_create_order_tables::Migration),
            Box::new(m20250801_000005_add_indexes::Migration),
        ]
    }
}
