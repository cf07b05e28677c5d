//! Sea-ORM migrations for the trek-store schema

pub use sea_orm_migration::prelude::*;

mod m20251002_000001_create_conversations_table;
mod m20251002_000002_create_participants_table;
mod m20251002_000003_create_messages_table;
mod m20251002_000004_create_profiles_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20251002_000001_create_conversations_table::Migration),
            Box::new(m20251002_000002_create_participants_table::Migration),
            Box::new(m20251002_000003_create_messages_table::Migration),
            Box::new(m20251002_000004_create_profiles_table::Migration),
        ]
    }
}
