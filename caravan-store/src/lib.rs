pub mod app_config;
pub mod database;
pub mod events;
pub mod group_repo;
pub mod inventory_repo;
pub mod redis_repo;

pub use database::DbClient;
pub use events::EventProducer;
pub use group_repo::PgGroupStore;
pub use inventory_repo::PgInventoryStore;
pub use redis_repo::RedisClient;

use caravan_core::StoreError;

pub(crate) fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}
