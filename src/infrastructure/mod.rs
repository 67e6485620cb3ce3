//! Infrastructure layer - storage backends

pub mod database;
pub mod storage;

pub use database::{init_database, DatabaseConfig, SeaOrmResourceStore};
pub use storage::InMemoryResourceStore;
