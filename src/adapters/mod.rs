pub mod memory;
pub mod postgres_transaction_repository;
pub mod redis_lock_store;

pub use memory::{InMemoryLockStore, InMemoryTransactionRepository};
pub use postgres_transaction_repository::PostgresTransactionRepository;
pub use redis_lock_store::RedisLockStore;
