// Shared store access: contract, backends and keyspace

pub mod keys;
pub mod memory_store;
pub mod redis_store;
pub mod resilient_store;
pub mod store;

pub use memory_store::InMemoryStore;
pub use redis_store::RedisAtomicStore;
pub use resilient_store::ResilientStore;
pub use store::{AtomicStore, StoreScript};
