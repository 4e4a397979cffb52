pub mod cached;
pub mod memory;
pub mod postgres;
pub mod redis;
pub mod stores;

pub use cached::CachedFeatureStore;
pub use memory::InMemoryStore;
pub use postgres::{create_pool, PgStore};
pub use redis::create_redis_client;
pub use redis::Cache;
pub use redis::CacheKey;
pub use redis::CacheWriterHandle;
pub use stores::{FeatureStore, InteractionStore};

#[cfg(test)]
pub use stores::{MockFeatureStore, MockInteractionStore};
