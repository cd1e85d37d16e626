pub mod batch_repository;
pub mod cache;
pub mod queue;
pub mod rate_limiter;
pub mod registry;
pub mod store;

pub use batch_repository::StoreBatchRepository;
pub use cache::{CacheLayer, CacheStats, InvalidationTarget, GLOBAL_TAG};
pub use queue::StoreJobQueue;
pub use rate_limiter::RateLimiter;
pub use registry::StoreTaskRegistry;
pub use store::{open_store, InMemoryStore, RedisStore};
