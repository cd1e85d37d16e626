pub mod api_observability;
pub mod app_config;
pub mod cache_rate_limit;
pub mod registry_batch;
pub mod store_queue;
pub mod worker_reaper;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use cache_rate_limit::{CacheConfig, RateLimitConfig};
pub use registry_batch::{BatchConfig, RegistryConfig};
pub use store_queue::{QueueConfig, StoreBackend, StoreConfig};
pub use worker_reaper::{EngineConfig, ReaperConfig, WorkerConfig};
