pub mod progress_throttle;
pub mod task_execution;
pub mod worker_lifecycle;

pub use progress_throttle::ProgressThrottle;
pub use task_execution::{ExecutionOutcome, TaskExecutor};
pub use worker_lifecycle::WorkerPool;
