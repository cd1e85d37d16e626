pub mod components;
pub mod executors;

pub use components::{ExecutionOutcome, ProgressThrottle, TaskExecutor, WorkerPool};
pub use executors::ProcessEngine;
