pub mod analyses;
pub mod batches;
pub mod cache;
pub mod health;
pub mod metrics;
pub mod results;
