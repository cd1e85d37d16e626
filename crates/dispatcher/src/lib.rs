//! 调度层
//!
//! 负责接收分析请求（去重、缓存短路、入队与回滚）、批次的扇出与状态聚合，
//! 以及回收丢失心跳的任务。

pub mod batch_aggregator;
pub mod reaper;
pub mod submitter;

pub use batch_aggregator::BatchAggregator;
pub use reaper::Reaper;
pub use submitter::{JobSubmitter, SubmitRequest};
