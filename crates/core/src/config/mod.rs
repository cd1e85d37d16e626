//! 配置管理
//!
//! 加载顺序：内置默认值 → TOML配置文件 → 环境变量（前缀 `ORCHESTRATOR_`，
//! 层级分隔符 `__`，例如 `ORCHESTRATOR_WORKER__POOL_SIZE=8`）

pub mod models;

#[cfg(test)]
mod tests;

pub use models::*;
