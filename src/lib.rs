//! 国际象棋分析任务编排服务
//!
//! 二进制入口见 `main.rs`；此处导出装配逻辑以便集成测试复用。

pub mod app;
pub mod shutdown;

pub use app::{AppMode, Application, Components};
pub use shutdown::ShutdownManager;
