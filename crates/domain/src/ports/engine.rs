use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// 分析引擎的输入
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisInput {
    pub task_id: String,
    pub owner: String,
    pub target: String,
    pub params: serde_json::Value,
}

/// 分析产物，以不透明JSON形式缓存
pub type AnalysisArtifact = serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTick {
    pub percent: u8,
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("引擎执行失败: {0}")]
    Failed(String),
    #[error("引擎输入无效: {0}")]
    InvalidInput(String),
    #[error("引擎已取消")]
    Cancelled,
}

/// 引擎向执行器上报进度、查询取消标志的通道
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressTick>,
    cancelled: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressTick>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                cancelled: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn report(&self, percent: u8, message: impl Into<String>) {
        let _ = self.tx.send(ProgressTick {
            percent: percent.min(100),
            message: Some(message.into()),
        });
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 外部分析引擎
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        input: AnalysisInput,
        progress: ProgressReporter,
    ) -> Result<AnalysisArtifact, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reporter_clamps_and_delivers() {
        let (reporter, mut rx) = ProgressReporter::channel();
        reporter.report(150, "overflow");
        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.percent, 100);
        assert_eq!(tick.message.as_deref(), Some("overflow"));
    }

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let (reporter, _rx) = ProgressReporter::channel();
        let clone = reporter.clone();
        clone.cancel();
        assert!(reporter.is_cancelled());
    }
}
