use std::collections::BTreeMap;

use crate::entities::{
    BatchState, BatchStatus, BatchTask, ChildStatus, StatusState, TaskError, TaskStatus,
};
use crate::ports::AnalysisArtifact;

/// 批次状态计算
///
/// 纯函数：只根据批次定义和子任务当前状态推导，不写任何存储
pub struct BatchStatusCalculator;

impl BatchStatusCalculator {
    pub fn summarize(batch: &BatchTask, statuses: &[TaskStatus]) -> BatchStatus {
        let children: Vec<ChildStatus> = batch
            .task_ids
            .iter()
            .zip(batch.targets.iter())
            .map(|(task_id, target)| {
                let status = statuses.iter().find(|s| &s.task_id == task_id);
                Self::child_view(task_id, target, status)
            })
            .collect();

        let total = batch.total();
        let completed = children
            .iter()
            .filter(|c| c.state == StatusState::Success)
            .count();
        let failed = children
            .iter()
            .filter(|c| c.state == StatusState::Failure)
            .count();
        let in_progress = total - completed - failed;

        let percent = if total == 0 {
            100.0
        } else {
            children.iter().map(|c| f64::from(c.progress)).sum::<f64>() / total as f64
        };

        let state = if completed == total {
            BatchState::Success
        } else if in_progress == 0 {
            BatchState::Failure
        } else {
            BatchState::Progress
        };

        BatchStatus {
            batch_id: batch.id.clone(),
            state,
            total,
            completed,
            failed,
            in_progress,
            percent,
            children,
            aggregate_metrics: batch.aggregate_metrics.clone(),
        }
    }

    fn child_view(task_id: &str, target: &str, status: Option<&TaskStatus>) -> ChildStatus {
        match status {
            Some(status) if status.state != StatusState::Unknown => ChildStatus {
                target: target.to_string(),
                task_id: task_id.to_string(),
                state: match status.state {
                    StatusState::Started => StatusState::Progress,
                    other => other,
                },
                progress: status.progress,
                result_ref: status.result_ref.clone(),
                error: status.error.clone(),
            },
            // 记录已过期：视为失败的终态
            _ => ChildStatus {
                target: target.to_string(),
                task_id: task_id.to_string(),
                state: StatusState::Failure,
                progress: 0,
                result_ref: None,
                error: Some(TaskError::evicted()),
            },
        }
    }
}

/// 批次完成后的聚合指标
pub trait MetricsAggregator: Send + Sync {
    fn aggregate(
        &self,
        status: &BatchStatus,
        artifacts: &[(String, AnalysisArtifact)],
    ) -> serde_json::Value;
}

/// 默认聚合：成功率，以及各产物 `summary` 对象中数值字段的均值
#[derive(Debug, Default, Clone)]
pub struct SummaryMetricsAggregator;

impl MetricsAggregator for SummaryMetricsAggregator {
    fn aggregate(
        &self,
        status: &BatchStatus,
        artifacts: &[(String, AnalysisArtifact)],
    ) -> serde_json::Value {
        let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        for (_, artifact) in artifacts {
            let Some(summary) = artifact.get("summary").and_then(|s| s.as_object()) else {
                continue;
            };
            for (field, value) in summary {
                if let Some(number) = value.as_f64() {
                    let entry = sums.entry(field.clone()).or_insert((0.0, 0));
                    entry.0 += number;
                    entry.1 += 1;
                }
            }
        }

        let averages: serde_json::Map<String, serde_json::Value> = sums
            .into_iter()
            .map(|(field, (sum, count))| (field, serde_json::json!(sum / count as f64)))
            .collect();

        let evicted = status
            .children
            .iter()
            .filter(|c| c.error.as_ref().is_some_and(|e| e.code == "TASK_EVICTED"))
            .count();

        let success_rate = if status.total == 0 {
            0.0
        } else {
            status.completed as f64 / status.total as f64
        };

        serde_json::json!({
            "total": status.total,
            "succeeded": status.completed,
            "failed": status.failed,
            "evicted": evicted,
            "success_rate": success_rate,
            "averages": averages,
        })
    }
}
