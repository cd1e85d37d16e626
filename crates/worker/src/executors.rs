use std::process::Stdio;

use async_trait::async_trait;
use orchestrator_core::EngineConfig;
use orchestrator_domain::{
    AnalysisArtifact, AnalysisEngine, AnalysisInput, EngineError, ProgressReporter,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 引擎标准输出中的一行
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum OutputLine {
    /// `progress <pct> <message>`
    Progress(u8, String),
    /// 一个JSON对象；最后一个作为分析结果
    Artifact(AnalysisArtifact),
    Other,
}

pub(crate) fn parse_output_line(line: &str) -> OutputLine {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("progress ") {
        let rest = rest.trim_start();
        let (pct, message) = rest.split_once(' ').unwrap_or((rest, ""));
        return match pct.parse::<f64>() {
            Ok(value) if value.is_finite() => {
                OutputLine::Progress(value.clamp(0.0, 100.0) as u8, message.trim().to_string())
            }
            _ => OutputLine::Other,
        };
    }
    if line.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<AnalysisArtifact>(line) {
            return OutputLine::Artifact(value);
        }
    }
    OutputLine::Other
}

/// 以子进程方式运行的分析引擎
///
/// 输入以JSON写入stdin；stdout逐行解析进度与最终结果。
/// 进程随任务被丢弃时会被杀掉。
pub struct ProcessEngine {
    config: EngineConfig,
}

impl ProcessEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AnalysisEngine for ProcessEngine {
    fn name(&self) -> &str {
        &self.config.command
    }

    async fn analyze(
        &self,
        input: AnalysisInput,
        progress: ProgressReporter,
    ) -> Result<AnalysisArtifact, EngineError> {
        let payload = serde_json::to_vec(&input)
            .map_err(|e| EngineError::InvalidInput(format!("序列化引擎输入失败: {e}")))?;

        info!(
            "启动分析引擎: task_id={}, command={}, args={:?}",
            input.task_id, self.config.command, self.config.args
        );

        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.config.working_dir.is_empty() {
            cmd.current_dir(&self.config.working_dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Failed(format!("启动分析引擎失败: {e}")))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Failed("无法获取stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Failed("无法获取stdout".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Failed("无法获取stderr".to_string()))?;

        // 引擎可能不读stdin就退出，写入失败以退出码为准
        if let Err(e) = stdin.write_all(&payload).await {
            debug!("写入引擎stdin失败: {}", e);
        }
        drop(stdin);

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut artifact = None;
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngineError::Failed(format!("读取引擎输出失败: {e}")))?
        {
            if progress.is_cancelled() {
                let _ = child.kill().await;
                return Err(EngineError::Cancelled);
            }
            match parse_output_line(&line) {
                OutputLine::Progress(pct, message) => progress.report(pct, message),
                OutputLine::Artifact(value) => artifact = Some(value),
                OutputLine::Other => debug!("引擎输出: {}", line),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::Failed(format!("等待引擎进程结束失败: {e}")))?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            warn!(
                "分析引擎异常退出: task_id={}, exit_code={:?}",
                input.task_id,
                status.code()
            );
            return Err(EngineError::Failed(format!(
                "引擎退出码 {:?}: {}",
                status.code(),
                stderr_output.trim()
            )));
        }

        artifact.ok_or_else(|| EngineError::Failed("引擎没有输出分析结果".to_string()))
    }
}
