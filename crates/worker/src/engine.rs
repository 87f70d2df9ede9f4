use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use extractor_core::config::WorkerConfig;
use extractor_core::models::{ActivityContext, ExtractionResult, ExtractionTask};
use extractor_core::traits::ExtractionEngine;
use extractor_core::{ExtractorError, ExtractorResult};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 引擎约定的"输入无效"退出码
pub const EXIT_INVALID_INPUT: i32 = 2;

/// 外部命令提取引擎
///
/// 任务以 JSON 写入子进程 stdin，子进程在 stdout 输出 `ExtractionResult` JSON。
/// 运行期间按固定间隔上报心跳；执行器取消尝试时子进程随之被终止。
pub struct CommandExtractionEngine {
    command: String,
    args: Vec<String>,
    heartbeat_interval: Duration,
}

impl CommandExtractionEngine {
    pub fn new<S: Into<String>>(command: S, args: Vec<String>, heartbeat_interval: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            heartbeat_interval,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.engine_command.clone(),
            config.engine_args.clone(),
            Duration::from_millis(config.heartbeat_interval_ms),
        )
    }
}

#[async_trait]
impl ExtractionEngine for CommandExtractionEngine {
    async fn extract(
        &self,
        ctx: &ActivityContext,
        task: &ExtractionTask,
    ) -> ExtractorResult<ExtractionResult> {
        let start_time = Instant::now();
        let payload = serde_json::to_vec(task)?;

        info!(
            "执行提取引擎: source={}, command={}, attempt={}",
            task.source.display(),
            self.command,
            ctx.attempt()
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractorError::extraction(format!("启动提取引擎失败: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            // 引擎可能不读取输入就退出，写入失败以退出码为准
            if let Err(e) = stdin.write_all(&payload).await {
                warn!("写入引擎输入失败: {}", e);
            }
            drop(stdin);
        }

        let output = child.wait_with_output();
        tokio::pin!(output);
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        let output = loop {
            tokio::select! {
                result = &mut output => {
                    break result.map_err(|e| ExtractorError::extraction(format!("等待引擎结束失败: {e}")))?;
                }
                _ = ticker.tick() => ctx.heartbeat(),
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(
            "提取引擎结束: exit_code={:?}, duration={}ms",
            output.status.code(),
            start_time.elapsed().as_millis()
        );

        match output.status.code() {
            Some(0) => {}
            Some(EXIT_INVALID_INPUT) => {
                return Err(ExtractorError::InvalidMimeType(if stderr.is_empty() {
                    task.mimetype.clone()
                } else {
                    stderr
                }));
            }
            code => {
                return Err(ExtractorError::extraction(format!(
                    "提取引擎执行失败，退出码: {code:?}: {stderr}"
                )));
            }
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractorError::extraction(format!("无法解析引擎输出: {e}")))
    }

    fn name(&self) -> &str {
        &self.command
    }
}
