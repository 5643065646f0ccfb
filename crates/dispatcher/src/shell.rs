use std::collections::HashMap;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use capacity_core::traits::{TaskContext, TaskHandler};
use capacity_core::{CapacityError, CapacityResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

/// Shell任务参数，来自任务负载
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Shell任务处理器
///
/// 非零退出码视为本次尝试失败。取消信号触发时终止子进程。
#[derive(Debug, Clone, Default)]
pub struct ShellTaskHandler;

impl ShellTaskHandler {
    pub fn new() -> Self {
        Self
    }
}

/// 按行读取子进程输出，非UTF-8字节按替换字符保留
async fn read_lines<R>(reader: R, stream: &str) -> Vec<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                lines.push(String::from_utf8_lossy(&buf).trim_end().to_string());
                buf.clear();
            }
            Err(e) => {
                warn!("读取子进程{}失败，输出可能不完整: {}", stream, e);
                break;
            }
        }
    }
    lines
}

#[async_trait]
impl TaskHandler for ShellTaskHandler {
    async fn handle(&self, context: &TaskContext) -> CapacityResult<Value> {
        let params: ShellTaskParams = serde_json::from_value(context.payload.clone())
            .map_err(|e| CapacityError::TaskExecution(format!("解析Shell任务参数失败: {e}")))?;

        info!(
            "执行Shell任务: task_id={}, command={}, args={:?}",
            context.task_id, params.command, params.args
        );
        let start_time = Instant::now();

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .envs(&params.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CapacityError::TaskExecution(format!("启动Shell命令失败: {e}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CapacityError::TaskExecution("无法获取stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CapacityError::TaskExecution("无法获取stderr".to_string()))?;

        // 子进程归该future所有，取消时随future一起被丢弃并终止
        let run = async move {
            let (stdout_lines, stderr_lines) = tokio::join!(read_lines(stdout, "stdout"), read_lines(stderr, "stderr"));
            let status = child
                .wait()
                .await
                .map_err(|e| CapacityError::TaskExecution(format!("等待进程结束失败: {e}")))?;
            Ok::<_, CapacityError>((status, stdout_lines, stderr_lines))
        };

        let mut cancel = context.cancel.clone();
        let (status, stdout_lines, stderr_lines) = tokio::select! {
            result = run => result?,
            _ = cancel.cancelled() => {
                warn!("Shell任务被取消: task_id={}", context.task_id);
                return Err(CapacityError::TaskExecution(format!(
                    "shell task {} cancelled",
                    context.task_id
                )));
            }
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let exit_code = status.code();
        info!(
            "Shell任务执行完成: task_id={}, success={}, exit_code={:?}, duration={}ms",
            context.task_id,
            status.success(),
            exit_code,
            duration_ms
        );

        if !status.success() {
            let detail = if stderr_lines.is_empty() {
                format!("命令执行失败，退出码: {exit_code:?}")
            } else {
                stderr_lines.join("\n")
            };
            return Err(CapacityError::TaskExecution(detail));
        }

        Ok(json!({
            "exit_code": exit_code,
            "stdout": stdout_lines.join("\n"),
            "stderr": stderr_lines.join("\n"),
            "duration_ms": duration_ms,
        }))
    }

    fn name(&self) -> &str {
        "shell"
    }
}
