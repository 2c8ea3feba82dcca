use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::html::HTML_CONTENT_TYPE;
use super::{read_document, RenderError, Rendered, Renderer};
use crate::publisher::ContentReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NbconvertTarget {
    Html,
    Script,
}

impl NbconvertTarget {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Script => "script",
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Html => HTML_CONTENT_TYPE,
            Self::Script => "text/plain",
        }
    }
}

/// 调用外部 `jupyter nbconvert` 渲染
///
/// 文档经 stdin 传入，结果从 stdout 读取；超时或请求被取消时子进程随句柄一起被杀掉。
#[derive(Debug, Clone)]
pub struct NbconvertRenderer {
    command: String,
    target: NbconvertTarget,
    timeout: Duration,
}

impl NbconvertRenderer {
    pub fn new(command: impl Into<String>, target: NbconvertTarget, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            target,
            timeout,
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(["nbconvert", "--to", self.target.as_arg(), "--stdin", "--stdout"]);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Renderer for NbconvertRenderer {
    async fn render(&self, source: ContentReader) -> Result<Rendered, RenderError> {
        let document = read_document(source).await?;
        tracing::debug!(
            "[Render] nbconvert --to {} ({} bytes, timeout {:?})",
            self.target.as_arg(),
            document.len(),
            self.timeout
        );

        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| RenderError::Process(format!("failed to spawn {}: {}", self.command, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RenderError::Process("failed to capture nbconvert stdin".into()))?;
        // 单独写入 stdin，避免与 stdout 互相阻塞
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&document).await;
            drop(stdin);
            result
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RenderError::Timeout(self.timeout))??;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("[Render] nbconvert closed stdin early: {}", e),
            Err(e) => return Err(RenderError::Task(e.to_string())),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().last().unwrap_or("").trim().to_string();
            return Err(RenderError::Process(format!(
                "nbconvert exited with {}: {}",
                output.status, last_line
            )));
        }

        Ok(Rendered {
            body: String::from_utf8_lossy(&output.stdout).into_owned(),
            content_type: self.target.content_type().to_string(),
        })
    }
}
