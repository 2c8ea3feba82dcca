//! Notebook 渲染能力：HTML 与源码提取

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::config::{RendererEngine, RendererSettings};
use crate::publisher::ContentReader;

pub mod html;
pub mod nbconvert;
pub mod notebook;
pub mod script;

pub use html::HtmlExporter;
pub use nbconvert::{NbconvertRenderer, NbconvertTarget};
pub use script::ScriptExporter;

/// 渲染结果，`content_type` 为渲染器的默认类型
#[derive(Debug, Clone)]
pub struct Rendered {
    pub body: String,
    pub content_type: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to read notebook: {0}")]
    Read(#[from] std::io::Error),

    #[error("invalid notebook document: {0}")]
    InvalidNotebook(#[from] serde_json::Error),

    #[error("unsupported notebook: {0}")]
    Unsupported(String),

    #[error("renderer process failed: {0}")]
    Process(String),

    #[error("renderer timed out after {0:?}")]
    Timeout(Duration),

    #[error("render task failed: {0}")]
    Task(String),
}

/// 渲染器：消费内容句柄，产出完整文本
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, source: ContentReader) -> Result<Rendered, RenderError>;
}

/// 读出整个文档并释放句柄
pub(crate) async fn read_document(mut source: ContentReader) -> Result<Vec<u8>, RenderError> {
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

/// 请求处理使用的两种渲染能力
#[derive(Clone)]
pub struct Renderers {
    pub html: Arc<dyn Renderer>,
    pub code: Arc<dyn Renderer>,
}

impl Renderers {
    pub fn builtin() -> Self {
        Self {
            html: Arc::new(HtmlExporter),
            code: Arc::new(ScriptExporter),
        }
    }

    pub fn from_settings(settings: &RendererSettings) -> Self {
        match settings.engine {
            RendererEngine::Builtin => Self::builtin(),
            RendererEngine::Nbconvert => {
                let timeout = Duration::from_secs(settings.timeout_secs);
                Self {
                    html: Arc::new(NbconvertRenderer::new(
                        &settings.nbconvert_command,
                        NbconvertTarget::Html,
                        timeout,
                    )),
                    code: Arc::new(NbconvertRenderer::new(
                        &settings.nbconvert_command,
                        NbconvertTarget::Script,
                        timeout,
                    )),
                }
            }
        }
    }
}
