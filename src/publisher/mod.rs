//! 内容源抽象：把 URL 片段解析为可读字节流及其元数据

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncSeek};

use crate::web::utils::mime::MimeType;

pub mod filesystem;
mod path;

pub use filesystem::FileSystemPublisher;

/// 请求期间独占的内容读取句柄；需要可定位以支持区间读取
pub trait ContentStream: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ContentStream for T {}

pub type ContentReader = Box<dyn ContentStream>;

/// 一次解析的结果，由请求独占，Drop 即释放底层句柄
pub struct ResolvedContent {
    pub stream: ContentReader,
    pub mimetype: MimeType,
    /// 最后修改时间（UTC）
    pub last_modified: DateTime<Utc>,
    /// 已知时为内容总字节数，用于 Range 请求
    pub length: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("path escapes publish root: {0}")]
    Forbidden(String),

    #[error("I/O error for {segment}: {source}")]
    Io {
        segment: String,
        #[source]
        source: std::io::Error,
    },
}

/// 可插拔内容源
///
/// 文件系统是目前唯一的实现；远端或数据库后端只需实现 `resolve`。
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn resolve(&self, url_segment: &str) -> Result<ResolvedContent, PublishError>;
}
