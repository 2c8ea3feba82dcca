use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tracing::debug;

use super::path::normalize_segment;
use super::{PublishError, Publisher, ResolvedContent};
use crate::web::utils::mime::mimetype_for_path;

/// 基于本地目录的内容源
#[derive(Debug, Clone)]
pub struct FileSystemPublisher {
    base_path: PathBuf,
}

impl FileSystemPublisher {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// URL 片段对应的文件系统路径，不允许越出 `base_path`
    pub fn path_for_url_segment(&self, url_segment: &str) -> Result<PathBuf, PublishError> {
        let relative = normalize_segment(url_segment)
            .ok_or_else(|| PublishError::Forbidden(url_segment.to_string()))?;
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Publisher for FileSystemPublisher {
    async fn resolve(&self, url_segment: &str) -> Result<ResolvedContent, PublishError> {
        let path = self.path_for_url_segment(url_segment)?;

        // 打不开（不存在、无权限等）一律按不存在处理
        let file = File::open(&path).await.map_err(|e| {
            debug!("[Publisher] Cannot open {:?}: {}", path, e);
            PublishError::NotFound(url_segment.to_string())
        })?;

        let metadata = file.metadata().await.map_err(|source| PublishError::Io {
            segment: url_segment.to_string(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(PublishError::NotFound(url_segment.to_string()));
        }

        let modified = metadata.modified().map_err(|source| PublishError::Io {
            segment: url_segment.to_string(),
            source,
        })?;
        let last_modified: DateTime<Utc> = modified.into();
        let mimetype = mimetype_for_path(&path.to_string_lossy());

        debug!(
            "[Publisher] Resolved {:?} ({}, {} bytes)",
            path,
            mimetype,
            metadata.len()
        );

        Ok(ResolvedContent {
            stream: Box::new(file),
            mimetype,
            last_modified,
            length: Some(metadata.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::utils::mime::{NOTEBOOK_MIME, OCTET_STREAM};
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    #[test]
    fn joins_segment_under_base_path() {
        let publisher = FileSystemPublisher::new("/data");
        let path = publisher
            .path_for_url_segment("notes/analysis.ipynb")
            .unwrap();
        assert_eq!(path, PathBuf::from("/data/notes/analysis.ipynb"));
    }

    #[test]
    fn refuses_traversal_out_of_base() {
        let publisher = FileSystemPublisher::new("/data");
        let err = publisher.path_for_url_segment("../etc/passwd").unwrap_err();
        assert!(matches!(err, PublishError::Forbidden(_)));
    }

    #[tokio::test]
    async fn resolves_existing_file() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("notes")).expect("mkdir");
        std::fs::write(dir.path().join("notes/analysis.ipynb"), b"{}").expect("write");

        let publisher = FileSystemPublisher::new(dir.path());
        let mut content = publisher
            .resolve("notes/analysis.ipynb")
            .await
            .expect("resolve");

        assert_eq!(content.mimetype.as_str(), NOTEBOOK_MIME);
        assert_eq!(content.length, Some(2));
        assert!(content.last_modified <= Utc::now());

        let mut body = Vec::new();
        content.stream.read_to_end(&mut body).await.expect("read");
        assert_eq!(body, b"{}");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let publisher = FileSystemPublisher::new(dir.path());
        let err = publisher.resolve("ghost.ipynb").await.err().expect("error");
        assert!(matches!(err, PublishError::NotFound(_)));
    }

    #[tokio::test]
    async fn directories_are_not_served() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("notes")).expect("mkdir");
        let publisher = FileSystemPublisher::new(dir.path());

        for segment in ["notes", ""] {
            let err = publisher.resolve(segment).await.err().expect("error");
            assert!(matches!(err, PublishError::NotFound(_)), "{}", segment);
        }
    }

    #[tokio::test]
    async fn unknown_extension_is_octet_stream() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join("blob"), b"\x00\x01").expect("write");
        let publisher = FileSystemPublisher::new(dir.path());
        let content = publisher.resolve("blob").await.expect("resolve");
        assert_eq!(content.mimetype.as_str(), OCTET_STREAM);
    }
}
