use std::io::Cursor;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use nbserve::{
    publisher::{FileSystemPublisher, PublishError, Publisher, ResolvedContent},
    render::Renderers,
    web::{
        self,
        state::AppState,
        utils::{
            http_date::format_http_date,
            mime::{mimetype_for_path, NOTEBOOK_MIME},
            streaming::CHUNK_SIZE,
        },
    },
};
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tower::util::ServiceExt;

const NOTEBOOK: &str = r##"{
 "nbformat": 4,
 "nbformat_minor": 5,
 "metadata": {"language_info": {"name": "python", "mimetype": "text/x-python"}},
 "cells": [
  {"cell_type": "markdown", "metadata": {}, "source": ["# Analysis\n", "\n", "Quarterly numbers"]},
  {"cell_type": "code", "metadata": {}, "execution_count": 1,
   "source": ["total = sum([1, 2, 3])\n", "print(total)"],
   "outputs": [{"output_type": "stream", "name": "stdout", "text": ["6\n"]}]}
 ]
}"##;

/// 固定的修改时间，带亚秒部分
fn fixed_mtime() -> SystemTime {
    UNIX_EPOCH + Duration::new(1_700_000_000, 500_000_000)
}

fn write_fixture(root: &std::path::Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::write(&path, contents).expect("write");
    let file = std::fs::File::options()
        .write(true)
        .open(&path)
        .expect("open");
    file.set_modified(fixed_mtime()).expect("set mtime");
}

fn make_app(base_url: &str) -> (Router, TempDir) {
    let root = tempdir().expect("tempdir");
    write_fixture(root.path(), "notes/analysis.ipynb", NOTEBOOK.as_bytes());
    write_fixture(root.path(), "readme.txt", b"hello world\n");

    let state = Arc::new(AppState {
        publisher: Arc::new(FileSystemPublisher::new(root.path())),
        renderers: Renderers::builtin(),
    });
    (web::router(state, base_url), root)
}

async fn get(app: Router, uri: &str, headers: &[(header::HeaderName, &str)]) -> Response {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(name, *value);
    }
    app.oneshot(builder.body(Body::empty()).unwrap())
        .await
        .expect("response")
}

async fn read_body(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

fn content_type(response: &Response) -> &str {
    response.headers()[header::CONTENT_TYPE].to_str().unwrap()
}

#[tokio::test]
async fn notebook_defaults_to_rendered_html() {
    let (app, _root) = make_app("/");
    let response = get(app, "/notes/analysis.ipynb", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).starts_with("text/html"));
    let last_modified: DateTime<Utc> = fixed_mtime().into();
    assert_eq!(
        response.headers()[header::LAST_MODIFIED],
        format_http_date(last_modified).as_str()
    );

    let body = String::from_utf8(read_body(response).await).unwrap();
    assert!(body.contains("<h1>Analysis</h1>"));
    assert!(body.contains("total = sum([1, 2, 3])"));
    assert!(body.contains("6\n"));
}

#[tokio::test]
async fn notebook_code_format_is_plain_text() {
    let (app, _root) = make_app("/");
    let response = get(app, "/notes/analysis.ipynb?format=code", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "text/plain");
    let body = String::from_utf8(read_body(response).await).unwrap();
    assert!(body.contains("# In[1]:"));
    assert!(body.contains("print(total)"));
    assert!(body.contains("# # Analysis"));
}

#[tokio::test]
async fn notebook_raw_format_returns_literal_bytes() {
    let (app, _root) = make_app("/");
    let response = get(app, "/notes/analysis.ipynb?format=raw", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), NOTEBOOK_MIME);
    assert_eq!(read_body(response).await, NOTEBOOK.as_bytes());
}

#[tokio::test]
async fn unsupported_format_is_bad_request() {
    let (app, _root) = make_app("/");
    let response = get(app, "/notes/analysis.ipynb?format=pdf", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn plain_files_ignore_format() {
    let (app, _root) = make_app("/");
    let response = get(app, "/readme.txt?format=code", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "text/plain");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(read_body(response).await, b"hello world\n");
}

#[tokio::test]
async fn repeated_format_parameter_uses_last_value() {
    let (app, _root) = make_app("/");

    let response = get(app.clone(), "/readme.txt?format=a&format=b", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, b"hello world\n");

    let response = get(app.clone(), "/ghost.ipynb?format=a&format=b", &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(
        app.clone(),
        "/notes/analysis.ipynb?format=pdf&format=raw",
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), NOTEBOOK_MIME);

    let response = get(app, "/notes/analysis.ipynb?format=raw&format=pdf", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["status"], "error");
}

async fn head(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("HEAD")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .expect("response")
}

#[tokio::test]
async fn head_returns_headers_without_body() {
    let (app, _root) = make_app("/");

    let response = head(app.clone(), "/readme.txt").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response), "text/plain");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "12");
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert!(read_body(response).await.is_empty());

    let response = head(app.clone(), "/notes/analysis.ipynb").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(content_type(&response).starts_with("text/html"));
    assert!(read_body(response).await.is_empty());

    let response = head(app, "/ghost.ipynb").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missing_paths_are_not_found() {
    let (app, _root) = make_app("/");
    for uri in ["/ghost.ipynb", "/notes", "/"] {
        let response = get(app.clone(), uri, &[]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[tokio::test]
async fn traversal_outside_base_is_forbidden() {
    let (app, _root) = make_app("/");
    for uri in ["/notes/../../etc/passwd", "/%2e%2e/secret"] {
        let response = get(app.clone(), uri, &[]).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", uri);
    }
}

#[tokio::test]
async fn conditional_requests_use_whole_seconds() {
    let (app, _root) = make_app("/");
    let last_modified: DateTime<Utc> = fixed_mtime().into();

    // 原样回传 Last-Modified 必须命中缓存，即便服务端时间带亚秒
    let echoed = format_http_date(last_modified);
    let response = get(
        app.clone(),
        "/readme.txt",
        &[(header::IF_MODIFIED_SINCE, echoed.as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert!(read_body(response).await.is_empty());

    let later = format_http_date(last_modified + chrono::Duration::hours(1));
    let response = get(
        app.clone(),
        "/notes/analysis.ipynb",
        &[(header::IF_MODIFIED_SINCE, later.as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let earlier = format_http_date(last_modified - chrono::Duration::seconds(1));
    let response = get(
        app.clone(),
        "/readme.txt",
        &[(header::IF_MODIFIED_SINCE, earlier.as_str())],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_body(response).await, b"hello world\n");

    let response = get(
        app,
        "/readme.txt",
        &[(header::IF_MODIFIED_SINCE, "not a date")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn byte_ranges_are_served_partially() {
    let (app, _root) = make_app("/");
    let response = get(app.clone(), "/readme.txt", &[(header::RANGE, "bytes=6-10")]).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 6-10/12");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
    assert_eq!(read_body(response).await, b"world");

    let response = get(app, "/readme.txt", &[(header::RANGE, "bytes=50-")]).await;
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */12");
}

#[tokio::test]
async fn base_url_prefix_scopes_the_route() {
    let (app, _root) = make_app("/docs/");

    let response = get(app.clone(), "/docs/readme.txt", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get(app, "/readme.txt", &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// 记录读取量与释放情况的读取句柄
struct TrackedReader {
    inner: Cursor<Vec<u8>>,
    bytes_read: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

impl AsyncRead for TrackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        let read = buf.filled().len() - before;
        self.bytes_read.fetch_add(read, Ordering::SeqCst);
        result
    }
}

impl AsyncSeek for TrackedReader {
    fn start_seek(mut self: Pin<&mut Self>, position: std::io::SeekFrom) -> std::io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

struct TrackedPublisher {
    size: usize,
    bytes_read: Arc<AtomicUsize>,
    released: Arc<AtomicBool>,
}

#[async_trait]
impl Publisher for TrackedPublisher {
    async fn resolve(&self, url_segment: &str) -> Result<ResolvedContent, PublishError> {
        Ok(ResolvedContent {
            stream: Box::new(TrackedReader {
                inner: Cursor::new(vec![7u8; self.size]),
                bytes_read: self.bytes_read.clone(),
                released: self.released.clone(),
            }),
            mimetype: mimetype_for_path(url_segment),
            last_modified: Utc::now(),
            length: Some(self.size as u64),
        })
    }
}

fn tracked_app(size: usize) -> (Router, Arc<AtomicUsize>, Arc<AtomicBool>) {
    let bytes_read = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicBool::new(false));
    let state = Arc::new(AppState {
        publisher: Arc::new(TrackedPublisher {
            size,
            bytes_read: bytes_read.clone(),
            released: released.clone(),
        }),
        renderers: Renderers::builtin(),
    });
    (web::router(state, "/"), bytes_read, released)
}

#[tokio::test]
async fn client_disconnect_stops_streaming_and_releases_stream() {
    let (app, bytes_read, released) = tracked_app(10 * CHUNK_SIZE);
    let response = get(app, "/large.bin", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let first = body
        .frame()
        .await
        .expect("frame")
        .expect("ok")
        .into_data()
        .expect("data");
    assert_eq!(first.len(), CHUNK_SIZE);
    assert!(!released.load(Ordering::SeqCst));

    // 模拟客户端断开：响应体被丢弃
    drop(body);

    assert!(released.load(Ordering::SeqCst));
    assert_eq!(bytes_read.load(Ordering::SeqCst), CHUNK_SIZE);
}

#[tokio::test]
async fn stream_is_released_on_every_exit_path() {
    // 304
    let (app, _, released) = tracked_app(16);
    let since = format_http_date(Utc::now() + chrono::Duration::hours(1));
    let response = get(app, "/a.txt", &[(header::IF_MODIFIED_SINCE, since.as_str())]).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert!(released.load(Ordering::SeqCst));

    // 400
    let (app, bytes_read, released) = tracked_app(16);
    let response = get(app, "/a.ipynb?format=pdf", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(bytes_read.load(Ordering::SeqCst), 0);

    // 渲染失败（内容不是合法 notebook）
    let (app, _, released) = tracked_app(16);
    let response = get(app, "/a.ipynb", &[]).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(released.load(Ordering::SeqCst));

    // 完整传输
    let (app, _, released) = tracked_app(16);
    let response = get(app, "/a.txt", &[]).await;
    assert_eq!(read_body(response).await.len(), 16);
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn head_releases_stream_without_reading() {
    let (app, bytes_read, released) = tracked_app(3 * CHUNK_SIZE);
    let response = head(app, "/large.bin").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        (3 * CHUNK_SIZE).to_string().as_str()
    );
    assert!(released.load(Ordering::SeqCst));
    assert_eq!(bytes_read.load(Ordering::SeqCst), 0);
    assert!(read_body(response).await.is_empty());
}
