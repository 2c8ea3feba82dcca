use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tracing::{debug, warn};

use crate::publisher::ResolvedContent;
use crate::web::utils::errors::DeliveryError;
use crate::web::utils::range::{parse_range, RangeOutcome};

/// 单个分块的上限
pub const CHUNK_SIZE: usize = 64 * 1024;

/// 把读取句柄切成惰性的分块序列
///
/// 给定 `start` 时先定位；给定 `end` 时恰好输出 `end - start` 个字节，末块按剩余量截断。
/// 指定了 `end` 却提前读到 EOF 视为内容与元数据不一致，以 `UnexpectedEof` 结束序列。
/// 序列会消费句柄，不可重放。
pub fn chunked_content<R>(
    mut reader: R,
    start: Option<u64>,
    end: Option<u64>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + AsyncSeek + Unpin + Send + 'static,
{
    async_stream::try_stream! {
        if let Some(offset) = start {
            reader.seek(SeekFrom::Start(offset)).await?;
        }
        let mut remaining = end.map(|end| end.saturating_sub(start.unwrap_or(0)));

        loop {
            let chunk_size = match remaining {
                Some(left) if left < CHUNK_SIZE as u64 => left as usize,
                _ => CHUNK_SIZE,
            };
            if chunk_size == 0 {
                break;
            }

            let mut chunk = BytesMut::zeroed(chunk_size);
            let read = read_full(&mut reader, &mut chunk).await?;
            if read == 0 {
                if let Some(left) = remaining {
                    if left != 0 {
                        Err::<(), _>(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("content ended with {} bytes still expected", left),
                        ))?;
                    }
                }
                break;
            }

            chunk.truncate(read);
            if let Some(left) = remaining.as_mut() {
                *left -= read as u64;
            }
            yield chunk.freeze();
        }
    }
}

/// 尽量填满缓冲区，返回 0 表示已到 EOF
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

/// 响应体包装：统计已交付字节数，客户端中途断开时记录日志
///
/// 连接关闭后 hyper 会直接丢弃响应体，内部流（连同文件句柄）随之释放。
pub struct DeliveryStream<S> {
    inner: S,
    label: String,
    delivered: u64,
    finished: bool,
}

impl<S> DeliveryStream<S> {
    pub fn new(inner: S, label: impl Into<String>) -> Self {
        Self {
            inner,
            label: label.into(),
            delivered: 0,
            finished: false,
        }
    }
}

impl<S> Stream for DeliveryStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.delivered += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finished = true;
                warn!("[Delivery] Aborting {}: {}", this.label, e);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for DeliveryStream<S> {
    fn drop(&mut self) {
        if self.finished {
            debug!("[Delivery] Sent {} ({} bytes)", self.label, self.delivered);
        } else {
            debug!(
                "[Delivery] Client went away during {} after {} bytes",
                self.label, self.delivered
            );
        }
    }
}

/// 流式协议处理层：原始字节响应（支持单段 Range）
pub struct StreamProtocolLayer;

impl StreamProtocolLayer {
    /// `head_only` 时只生成响应头，句柄不读取直接释放
    pub fn raw(
        content: ResolvedContent,
        range_header: Option<&str>,
        head_only: bool,
        label: &str,
    ) -> Result<Response, DeliveryError> {
        let ResolvedContent {
            stream,
            mimetype,
            length,
            ..
        } = content;

        let mut status = StatusCode::OK;
        let mut extra = Vec::new();
        let (mut start, mut end) = (None, None);

        if let (Some(raw), Some(total)) = (range_header, length) {
            match parse_range(raw, total) {
                RangeOutcome::Full => {}
                RangeOutcome::Partial(range) => {
                    status = StatusCode::PARTIAL_CONTENT;
                    extra.push((header::CONTENT_RANGE, range.content_range(total)));
                    extra.push((header::CONTENT_LENGTH, range.byte_len().to_string()));
                    start = Some(range.start);
                    end = Some(range.end);
                }
                RangeOutcome::Unsatisfiable => {
                    return Err(DeliveryError::RangeNotSatisfiable(total));
                }
            }
        }
        if let Some(total) = length {
            extra.push((header::ACCEPT_RANGES, "bytes".to_string()));
            if head_only && status == StatusCode::OK {
                extra.push((header::CONTENT_LENGTH, total.to_string()));
            }
        }

        let body = if head_only {
            drop(stream);
            debug!("[Delivery] Headers only for {}", label);
            Body::empty()
        } else {
            let chunks = Box::pin(chunked_content(stream, start, end));
            Body::from_stream(DeliveryStream::new(chunks, label))
        };
        let mut response = Response::new(body);
        *response.status_mut() = status;

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(mimetype.as_str()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        for (name, value) in extra {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
        Ok(response)
    }
}
