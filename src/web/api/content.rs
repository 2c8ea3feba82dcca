use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use tracing::{debug, error, Instrument};
use uuid::Uuid;

use crate::publisher::ResolvedContent;
use crate::web::{
    state::AppState,
    utils::{
        errors::DeliveryError,
        http_date::{format_http_date, is_modified_since, parse_http_date},
        streaming::StreamProtocolLayer,
    },
};

/// Notebook 的输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Raw,
    #[default]
    Html,
    Code,
}

impl FromStr for OutputFormat {
    type Err = DeliveryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "raw" => Ok(Self::Raw),
            "html" => Ok(Self::Html),
            "code" => Ok(Self::Code),
            other => Err(DeliveryError::BadRequest(other.to_string())),
        }
    }
}

/// 取查询串中最后一个 `format` 参数；重复或无法识别的参数不视为错误
pub fn format_param(raw_query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(raw_query.unwrap_or_default().as_bytes())
        .filter(|(key, _)| key == "format")
        .last()
        .map(|(_, value)| value.into_owned())
}

/// 单次请求的上下文，响应结束即丢弃
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub url_segment: String,
    /// 原始 `format` 参数，只有命中 Notebook 时才校验
    pub format: Option<String>,
    /// 解析失败的 If-Modified-Since 视为不存在
    pub conditional_since: Option<DateTime<Utc>>,
    pub range: Option<String>,
    /// HEAD 请求只需要响应头
    pub head_only: bool,
}

impl RequestContext {
    pub fn new(url_segment: String, format: Option<String>, headers: &HeaderMap) -> Self {
        let header_str =
            |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok());

        let conditional_since = header_str(header::IF_MODIFIED_SINCE).and_then(|raw| {
            let parsed = parse_http_date(raw);
            if parsed.is_none() {
                debug!("[Delivery] Ignoring malformed If-Modified-Since: {:?}", raw);
            }
            parsed
        });

        Self {
            url_segment,
            format,
            conditional_since,
            range: header_str(header::RANGE).map(str::to_string),
            head_only: false,
        }
    }

    pub fn requested_format(&self) -> Result<OutputFormat, DeliveryError> {
        match self.format.as_deref().map(str::trim) {
            None => Ok(OutputFormat::default()),
            Some(value) => value.parse(),
        }
    }
}

/// HTTP 请求处理器：`GET`/`HEAD {base_url}{path}`
pub async fn handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    path: Option<Path<String>>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let url_segment = path.map(|Path(segment)| segment).unwrap_or_default();
    let format = format_param(raw_query.as_deref());
    let mut request = RequestContext::new(url_segment, format, &headers);
    request.head_only = method == Method::HEAD;
    let span = tracing::info_span!(
        "content",
        request_id = %Uuid::new_v4(),
        segment = %request.url_segment
    );

    async move {
        match deliver(&state, request).await {
            Ok(response) => response,
            Err(err) => {
                let status = err.status_code();
                if status.is_server_error() {
                    error!("[Delivery] {}", err);
                } else {
                    debug!("[Delivery] {} ({})", err, status);
                }
                err.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// 请求状态机：解析 -> 条件缓存 -> 按类型与格式分发
///
/// `ResolvedContent` 在每条退出路径上随所有权结束而释放（包括中途断开连接）。
pub async fn deliver(state: &AppState, request: RequestContext) -> Result<Response, DeliveryError> {
    let content = state.publisher.resolve(&request.url_segment).await?;
    let last_modified = format_http_date(content.last_modified);

    let not_modified = request
        .conditional_since
        .is_some_and(|since| !is_modified_since(content.last_modified, since));

    let mut response = if not_modified {
        drop(content);
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        dispatch(state, &request, content).await?
    };

    if let Ok(value) = HeaderValue::from_str(&last_modified) {
        response.headers_mut().insert(header::LAST_MODIFIED, value);
    }
    Ok(response)
}

async fn dispatch(
    state: &AppState,
    request: &RequestContext,
    content: ResolvedContent,
) -> Result<Response, DeliveryError> {
    if content.mimetype.is_notebook() {
        match request.requested_format()? {
            OutputFormat::Html => {
                let rendered = state.renderers.html.render(content.stream).await?;
                return Ok((
                    [(header::CONTENT_TYPE, rendered.content_type)],
                    rendered.body,
                )
                    .into_response());
            }
            OutputFormat::Code => {
                let rendered = state.renderers.code.render(content.stream).await?;
                // 源码统一按纯文本返回
                return Ok((
                    [(header::CONTENT_TYPE, "text/plain".to_string())],
                    rendered.body,
                )
                    .into_response());
            }
            OutputFormat::Raw => {}
        }
    }

    StreamProtocolLayer::raw(
        content,
        request.range.as_deref(),
        request.head_only,
        &request.url_segment,
    )
}
