use chrono::{DateTime, Timelike, Utc};

/// 格式化为 HTTP-date（`Sun, 06 Nov 1994 08:49:37 GMT`）
///
/// HTTP-date 无法表示 1970 年之前的时间，早于纪元的时间按纪元输出。
pub fn format_http_date(timestamp: DateTime<Utc>) -> String {
    httpdate::fmt_http_date(timestamp.max(DateTime::UNIX_EPOCH).into())
}

/// 解析 If-Modified-Since 等日期头
///
/// 接受 IMF-fixdate、RFC 850 与 asctime 三种格式；无法解析时返回 None，
/// 调用方应视为该请求头不存在。
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(DateTime::from)
}

/// 去掉亚秒精度，客户端回传的时间戳只精确到秒
pub fn truncate_to_seconds(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}

/// 资源是否在 `since` 之后被修改过（严格大于）
pub fn is_modified_since(last_modified: DateTime<Utc>, since: DateTime<Utc>) -> bool {
    truncate_to_seconds(last_modified) > since
}
