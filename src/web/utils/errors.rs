use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::publisher::PublishError;
use crate::render::RenderError;

pub const CODE_INTERNAL: &str = "NBS-500";
pub const CODE_BAD_REQUEST: &str = "NBS-400";
pub const CODE_FORBIDDEN: &str = "NBS-403";
pub const CODE_NOT_FOUND: &str = "NBS-404";
pub const CODE_RANGE: &str = "NBS-416";

pub const CODE_RENDER_INTERNAL: &str = "NBS-RND-500";

/// 请求边界上的错误，全部在此转换为 HTTP 状态码，不会继续向外传播
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("unsupported format: {0}")]
    BadRequest(String),

    #[error("requested range not satisfiable (length {0})")]
    RangeNotSatisfiable(u64),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl DeliveryError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Publish(PublishError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Publish(PublishError::Forbidden(_)) => StatusCode::FORBIDDEN,
            Self::Publish(PublishError::Io { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        let details = self.to_string();
        match self {
            Self::Publish(PublishError::NotFound(_)) => not_found_json(&details),
            Self::Publish(PublishError::Forbidden(_)) => forbidden_json(&details),
            Self::Publish(PublishError::Io { .. }) => internal_error_json(&details),
            Self::BadRequest(_) => bad_request_json(&details),
            Self::RangeNotSatisfiable(_) => {
                error_json(CODE_RANGE, "Range not satisfiable", Some(&details))
            }
            Self::Render(_) => render_error_json(&details),
        }
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.body())).into_response();
        if let Self::RangeNotSatisfiable(total) = self {
            if let Ok(value) = format!("bytes */{}", total).parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

pub fn internal_error_json(details: &str) -> Value {
    error_json(CODE_INTERNAL, "Internal error", Some(details))
}

pub fn bad_request_json(details: &str) -> Value {
    error_json(CODE_BAD_REQUEST, "Invalid request", Some(details))
}

pub fn forbidden_json(details: &str) -> Value {
    error_json(CODE_FORBIDDEN, "Forbidden", Some(details))
}

pub fn not_found_json(details: &str) -> Value {
    error_json(CODE_NOT_FOUND, "Not found", Some(details))
}

pub fn render_error_json(details: &str) -> Value {
    error_json(CODE_RENDER_INTERNAL, "Render failed", Some(details))
}

/// 构造统一错误体；release 构建只暴露安全文案
pub fn error_json(code: &str, safe_message: &str, details: Option<&str>) -> Value {
    let message = if cfg!(debug_assertions) {
        details.unwrap_or(safe_message)
    } else {
        safe_message
    };
    serde_json::json!({
        "status": "error",
        "code": code,
        "message": message
    })
}
