use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

pub mod api;
pub mod state;
pub mod utils;

use self::{api::content, state::AppState};

/// 构建路由：`base_url` 之下的任意路径都交给内容处理器
pub fn router(state: Arc<AppState>, base_url: &str) -> Router {
    Router::new()
        .route(&format!("{}*path", base_url), get(content::handler))
        .route(base_url, get(content::handler))
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}
