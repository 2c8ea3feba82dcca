use std::sync::Arc;

use crate::publisher::Publisher;
use crate::render::Renderers;

/// Web 应用全局状态
///
/// 职责：跨请求共享的只读对象，通过 Arc 注入到 Axum 的 Handler 中。
pub struct AppState {
    pub publisher: Arc<dyn Publisher>,
    pub renderers: Renderers,
}
