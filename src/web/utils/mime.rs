use std::borrow::Cow;
use std::fmt;
use std::path::Path;

/// Notebook 文件扩展名
pub const NOTEBOOK_EXTENSION: &str = ".ipynb";
/// Notebook 专用 MIME，底层虽为 JSON，但需与普通 JSON 区分以便渲染分发
pub const NOTEBOOK_MIME: &str = "application/x-ipynb+json";
/// RFC 6713 规定的 gzip 类型
pub const GZIP_MIME: &str = "application/gzip";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// MIME 策略分组，每个路径恰好落入其中一组
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimeClass {
    Notebook,
    Compressed,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeType {
    value: Cow<'static, str>,
    class: MimeClass,
}

impl MimeType {
    pub fn notebook() -> Self {
        Self {
            value: Cow::Borrowed(NOTEBOOK_MIME),
            class: MimeClass::Notebook,
        }
    }

    fn compressed(value: &'static str) -> Self {
        Self {
            value: Cow::Borrowed(value),
            class: MimeClass::Compressed,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn class(&self) -> MimeClass {
        self.class
    }

    pub fn is_notebook(&self) -> bool {
        self.class == MimeClass::Notebook
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// 按扩展名推断传输编码（区分大小写，`.Z` 为 compress）
fn detect_encoding(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension().and_then(|value| value.to_str())?;
    match ext {
        "gz" | "tgz" | "taz" | "tz" | "svgz" => Some("gzip"),
        "Z" => Some("compress"),
        "bz2" | "tbz2" => Some("bzip2"),
        "xz" | "txz" => Some("xz"),
        "br" => Some("br"),
        _ => None,
    }
}

/// 根据路径推断响应 MIME 类型
///
/// 顺序：Notebook 短路 -> 压缩编码 -> 扩展名推断 -> octet-stream 兜底
pub fn mimetype_for_path(path: &str) -> MimeType {
    if path.ends_with(NOTEBOOK_EXTENSION) {
        return MimeType::notebook();
    }

    match detect_encoding(path) {
        Some("gzip") => MimeType::compressed(GZIP_MIME),
        // bzip2 等编码目前没有 IANA 注册类型
        Some(_) => MimeType::compressed(OCTET_STREAM),
        None => MimeType {
            value: Cow::Borrowed(mime_guess::from_path(path).first_raw().unwrap_or(OCTET_STREAM)),
            class: MimeClass::Generic,
        },
    }
}
