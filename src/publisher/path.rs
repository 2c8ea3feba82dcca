use std::path::{Component, Path, PathBuf};

/// 将 URL 片段规整为相对路径
///
/// 去除 `.` 与空段，`..` 回退一级；回退越过根目录或片段本身为绝对路径时返回 None。
pub(super) fn normalize_segment(segment: &str) -> Option<PathBuf> {
    let mut parts = Vec::new();
    for comp in Path::new(segment).components() {
        match comp {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(parts.into_iter().collect())
}
